// Render loop - the steady-state per-frame sequence.
//
// The loop has two states. It starts `Running` and moves to `Stopped`
// exactly once, when the host window closes; `Stopped` is terminal. The
// per-frame command sequence itself is described by `FramePlan` and recorded
// through the `CommandSink` seam, so the sequence can be verified without a
// GPU.

use anyhow::Result;

use crate::backend::geometry::{Vertex, TRIANGLE};

/// External collaborator owning the OS message pump: invokes the supplied
/// frame callback until a close signal is observed. No further contract is
/// assumed about its mechanism.
pub trait FrameScheduler {
    fn run(&mut self, frame: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Two-state frame driver. Draw callbacks only ever fire in `Running`.
pub struct RenderLoop {
    state: LoopState,
}

impl RenderLoop {
    pub fn new() -> Self {
        Self {
            state: LoopState::Running,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    /// Transition to `Stopped`. Terminal; there is no resume.
    pub fn stop(&mut self) {
        if self.state == LoopState::Running {
            log::info!("Render loop stopped");
        }
        self.state = LoopState::Stopped;
    }

    /// Run `draw` for a single frame. Returns `Ok(false)` without invoking
    /// the callback once the loop has stopped.
    pub fn frame(&mut self, draw: impl FnOnce() -> Result<()>) -> Result<bool> {
        match self.state {
            LoopState::Stopped => Ok(false),
            LoopState::Running => {
                draw()?;
                Ok(true)
            }
        }
    }

    /// Hand control to the scheduler until the host signals shutdown. The
    /// loop is `Stopped` when this returns, regardless of how the scheduler
    /// exited.
    pub fn run<S: FrameScheduler>(
        &mut self,
        scheduler: &mut S,
        mut draw: impl FnMut() -> Result<()>,
    ) -> Result<()> {
        self.state = LoopState::Running;
        let result = scheduler.run(&mut draw);
        self.stop();
        result
    }
}

impl Default for RenderLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer of one frame's command sequence: the Vulkan command recorder in
/// production, an in-memory trace in tests.
pub trait CommandSink {
    /// Bind the render-target view for the given back buffer.
    fn bind_render_target(&mut self, target: usize);
    /// Clear the bound target to a fixed color.
    fn clear(&mut self, color: [f32; 4]);
    /// Bind the sticky pipeline state (shader stages, input layout, topology).
    fn bind_pipeline(&mut self);
    /// Bind the vertex buffer.
    fn bind_vertex_buffer(&mut self, slot: u32, stride: u32, offset: u64);
    /// Issue the draw call.
    fn draw(&mut self, vertex_count: u32, first_vertex: u32);
}

/// Immutable description of one frame, fixed at initialization and replayed
/// every frame. Present is queue-level and happens after the recorded
/// commands execute.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FramePlan {
    pub clear_color: [f32; 4],
    pub vertex_count: u32,
    pub first_vertex: u32,
    pub vertex_stride: u32,
}

impl FramePlan {
    /// The plan for the static triangle: clear, then one draw of 3 vertices
    /// starting at 0.
    pub fn triangle(clear_color: [f32; 4]) -> Self {
        Self {
            clear_color,
            vertex_count: TRIANGLE.len() as u32,
            first_vertex: 0,
            vertex_stride: Vertex::STRIDE,
        }
    }

    /// Replay the frame sequence into a sink, in order: bind target, clear,
    /// bind pipeline, bind geometry at slot 0, draw.
    pub fn record(&self, target: usize, sink: &mut dyn CommandSink) {
        sink.bind_render_target(target);
        sink.clear(self.clear_color);
        sink.bind_pipeline();
        sink.bind_vertex_buffer(0, self.vertex_stride, 0);
        sink.draw(self.vertex_count, self.first_vertex);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Command {
        BindRenderTarget(usize),
        Clear([f32; 4]),
        BindPipeline,
        BindVertexBuffer { slot: u32, stride: u32, offset: u64 },
        Draw { vertex_count: u32, first_vertex: u32 },
    }

    #[derive(Default)]
    struct RecordingSink {
        commands: Vec<Command>,
    }

    impl CommandSink for RecordingSink {
        fn bind_render_target(&mut self, target: usize) {
            self.commands.push(Command::BindRenderTarget(target));
        }
        fn clear(&mut self, color: [f32; 4]) {
            self.commands.push(Command::Clear(color));
        }
        fn bind_pipeline(&mut self) {
            self.commands.push(Command::BindPipeline);
        }
        fn bind_vertex_buffer(&mut self, slot: u32, stride: u32, offset: u64) {
            self.commands
                .push(Command::BindVertexBuffer { slot, stride, offset });
        }
        fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
            self.commands.push(Command::Draw {
                vertex_count,
                first_vertex,
            });
        }
    }

    /// Invokes the frame callback a fixed number of times, then reports the
    /// window as closed.
    struct ScriptedScheduler {
        frames_before_close: u32,
    }

    impl FrameScheduler for ScriptedScheduler {
        fn run(&mut self, frame: &mut dyn FnMut() -> Result<()>) -> Result<()> {
            for _ in 0..self.frames_before_close {
                frame()?;
            }
            Ok(())
        }
    }

    const CLEAR: [f32; 4] = [32.0 / 255.0, 103.0 / 255.0, 178.0 / 255.0, 1.0];

    #[test]
    fn frame_sequence_clears_before_drawing() {
        let mut sink = RecordingSink::default();
        FramePlan::triangle(CLEAR).record(0, &mut sink);

        let clear_at = sink
            .commands
            .iter()
            .position(|c| matches!(c, Command::Clear(_)))
            .expect("no clear recorded");
        let draw_at = sink
            .commands
            .iter()
            .position(|c| matches!(c, Command::Draw { .. }))
            .expect("no draw recorded");

        assert!(clear_at < draw_at);
        assert_eq!(sink.commands[clear_at], Command::Clear(CLEAR));
    }

    #[test]
    fn frame_issues_exactly_one_draw_of_three_vertices() {
        let mut sink = RecordingSink::default();
        FramePlan::triangle(CLEAR).record(0, &mut sink);

        let draws: Vec<_> = sink
            .commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .collect();
        assert_eq!(
            draws,
            vec![&Command::Draw {
                vertex_count: 3,
                first_vertex: 0
            }]
        );
    }

    #[test]
    fn geometry_binds_at_slot_zero_with_vertex_stride() {
        let mut sink = RecordingSink::default();
        FramePlan::triangle(CLEAR).record(0, &mut sink);

        assert!(sink.commands.contains(&Command::BindVertexBuffer {
            slot: 0,
            stride: 28,
            offset: 0
        }));
    }

    #[test]
    fn target_binding_precedes_everything_else() {
        let mut sink = RecordingSink::default();
        FramePlan::triangle(CLEAR).record(1, &mut sink);
        assert_eq!(sink.commands[0], Command::BindRenderTarget(1));
    }

    #[test]
    fn loop_draws_once_per_scheduled_frame_then_stops() {
        let mut render_loop = RenderLoop::new();
        let mut scheduler = ScriptedScheduler {
            frames_before_close: 3,
        };

        let mut draws = 0;
        render_loop
            .run(&mut scheduler, || {
                draws += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(draws, 3);
        assert_eq!(render_loop.state(), LoopState::Stopped);
    }

    #[test]
    fn no_draws_after_window_close() {
        let mut render_loop = RenderLoop::new();
        let mut scheduler = ScriptedScheduler {
            frames_before_close: 1,
        };
        render_loop.run(&mut scheduler, || Ok(())).unwrap();

        // The host has gone away; further frame requests are ignored.
        let drew = render_loop.frame(|| panic!("draw after close")).unwrap();
        assert!(!drew);
    }

    #[test]
    fn stop_is_terminal() {
        let mut render_loop = RenderLoop::new();
        assert!(render_loop.is_running());
        render_loop.stop();
        render_loop.stop();
        assert_eq!(render_loop.state(), LoopState::Stopped);
    }

    #[test]
    fn end_to_end_single_frame_trace() {
        // One simulated frame: target bound, cleared to the fixed color,
        // pipeline and geometry bound, one 3-vertex draw. Then the window
        // closes and nothing else is recorded.
        let mut render_loop = RenderLoop::new();
        let mut scheduler = ScriptedScheduler {
            frames_before_close: 1,
        };
        let plan = FramePlan::triangle(CLEAR);
        let mut sink = RecordingSink::default();

        render_loop
            .run(&mut scheduler, || {
                plan.record(0, &mut sink);
                Ok(())
            })
            .unwrap();

        assert_eq!(
            sink.commands,
            vec![
                Command::BindRenderTarget(0),
                Command::Clear(CLEAR),
                Command::BindPipeline,
                Command::BindVertexBuffer {
                    slot: 0,
                    stride: 28,
                    offset: 0
                },
                Command::Draw {
                    vertex_count: 3,
                    first_vertex: 0
                },
            ]
        );
        assert_eq!(render_loop.state(), LoopState::Stopped);
    }
}
