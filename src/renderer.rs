// Renderer - wires the pipeline components and replays the frame plan.
//
// Construction order is window -> device -> swapchain -> render targets ->
// shader program -> vertex buffer -> command buffers -> sync. Teardown runs
// in strictly the reverse order on every exit path: `Drop` walks
// `teardown_order()` and releases each entry explicitly, ending with the
// window whose native handle the surface references.

use anyhow::{Context, Result};
use ash::vk;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::{
    sync::FrameSync, FrameBuffer, GeometryBuffer, GraphicsDevice, ShaderProgram, Swapchain,
    TRIANGLE,
};
use crate::config::Config;
use crate::error::RenderError;
use crate::render_loop::{CommandSink, FramePlan};

/// Everything the renderer keeps alive, in the order it comes into
/// existence. Shutdown walks exactly the reverse order; the window is first
/// because the device's surface references its native handle, so it must
/// outlive everything else.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Resource {
    Window,
    Device,
    Swapchain,
    RenderTargets,
    ShaderProgram,
    VertexBuffer,
    CommandBuffers,
    FrameSync,
}

pub const CREATION_ORDER: [Resource; 8] = [
    Resource::Window,
    Resource::Device,
    Resource::Swapchain,
    Resource::RenderTargets,
    Resource::ShaderProgram,
    Resource::VertexBuffer,
    Resource::CommandBuffers,
    Resource::FrameSync,
];

pub fn teardown_order() -> [Resource; 8] {
    let mut order = CREATION_ORDER;
    order.reverse();
    order
}

pub struct Renderer {
    // Fields are listed in teardown order for the reader; the actual release
    // sequence is driven by `Drop` walking `teardown_order()`.
    sync: ManuallyDrop<FrameSync>,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    geometry: ManuallyDrop<GeometryBuffer>,
    program: ManuallyDrop<ShaderProgram>,
    framebuffer: ManuallyDrop<FrameBuffer>,
    swapchain: ManuallyDrop<Swapchain>,
    device: ManuallyDrop<Arc<GraphicsDevice>>,
    // Keeps the native window alive until the surface in `device` is gone.
    window: ManuallyDrop<Arc<Window>>,
}

impl Renderer {
    /// Create every GPU resource. Any failure tears down whatever was
    /// already created (component drops run in reverse) and aborts
    /// initialization; there is no partial-success state.
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        let size = window.inner_size();
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;

        let device = GraphicsDevice::new(&window, &config.window.title, enable_validation)?;
        let swapchain = Swapchain::new(device.clone(), size.width, size.height)?;
        let framebuffer =
            FrameBuffer::from_swapchain(device.clone(), &swapchain, size.width, size.height)?;
        let program = ShaderProgram::load_from_source(
            device.clone(),
            &config.shaders.vertex,
            &config.shaders.fragment,
            framebuffer.render_pass(),
            framebuffer.viewport(),
            config.debug.shader_debug_info,
        )?;
        let geometry = GeometryBuffer::upload(device.clone(), &TRIANGLE)?;

        let plan = FramePlan::triangle(config.graphics.clear_color);

        let (command_pool, command_buffers) =
            Self::record_command_buffers(&device, &framebuffer, &program, &geometry, plan)?;

        let sync = FrameSync::new(Arc::clone(&device))?;

        log::info!("Renderer initialized");

        Ok(Self {
            sync: ManuallyDrop::new(sync),
            command_pool,
            command_buffers,
            geometry: ManuallyDrop::new(geometry),
            program: ManuallyDrop::new(program),
            framebuffer: ManuallyDrop::new(framebuffer),
            swapchain: ManuallyDrop::new(swapchain),
            device: ManuallyDrop::new(device),
            window: ManuallyDrop::new(window),
        })
    }

    /// Pre-record one command buffer per back buffer from the frame plan.
    /// The content is static, so recording happens exactly once.
    fn record_command_buffers(
        device: &Arc<GraphicsDevice>,
        framebuffer: &FrameBuffer,
        program: &ShaderProgram,
        geometry: &GeometryBuffer,
        plan: FramePlan,
    ) -> Result<(vk::CommandPool, Vec<vk::CommandBuffer>)> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family);

        let command_pool = unsafe {
            device
                .device
                .create_command_pool(&pool_info, None)
                .map_err(|e| RenderError::ResourceCreation(format!("command pool: {e}")))?
        };

        let target_count = framebuffer.target_count() as u32;
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(target_count);

        let record = || -> Result<Vec<vk::CommandBuffer>> {
            let command_buffers = unsafe {
                device
                    .device
                    .allocate_command_buffers(&alloc_info)
                    .map_err(|e| RenderError::ResourceCreation(format!("command buffers: {e}")))?
            };

            for (i, &cmd) in command_buffers.iter().enumerate() {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                unsafe { device.device.begin_command_buffer(cmd, &begin_info) }?;

                let mut recorder = FrameRecorder {
                    device: device.as_ref(),
                    cmd,
                    framebuffer,
                    program,
                    geometry,
                    target: vk::Framebuffer::null(),
                };
                plan.record(i, &mut recorder);

                unsafe {
                    device.device.cmd_end_render_pass(cmd);
                    device.device.end_command_buffer(cmd)?;
                }
            }

            Ok(command_buffers)
        };

        match record() {
            Ok(command_buffers) => {
                log::info!("Pre-recorded {} command buffers", command_buffers.len());
                Ok((command_pool, command_buffers))
            }
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                Err(e)
            }
        }
    }

    /// One frame: acquire the back buffer, wait for the previous frame,
    /// submit the pre-recorded commands, present with vsync. Runs to
    /// completion on the calling thread; present is the only wait.
    pub fn render_frame(&mut self) -> Result<()> {
        // With a single sync set the previous submit must fully retire
        // before the acquire semaphore can be signaled again.
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.sync.in_flight_fence], true, u64::MAX)?;
            self.device.device.reset_fences(&[self.sync.in_flight_fence])?;
        }

        let image_index = self
            .swapchain
            .acquire_next_image(u64::MAX, self.sync.image_available)
            .context("Failed to acquire back buffer")?;

        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished];
        let command_buffers = [self.command_buffers[image_index as usize]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                self.sync.in_flight_fence,
            )?;
        }

        // FIFO present mode: synchronized to one vertical refresh.
        self.swapchain
            .present(
                self.device.graphics_queue,
                image_index,
                &[self.sync.render_finished],
            )
            .context("Failed to present back buffer")?;

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();

        // Walk the documented release sequence. The exhaustive match keeps
        // this in sync with `Resource`: a new entry fails to compile until
        // it is released here.
        unsafe {
            for resource in teardown_order() {
                log::debug!("Releasing {:?}", resource);
                match resource {
                    Resource::FrameSync => ManuallyDrop::drop(&mut self.sync),
                    Resource::CommandBuffers => {
                        // Frees the command buffers with the pool.
                        self.device
                            .device
                            .destroy_command_pool(self.command_pool, None);
                    }
                    Resource::VertexBuffer => ManuallyDrop::drop(&mut self.geometry),
                    Resource::ShaderProgram => ManuallyDrop::drop(&mut self.program),
                    Resource::RenderTargets => ManuallyDrop::drop(&mut self.framebuffer),
                    Resource::Swapchain => ManuallyDrop::drop(&mut self.swapchain),
                    Resource::Device => ManuallyDrop::drop(&mut self.device),
                    // The surface above references the native window, so the
                    // window handle is released only after the device.
                    Resource::Window => ManuallyDrop::drop(&mut self.window),
                }
            }
        }
    }
}

/// Translates the frame plan into Vulkan commands. Clearing happens via the
/// render pass load op, so `clear` begins the pass on the bound target.
struct FrameRecorder<'a> {
    device: &'a GraphicsDevice,
    cmd: vk::CommandBuffer,
    framebuffer: &'a FrameBuffer,
    program: &'a ShaderProgram,
    geometry: &'a GeometryBuffer,
    target: vk::Framebuffer,
}

impl CommandSink for FrameRecorder<'_> {
    fn bind_render_target(&mut self, target: usize) {
        self.target = self.framebuffer.target(target);
    }

    fn clear(&mut self, color: [f32; 4]) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        }];

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.framebuffer.render_pass())
            .framebuffer(self.target)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.framebuffer.extent(),
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.device.cmd_begin_render_pass(
                self.cmd,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn bind_pipeline(&mut self) {
        self.program.bind(self.cmd);
    }

    fn bind_vertex_buffer(&mut self, slot: u32, stride: u32, offset: u64) {
        // Slot and stride are fixed in the pipeline's binding description.
        debug_assert_eq!(slot, 0);
        debug_assert_eq!(stride, crate::backend::Vertex::STRIDE);
        debug_assert_eq!(offset, 0);
        self.geometry.bind(self.cmd);
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        debug_assert_eq!(vertex_count, self.geometry.vertex_count());
        unsafe {
            self.device
                .device
                .cmd_draw(self.cmd, vertex_count, 1, first_vertex, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_is_strict_reverse_of_creation() {
        let teardown = teardown_order();
        let mut expected = CREATION_ORDER;
        expected.reverse();
        assert_eq!(teardown, expected);

        // Dependents go first.
        assert_eq!(teardown[0], Resource::FrameSync);
        assert!(
            teardown.iter().position(|r| *r == Resource::RenderTargets)
                < teardown.iter().position(|r| *r == Resource::Swapchain)
        );
    }

    #[test]
    fn surface_is_released_before_the_native_window() {
        // The device owns the surface over the window's native handle, so
        // the window must come into existence first and go away last.
        assert_eq!(CREATION_ORDER[0], Resource::Window);

        let teardown = teardown_order();
        assert_eq!(teardown[teardown.len() - 1], Resource::Window);
        assert!(
            teardown.iter().position(|r| *r == Resource::Device)
                < teardown.iter().position(|r| *r == Resource::Window)
        );
    }
}
