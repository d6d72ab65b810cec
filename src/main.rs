// hello-triangle: a minimal hardware-accelerated reference pipeline.
//
// Draws one static colored triangle, once per frame, until the window is
// closed. Construction wires device -> swapchain -> render targets ->
// shaders -> vertex buffer in dependency order; the render loop then
// replays the same pre-recorded frame until shutdown.
//
// The winit event loop is the frame scheduler: it owns the OS message pump
// and invokes the draw callback on redraw until the window closes. The
// render core never touches OS messages itself.

mod backend;
mod config;
mod error;
mod render_loop;
mod renderer;

use anyhow::Result;
use config::Config;
use render_loop::RenderLoop;
use renderer::Renderer;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

fn main() -> Result<()> {
    init_logging();

    let config = Config::load();
    log::info!(
        "Starting renderer, window {}x{}",
        config.window.width,
        config.window.height
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Initialization failures are fatal: surface them as a non-zero exit.
    match app.fatal_error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

/// Application state driven by the winit event loop.
struct App {
    config: Config,
    render_loop: RenderLoop,
    // Declared before `window`: the renderer's surface must be released
    // while the native window still exists.
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    fatal_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            render_loop: RenderLoop::new(),
            renderer: None,
            window: None,
            fatal_error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.fatal_error = Some(err);
        self.render_loop.stop();
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Fixed client area for the process lifetime; resizing is out of scope.
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match Renderer::new(window.clone(), &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize renderer"));
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down");
                self.render_loop.stop();
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match self.render_loop.frame(|| renderer.render_frame()) {
                    Ok(_drew) => {}
                    Err(e) => self.fail(event_loop, e.context("Frame failed")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if !self.render_loop.is_running() {
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
