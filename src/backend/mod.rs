// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash, one per pipeline component. Everything here is
// created once at initialization and released in reverse order at shutdown.

pub mod device;
pub mod framebuffer;
pub mod geometry;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::GraphicsDevice;
pub use framebuffer::{FrameBuffer, Viewport};
pub use geometry::{GeometryBuffer, Vertex, TRIANGLE};
pub use shader::ShaderProgram;
pub use swapchain::Swapchain;
