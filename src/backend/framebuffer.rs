// Render targets derived from the swapchain plus the viewport transform.
//
// One framebuffer wraps each swapchain image view; exactly one of them is
// bound per frame. All of it is created once and lives until shutdown, so
// there is no resize handling anywhere.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::{pipeline, GraphicsDevice, Swapchain};
use crate::error::RenderError;

/// Full-window viewport, fixed for the process lifetime.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// Origin (0,0), covering the whole client area.
    pub const fn full_window(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }

    /// Depth range is the canonical [0,1]; no depth buffer exists, so it is
    /// never sampled.
    pub fn to_vk(self) -> vk::Viewport {
        vk::Viewport {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    pub fn scissor(self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D {
                x: self.x as i32,
                y: self.y as i32,
            },
            extent: vk::Extent2D {
                width: self.width as u32,
                height: self.height as u32,
            },
        }
    }
}

/// Render-target views over the swapchain's back buffers and the viewport.
pub struct FrameBuffer {
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
    viewport: Viewport,
    device: Arc<GraphicsDevice>,
}

impl FrameBuffer {
    /// Wrap every swapchain image view in a color-only framebuffer and
    /// compute the full-window viewport. The views stay valid until the
    /// swapchain is destroyed, which destruction ordering guarantees happens
    /// strictly after this object is dropped.
    pub fn from_swapchain(
        device: Arc<GraphicsDevice>,
        swapchain: &Swapchain,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let render_pass = pipeline::create_render_pass(&device, swapchain.format)?;

        let mut framebuffers = Vec::with_capacity(swapchain.image_views.len());
        for &view in &swapchain.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            let framebuffer = unsafe {
                match device.device.create_framebuffer(&framebuffer_info, None) {
                    Ok(fb) => fb,
                    Err(e) => {
                        for &fb in &framebuffers {
                            device.device.destroy_framebuffer(fb, None);
                        }
                        device.device.destroy_render_pass(render_pass, None);
                        return Err(
                            RenderError::ResourceCreation(format!("framebuffer: {e}")).into()
                        );
                    }
                }
            };
            framebuffers.push(framebuffer);
        }

        log::info!("Created {} render targets, viewport {}x{}", framebuffers.len(), width, height);

        Ok(Self {
            render_pass,
            framebuffers,
            extent: swapchain.extent,
            viewport: Viewport::full_window(width, height),
            device,
        })
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Render target for the given back-buffer index.
    pub fn target(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn target_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        log::debug!("Releasing render targets");
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_window_viewport_covers_client_area() {
        let viewport = Viewport::full_window(1280, 720);
        assert_eq!(
            viewport,
            Viewport {
                x: 0.0,
                y: 0.0,
                width: 1280.0,
                height: 720.0
            }
        );
    }

    #[test]
    fn vk_viewport_uses_canonical_depth_range() {
        let vk_viewport = Viewport::full_window(1280, 720).to_vk();
        assert_eq!(vk_viewport.min_depth, 0.0);
        assert_eq!(vk_viewport.max_depth, 1.0);
        assert_eq!(vk_viewport.width, 1280.0);
        assert_eq!(vk_viewport.height, 720.0);
    }

    #[test]
    fn scissor_matches_viewport() {
        let scissor = Viewport::full_window(640, 480).scissor();
        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.offset.y, 0);
        assert_eq!(scissor.extent.width, 640);
        assert_eq!(scissor.extent.height, 480);
    }
}
