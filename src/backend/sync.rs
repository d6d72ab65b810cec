// Frame synchronization.
//
// One semaphore pair plus a fence: frames are fully serialized, matching the
// single-threaded submit/present cycle. No command-list double buffering.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::GraphicsDevice;
use crate::error::RenderError;

/// Semaphores ordering acquire -> submit -> present within one frame, plus
/// the fence the CPU waits on before reusing the submission.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<GraphicsDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<GraphicsDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled so the first frame's fence wait passes immediately.
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| RenderError::ResourceCreation(format!("acquire semaphore: {e}")))?;

            let render_finished = match device.device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(
                        RenderError::ResourceCreation(format!("present semaphore: {e}")).into(),
                    );
                }
            };

            let in_flight_fence = match device.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.device.destroy_semaphore(render_finished, None);
                    device.device.destroy_semaphore(image_available, None);
                    return Err(RenderError::ResourceCreation(format!("frame fence: {e}")).into());
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
                device,
            })
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        log::debug!("Releasing frame synchronization");
        unsafe {
            self.device
                .device
                .destroy_semaphore(self.image_available, None);
            self.device
                .device
                .destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
