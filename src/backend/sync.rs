// Synchronization primitives
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU sync

use super::Device;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

pub struct Semaphore {
    pub handle: vk::Semaphore,
    device: Arc<Device>,
}

impl Semaphore {
    pub fn new(device: &Arc<Device>) -> Result<Arc<Self>> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let handle = unsafe { device.device.create_semaphore(&create_info, None) }
            .context("Failed to create semaphore")?;

        Ok(Arc::new(Self {
            handle,
            device: device.clone(),
        }))
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_semaphore(self.handle, None) };
    }
}

pub struct Fence {
    pub handle: vk::Fence,
    device: Arc<Device>,
}

impl Fence {
    /// Create a fence, optionally already signaled (useful for frame 0)
    pub fn new(device: &Arc<Device>, signaled: bool) -> Result<Arc<Self>> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let handle = unsafe { device.device.create_fence(&create_info, None) }
            .context("Failed to create fence")?;

        Ok(Arc::new(Self {
            handle,
            device: device.clone(),
        }))
    }

    pub fn wait(&self, timeout: u64) -> Result<()> {
        unsafe { self.device.device.wait_for_fences(&[self.handle], true, timeout) }
            .context("Failed waiting for fence")
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[self.handle]) }.context("Failed to reset fence")
    }

    pub fn is_signaled(&self) -> Result<bool> {
        Ok(unsafe { self.device.device.get_fence_status(self.handle) }?)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_fence(self.handle, None) };
    }
}
