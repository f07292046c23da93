// Command pools and buffers

use super::physical_device::QueueType;
use super::Device;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

pub struct CommandPool {
    pub handle: vk::CommandPool,
    pub queue_type: QueueType,
    device: Arc<Device>,
}

impl CommandPool {
    /// Pool whose buffers are submitted to the queue serving `queue_type`
    pub fn new(
        device: &Arc<Device>,
        queue_type: QueueType,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Arc<Self>> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_family(queue_type))
            .flags(flags);

        let handle = unsafe { device.device.create_command_pool(&create_info, None) }
            .context("Failed to create command pool")?;

        Ok(Arc::new(Self {
            handle,
            queue_type,
            device: device.clone(),
        }))
    }

    /// Recycle every buffer allocated from this pool
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .device
                .reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())
        }
        .context("Failed to reset command pool")
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_command_pool(self.handle, None) };
    }
}

pub struct CommandBuffer {
    pub handle: vk::CommandBuffer,
    pool: Arc<CommandPool>,
}

impl CommandBuffer {
    pub fn new(pool: &Arc<CommandPool>, level: vk::CommandBufferLevel) -> Result<Arc<Self>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool.handle)
            .level(level)
            .command_buffer_count(1);

        let handle = unsafe { pool.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffer")?
            .into_iter()
            .next()
            .context("Driver returned no command buffer")?;

        Ok(Arc::new(Self {
            handle,
            pool: pool.clone(),
        }))
    }

    pub fn pool(&self) -> &Arc<CommandPool> {
        &self.pool
    }

    pub fn begin(&self, flags: vk::CommandBufferUsageFlags) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.pool.device.device.begin_command_buffer(self.handle, &begin_info) }
            .context("Failed to begin command buffer")
    }

    pub fn end(&self) -> Result<()> {
        unsafe { self.pool.device.device.end_command_buffer(self.handle) }
            .context("Failed to end command buffer")
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.pool
                .device
                .device
                .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
        }
        .context("Failed to reset command buffer")
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.pool
                .device
                .device
                .free_command_buffers(self.pool.handle, &[self.handle])
        };
    }
}
