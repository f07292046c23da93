// GPU buffers for vertex, index, uniform and staging data
//
// Memory comes from the device allocator; host-visible buffers stay
// persistently mapped so writes are a plain memcpy.

use super::Device;
use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    allocation: Option<Allocation>,
    device: Arc<Device>,
}

impl Buffer {
    pub fn new(
        device: &Arc<Device>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Arc<Self>> {
        check_size(name, size)?;

        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_buffer(&create_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(handle) };

        let allocation = match device.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(handle, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        } {
            unsafe { device.device.destroy_buffer(handle, None) };
            device.free(allocation);
            return Err(e).with_context(|| format!("Failed to bind memory for buffer '{}'", name));
        }

        device.set_object_name(handle, name);

        Ok(Arc::new(Self {
            handle,
            size,
            usage,
            location,
            allocation: Some(allocation),
            device: device.clone(),
        }))
    }

    /// Create a host-visible buffer and fill it with `data`
    pub fn with_data<T: Copy>(
        device: &Arc<Device>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Arc<Self>> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let buffer = Self::new(device, name, size, usage, MemoryLocation::CpuToGpu)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    pub fn is_mapped(&self) -> bool {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .is_some()
    }

    /// Copy `data` into the buffer at byte `offset`. Host-visible buffers only.
    pub fn write<T: Copy>(&self, offset: vk::DeviceSize, data: &[T]) -> Result<()> {
        let len = std::mem::size_of_val(data) as vk::DeviceSize;
        check_range(self.size, offset, len)?;

        let ptr = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .context("Buffer is not host visible")?;

        unsafe {
            let dst = (ptr.as_ptr() as *mut u8).add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr() as *const u8, dst, len as usize);
        }
        Ok(())
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.handle, None) };
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

// Vulkan forbids zero-sized buffers
fn check_size(name: &str, size: vk::DeviceSize) -> Result<()> {
    if size == 0 {
        anyhow::bail!("Buffer '{}' has zero size", name);
    }
    Ok(())
}

fn check_range(size: vk::DeviceSize, offset: vk::DeviceSize, len: vk::DeviceSize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => anyhow::bail!(
            "Write of {} bytes at offset {} exceeds buffer size {}",
            len,
            offset,
            size
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_inside_buffer_are_allowed() {
        assert!(check_range(256, 0, 256).is_ok());
        assert!(check_range(256, 128, 64).is_ok());
        assert!(check_range(256, 256, 0).is_ok());
    }

    #[test]
    fn writes_past_the_end_are_rejected() {
        assert!(check_range(256, 200, 64).is_err());
        assert!(check_range(256, u64::MAX, 2).is_err());
    }

    #[test]
    fn empty_buffer_is_rejected() {
        assert!(check_size("empty", 0).is_err());
        assert!(check_size("vertices", 4).is_ok());
    }
}
