// Descriptor set layouts, pools and sets

use super::buffer::Buffer;
use super::image::{ImageView, Sampler};
use super::Device;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutDesc {
    pub bindings: Vec<vk::DescriptorSetLayoutBinding>,
    pub flags: vk::DescriptorSetLayoutCreateFlags,
}

impl DescriptorSetLayoutDesc {
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stages)
                .build(),
        );
        self
    }

    pub fn flags(mut self, flags: vk::DescriptorSetLayoutCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Binding numbers must be unique within a set
    pub fn validate(&self) -> Result<()> {
        for (i, a) in self.bindings.iter().enumerate() {
            if self.bindings[..i].iter().any(|b| b.binding == a.binding) {
                anyhow::bail!("Descriptor binding {} declared twice", a.binding);
            }
        }
        Ok(())
    }
}

pub struct DescriptorSetLayout {
    pub handle: vk::DescriptorSetLayout,
    pub desc: DescriptorSetLayoutDesc,
    device: Arc<Device>,
}

impl DescriptorSetLayout {
    pub fn new(device: &Arc<Device>, desc: DescriptorSetLayoutDesc) -> Result<Arc<Self>> {
        desc.validate()?;

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(desc.flags)
            .bindings(&desc.bindings);

        let handle = unsafe { device.device.create_descriptor_set_layout(&create_info, None) }
            .context("Failed to create descriptor set layout")?;

        Ok(Arc::new(Self {
            handle,
            desc,
            device: device.clone(),
        }))
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.handle, None)
        };
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorPoolDesc {
    pub max_sets: u32,
    pub pool_sizes: Vec<vk::DescriptorPoolSize>,
    pub flags: vk::DescriptorPoolCreateFlags,
}

impl Default for DescriptorPoolDesc {
    fn default() -> Self {
        Self {
            max_sets: 64,
            pool_sizes: Vec::new(),
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
        }
    }
}

impl DescriptorPoolDesc {
    pub fn max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    /// Add capacity for `count` descriptors of `ty`; repeated types accumulate
    pub fn pool_size(mut self, ty: vk::DescriptorType, count: u32) -> Self {
        match self.pool_sizes.iter_mut().find(|s| s.ty == ty) {
            Some(size) => size.descriptor_count += count,
            None => self.pool_sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: count,
            }),
        }
        self
    }

    pub fn flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }
}

pub struct DescriptorPool {
    pub handle: vk::DescriptorPool,
    pub desc: DescriptorPoolDesc,
    device: Arc<Device>,
}

impl DescriptorPool {
    pub fn new(device: &Arc<Device>, desc: DescriptorPoolDesc) -> Result<Arc<Self>> {
        if desc.pool_sizes.is_empty() {
            anyhow::bail!("Descriptor pool needs at least one pool size");
        }

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(desc.flags)
            .max_sets(desc.max_sets)
            .pool_sizes(&desc.pool_sizes);

        let handle = unsafe { device.device.create_descriptor_pool(&create_info, None) }
            .context("Failed to create descriptor pool")?;

        Ok(Arc::new(Self {
            handle,
            desc,
            device: device.clone(),
        }))
    }

    fn can_free_sets(&self) -> bool {
        self.desc
            .flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_descriptor_pool(self.handle, None) };
    }
}

pub struct DescriptorSet {
    pub handle: vk::DescriptorSet,
    layout: Arc<DescriptorSetLayout>,
    pool: Arc<DescriptorPool>,
}

impl DescriptorSet {
    pub fn new(pool: &Arc<DescriptorPool>, layout: &Arc<DescriptorSetLayout>) -> Result<Arc<Self>> {
        let layouts = [layout.handle];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool.handle)
            .set_layouts(&layouts);

        let handle = unsafe { pool.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?
            .into_iter()
            .next()
            .context("Driver returned no descriptor set")?;

        Ok(Arc::new(Self {
            handle,
            layout: layout.clone(),
            pool: pool.clone(),
        }))
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    pub fn write_buffer(
        &self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: buffer.handle,
            offset,
            range,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.handle)
            .dst_binding(binding)
            .descriptor_type(descriptor_type)
            .buffer_info(&buffer_info)
            .build();

        unsafe { self.pool.device.device.update_descriptor_sets(&[write], &[]) };
    }

    pub fn write_image(
        &self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        view: &ImageView,
        sampler: Option<&Sampler>,
        layout: vk::ImageLayout,
    ) {
        let image_info = [vk::DescriptorImageInfo {
            sampler: sampler.map_or(vk::Sampler::null(), |s| s.handle),
            image_view: view.handle,
            image_layout: layout,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.handle)
            .dst_binding(binding)
            .descriptor_type(descriptor_type)
            .image_info(&image_info)
            .build();

        unsafe { self.pool.device.device.update_descriptor_sets(&[write], &[]) };
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        // Sets from pools without FREE_DESCRIPTOR_SET die with the pool
        if self.pool.can_free_sets() {
            let result = unsafe {
                self.pool
                    .device
                    .device
                    .free_descriptor_sets(self.pool.handle, &[self.handle])
            };
            if let Err(e) = result {
                log::warn!("Failed to free descriptor set: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_accumulate_per_type() {
        let desc = DescriptorPoolDesc::default()
            .pool_size(vk::DescriptorType::UNIFORM_BUFFER, 8)
            .pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4)
            .pool_size(vk::DescriptorType::UNIFORM_BUFFER, 8);

        assert_eq!(desc.pool_sizes.len(), 2);
        assert_eq!(desc.pool_sizes[0].descriptor_count, 16);
        assert!(desc.flags.contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET));
    }

    #[test]
    fn duplicate_bindings_are_rejected() {
        let desc = DescriptorSetLayoutDesc::default()
            .binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX)
            .binding(0, vk::DescriptorType::SAMPLER, 1, vk::ShaderStageFlags::FRAGMENT);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn distinct_bindings_are_accepted() {
        let desc = DescriptorSetLayoutDesc::default()
            .binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX)
            .binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4, vk::ShaderStageFlags::FRAGMENT);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.bindings[1].descriptor_count, 4);
    }
}
