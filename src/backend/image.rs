// Images, image views and samplers
//
// Images allocate through the device allocator. Swapchain images are wrapped
// too, but are owned by the swapchain and never destroyed here.

use super::Device;
use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Image creation parameters
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
    pub location: MemoryLocation,
}

impl Default for ImageDesc {
    fn default() -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D { width: 1, height: 1, depth: 1 },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::SAMPLED,
            flags: vk::ImageCreateFlags::empty(),
            location: MemoryLocation::GpuOnly,
        }
    }
}

impl ImageDesc {
    pub fn new_2d(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            format,
            extent: vk::Extent3D { width, height, depth: 1 },
            ..Default::default()
        }
    }

    pub fn image_type(mut self, image_type: vk::ImageType) -> Self {
        self.image_type = image_type;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.extent.depth = depth;
        self
    }

    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn flags(mut self, flags: vk::ImageCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }
}

pub struct Image {
    pub handle: vk::Image,
    pub desc: ImageDesc,
    // None for swapchain-owned images
    allocation: Option<Allocation>,
    device: Arc<Device>,
}

impl Image {
    pub fn new(device: &Arc<Device>, name: &str, desc: ImageDesc) -> Result<Arc<Self>> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .flags(desc.flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = unsafe { device.device.create_image(&create_info, None) }
            .with_context(|| format!("Failed to create image '{}'", name))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(handle) };

        let allocation = match device.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: desc.location,
            linear: desc.tiling == vk::ImageTiling::LINEAR,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(handle, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_image_memory(handle, allocation.memory(), allocation.offset())
        } {
            unsafe { device.device.destroy_image(handle, None) };
            device.free(allocation);
            return Err(e).with_context(|| format!("Failed to bind memory for image '{}'", name));
        }

        device.set_object_name(handle, name);

        Ok(Arc::new(Self {
            handle,
            desc,
            allocation: Some(allocation),
            device: device.clone(),
        }))
    }

    /// Wrap an image owned by someone else (the swapchain)
    pub(crate) fn from_swapchain(
        device: &Arc<Device>,
        handle: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            desc: ImageDesc::new_2d(extent.width, extent.height, format)
                .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST),
            allocation: None,
            device: device.clone(),
        })
    }

    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.desc.extent
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            unsafe { self.device.device.destroy_image(self.handle, None) };
            self.device.free(allocation);
        }
    }
}

/// Aspect mask implied by a format
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub struct ImageView {
    pub handle: vk::ImageView,
    pub view_type: vk::ImageViewType,
    pub subresource_range: vk::ImageSubresourceRange,
    image: Arc<Image>,
}

impl ImageView {
    /// View over every mip level and layer of `image`
    pub fn new(image: &Arc<Image>, view_type: vk::ImageViewType) -> Result<Arc<Self>> {
        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect_for_format(image.format()),
            base_mip_level: 0,
            level_count: image.desc.mip_levels,
            base_array_layer: 0,
            layer_count: image.desc.array_layers,
        };
        Self::with_range(image, view_type, range)
    }

    pub fn with_range(
        image: &Arc<Image>,
        view_type: vk::ImageViewType,
        subresource_range: vk::ImageSubresourceRange,
    ) -> Result<Arc<Self>> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image.handle)
            .view_type(view_type)
            .format(image.format())
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(subresource_range);

        let handle = unsafe { image.device.device.create_image_view(&create_info, None) }
            .context("Failed to create image view")?;

        Ok(Arc::new(Self {
            handle,
            view_type,
            subresource_range,
            image: image.clone(),
        }))
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.image.device.device.destroy_image_view(self.handle, None) };
    }
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: Option<f32>,
    pub compare_op: Option<vk::CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            mip_lod_bias: 0.0,
            max_anisotropy: None,
            compare_op: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
        }
    }
}

impl SamplerDesc {
    pub fn filter(mut self, mag: vk::Filter, min: vk::Filter) -> Self {
        self.mag_filter = mag;
        self.min_filter = min;
        self
    }

    pub fn mipmap_mode(mut self, mode: vk::SamplerMipmapMode) -> Self {
        self.mipmap_mode = mode;
        self
    }

    pub fn address_mode(mut self, mode: vk::SamplerAddressMode) -> Self {
        self.address_mode_u = mode;
        self.address_mode_v = mode;
        self.address_mode_w = mode;
        self
    }

    pub fn anisotropy(mut self, max_anisotropy: f32) -> Self {
        self.max_anisotropy = Some(max_anisotropy);
        self
    }

    pub fn compare_op(mut self, op: vk::CompareOp) -> Self {
        self.compare_op = Some(op);
        self
    }

    pub fn lod(mut self, min_lod: f32, max_lod: f32, bias: f32) -> Self {
        self.min_lod = min_lod;
        self.max_lod = max_lod;
        self.mip_lod_bias = bias;
        self
    }

    pub fn border_color(mut self, color: vk::BorderColor) -> Self {
        self.border_color = color;
        self
    }
}

pub struct Sampler {
    pub handle: vk::Sampler,
    device: Arc<Device>,
}

impl Sampler {
    pub fn new(device: &Arc<Device>, desc: &SamplerDesc) -> Result<Arc<Self>> {
        // Clamp to what the GPU allows
        let max_anisotropy = desc
            .max_anisotropy
            .map(|a| a.min(device.properties.limits.max_sampler_anisotropy));

        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode_u)
            .address_mode_v(desc.address_mode_v)
            .address_mode_w(desc.address_mode_w)
            .mip_lod_bias(desc.mip_lod_bias)
            .anisotropy_enable(max_anisotropy.is_some())
            .max_anisotropy(max_anisotropy.unwrap_or(1.0))
            .compare_enable(desc.compare_op.is_some())
            .compare_op(desc.compare_op.unwrap_or(vk::CompareOp::NEVER))
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(desc.border_color)
            .unnormalized_coordinates(false);

        let handle = unsafe { device.device.create_sampler(&create_info, None) }
            .context("Failed to create sampler")?;

        Ok(Arc::new(Self {
            handle,
            device: device.clone(),
        }))
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_get_depth_aspect() {
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for_format(vk::Format::B8G8R8A8_SRGB), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn image_desc_builder_sets_fields() {
        let desc = ImageDesc::new_2d(640, 480, vk::Format::D32_SFLOAT)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .mip_levels(4);

        assert_eq!((desc.extent.width, desc.extent.height, desc.extent.depth), (640, 480, 1));
        assert_eq!(desc.mip_levels, 4);
        assert_eq!(desc.array_layers, 1);
        assert!(matches!(desc.location, MemoryLocation::GpuOnly));
    }
}
