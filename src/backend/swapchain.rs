// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The choose_* functions hold the selection policy and work on plain data.

use super::image::{Image, ImageView};
use super::physical_device::QueueType;
use super::surface::{Surface, SwapchainSupportDetails};
use super::Device;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

const PREFERRED_FORMATS: [vk::Format; 3] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8A8_UNORM,
];

/// Pick the surface format, preferring 8-bit sRGB
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    // A lone UNDEFINED entry means the surface takes anything
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Ok(vk::SurfaceFormatKHR {
                format: PREFERRED_FORMATS[0],
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            });
        }
    }

    PREFERRED_FORMATS
        .iter()
        .find_map(|&preferred| {
            formats.iter().copied().find(|f| {
                f.format == preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
        .context("No suitable surface format")
}

/// Pick the present mode.
///
/// An explicitly requested mode wins when supported. Otherwise vsync means
/// FIFO, and no vsync prefers MAILBOX, then IMMEDIATE. FIFO is always supported.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    requested: Option<vk::PresentModeKHR>,
) -> vk::PresentModeKHR {
    if let Some(requested) = requested {
        if modes.contains(&requested) {
            return requested;
        }
        log::warn!("Present mode {:?} not supported by surface", requested);
    }

    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface extent, or the window size clamped to what the surface allows
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// A swapchain cannot be built for a surface with no area (e.g. minimized)
pub fn has_area(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

/// One more than the minimum so we never wait on the driver; 0 max = unbounded
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Outcome of asking for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

/// Outcome of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentResult {
    pub fn needs_recreate(self) -> bool {
        self != PresentResult::Presented
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<Arc<Image>>,
    pub image_views: Vec<Arc<ImageView>>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    device: Arc<Device>,
}

impl Swapchain {
    /// Create a swapchain, retiring `old_swapchain` if it is not null.
    ///
    /// Returns `None` without touching `old_swapchain` while the surface
    /// has no area.
    pub fn new(
        device: &Arc<Device>,
        surface: &Surface,
        width: u32,
        height: u32,
        vsync: bool,
        requested_mode: Option<vk::PresentModeKHR>,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Option<Self>> {
        let support = SwapchainSupportDetails::query(surface, device.physical_device)?;
        let caps = &support.capabilities;

        let extent = choose_extent(caps, width, height);
        if !has_area(extent) {
            log::debug!("Surface extent is {}x{}, not creating swapchain", extent.width, extent.height);
            return Ok(None);
        }

        let format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, vsync, requested_mode);
        let image_count = choose_image_count(caps);

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            image_count
        );

        let graphics_family = device.queue_family(QueueType::Graphics);
        let present_family = device.queue_family(QueueType::Present);
        let families = [graphics_family, present_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        create_info = if graphics_family != present_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let handles = match unsafe { device.swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(handles) => handles,
            Err(e) => {
                unsafe { device.swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e).context("Failed to get swapchain images");
            }
        };

        log::info!("Created swapchain with {} images", handles.len());

        let images: Vec<Arc<Image>> = handles
            .into_iter()
            .map(|handle| Image::from_swapchain(device, handle, format.format, extent))
            .collect();

        // From here on Drop cleans up if a view fails
        let mut chain = Self {
            swapchain,
            images,
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
            device: device.clone(),
        };

        for (i, image) in chain.images.iter().enumerate() {
            let view = ImageView::new(image, vk::ImageViewType::TYPE_2D)?;
            device.set_object_name(view.handle, &format!("swapchain view {}", i));
            chain.image_views.push(view);
        }

        Ok(Some(chain))
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<AcquireResult> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireResult::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen
    pub fn present(&self, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<PresentResult> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.device.queue_present(&present_info) {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.image_views.clear();
        self.images.clear();
        unsafe {
            self.device
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        }
    }

    #[test]
    fn undefined_format_means_free_choice() {
        let chosen =
            choose_surface_format(&[format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)])
                .unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn srgb_format_is_preferred() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn color_space_must_match_for_preference() {
        let formats = [
            format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        // Nothing preferred in the right color space: take the first
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
    }

    #[test]
    fn no_formats_is_an_error() {
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn vsync_uses_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true, None), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn no_vsync_prefers_mailbox_then_immediate() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&all, false, None), vk::PresentModeKHR::MAILBOX);

        let no_mailbox = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&no_mailbox, false, None), vk::PresentModeKHR::IMMEDIATE);

        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&fifo_only, false, None), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn supported_request_overrides_vsync() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, true, Some(vk::PresentModeKHR::IMMEDIATE)),
            vk::PresentModeKHR::IMMEDIATE
        );
        // Unsupported request falls back to the heuristic
        assert_eq!(
            choose_present_mode(&modes, true, Some(vk::PresentModeKHR::MAILBOX)),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_extent_is_used_as_is() {
        let c = caps((800, 600), (1, 1), (4096, 4096));
        let extent = choose_extent(&c, 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn free_extent_is_clamped_to_window() {
        let c = caps((u32::MAX, u32::MAX), (64, 64), (2048, 2048));
        let extent = choose_extent(&c, 4000, 10);
        assert_eq!((extent.width, extent.height), (2048, 64));

        let extent = choose_extent(&c, 1280, 720);
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn minimized_surface_has_no_area() {
        // Win32 reports a fixed 0x0 extent for minimized windows
        let c = caps((0, 0), (0, 0), (0, 0));
        let extent = choose_extent(&c, 1280, 720);
        assert!(!has_area(extent));

        // A free extent is clamped up to the surface minimum
        let c = caps((u32::MAX, u32::MAX), (1, 1), (4096, 4096));
        assert!(has_area(choose_extent(&c, 0, 720)));

        let c = caps((u32::MAX, u32::MAX), (0, 0), (4096, 4096));
        assert!(!has_area(choose_extent(&c, 0, 720)));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut c = caps((1, 1), (1, 1), (1, 1));
        assert_eq!(choose_image_count(&c), 3);

        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);

        c.max_image_count = 0;
        c.min_image_count = 4;
        assert_eq!(choose_image_count(&c), 5);
    }

    #[test]
    fn only_clean_present_skips_recreate() {
        assert!(!PresentResult::Presented.needs_recreate());
        assert!(PresentResult::Suboptimal.needs_recreate());
        assert!(PresentResult::OutOfDate.needs_recreate());
    }
}
