// Backend - owns the device and the presentation loop
//
// Frame timeline:
//   acquire_next_swap_chain_image -> record -> submit_graphics -> present
//
// Each frame in flight has its own command pool, semaphores and fence. The
// swapchain and everything sized from it (depth buffer, framebuffers) are
// rebuilt by recreate_swapchain when the window changes.

use super::command::{CommandBuffer, CommandPool};
use super::image::{Image, ImageDesc, ImageView};
use super::physical_device::{pick_physical_device, QueueType};
use super::render_pass::{Framebuffer, RenderPass, RenderPassDesc};
use super::surface::{Surface, SwapchainSupportDetails};
use super::swapchain::{choose_surface_format, AcquireResult, PresentResult, Swapchain};
use super::sync::{Fence, Semaphore};
use super::{Device, Instance, VALIDATION_LAYER};
use crate::config::GraphicsConfig;
use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

const DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First depth format the device can render to
pub fn choose_depth_format(
    candidates: &[vk::Format],
    supported: impl Fn(vk::Format) -> bool,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| supported(format))
}

/// Tracks which frame in flight last rendered to each swapchain image
#[derive(Debug, Clone, Default)]
pub struct ImageOwnership {
    owners: Vec<Option<usize>>,
}

impl ImageOwnership {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Hand `image` to `frame`; returns the other frame whose fence must be
    /// waited on before the image can be reused
    pub fn claim(&mut self, image: usize, frame: usize) -> Option<usize> {
        let previous = self.owners.get_mut(image)?.replace(frame);
        previous.filter(|&p| p != frame)
    }
}

/// Recreate bookkeeping for the swapchain, independent of any GPU objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainState {
    window_extent: (u32, u32),
    needs_recreate: bool,
    minimized: bool,
    acquired: Option<u32>,
}

impl SwapchainState {
    /// Starts out needing a build for `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            window_extent: (width, height),
            needs_recreate: true,
            minimized: width == 0 || height == 0,
            acquired: None,
        }
    }

    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Image acquired this frame and not yet presented
    pub fn acquired_image(&self) -> Option<u32> {
        self.acquired
    }

    /// Window size to rebuild for, if a rebuild is due and possible
    pub fn pending_recreate(&self) -> Option<(u32, u32)> {
        (self.needs_recreate && !self.minimized).then_some(self.window_extent)
    }

    /// The window changed size; rebuild on the next acquire
    pub fn request_recreate(&mut self, width: u32, height: u32) {
        self.window_extent = (width, height);
        self.minimized = width == 0 || height == 0;
        self.needs_recreate = true;
    }

    /// Returns false when the window has no area and nothing should be built
    pub fn begin_recreate(&mut self, width: u32, height: u32) -> bool {
        self.request_recreate(width, height);
        !self.minimized
    }

    /// The surface reported a zero extent; wait for the window to come back
    pub fn surface_has_no_area(&mut self) {
        self.minimized = true;
        self.needs_recreate = true;
    }

    /// Images of the previous swapchain are gone along with it
    pub fn finish_recreate(&mut self) {
        self.needs_recreate = false;
        self.minimized = false;
        self.acquired = None;
    }

    /// Record an acquire; returns the image to render into, if any
    pub fn acquired(&mut self, result: AcquireResult) -> Option<u32> {
        match result {
            AcquireResult::Acquired { index, suboptimal } => {
                self.needs_recreate |= suboptimal;
                self.acquired = Some(index);
            }
            AcquireResult::OutOfDate => {
                self.needs_recreate = true;
                self.acquired = None;
            }
        }
        self.acquired
    }

    pub fn presented(&mut self, result: PresentResult) {
        self.needs_recreate |= result.needs_recreate();
        self.acquired = None;
    }
}

/// Swapchain and everything sized from it
struct SwapchainTargets {
    framebuffers: Vec<Arc<Framebuffer>>,
    depth_view: Arc<ImageView>,
    swapchain: Swapchain,
    image_ownership: ImageOwnership,
}

/// Per-frame-in-flight objects
pub struct FrameResources {
    pub command_buffer: Arc<CommandBuffer>,
    pub command_pool: Arc<CommandPool>,
    pub image_available: Arc<Semaphore>,
    /// Signaled by `submit_graphics`, waited on by `present`
    pub render_finished: Arc<Semaphore>,
    pub in_flight: Arc<Fence>,
}

impl FrameResources {
    fn new(device: &Arc<Device>, index: usize) -> Result<Self> {
        let command_pool = CommandPool::new(
            device,
            QueueType::Graphics,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        let command_buffer = CommandBuffer::new(&command_pool, vk::CommandBufferLevel::PRIMARY)?;
        let image_available = Semaphore::new(device)?;
        let render_finished = Semaphore::new(device)?;
        // Start signaled so the first wait returns immediately
        let in_flight = Fence::new(device, true)?;

        device.set_object_name(command_buffer.handle, &format!("frame {} commands", index));
        device.set_object_name(in_flight.handle, &format!("frame {} fence", index));

        Ok(Self {
            command_buffer,
            command_pool,
            image_available,
            render_finished,
            in_flight,
        })
    }
}

/// Vulkan backend bound to one window
///
/// Field order matters for Drop: frame resources and swapchain-sized objects
/// go first, the instance last. `targets` is `None` while the window has no
/// area.
pub struct Backend {
    frames: Vec<FrameResources>,
    targets: Option<SwapchainTargets>,
    render_pass: Arc<RenderPass>,
    device: Arc<Device>,
    surface: Surface,
    instance: Arc<Instance>,

    depth_format: vk::Format,
    state: SwapchainState,
    current_frame: usize,
    vsync: bool,
    requested_mode: Option<vk::PresentModeKHR>,
}

impl Backend {
    pub fn new(
        app_name: &str,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        width: u32,
        height: u32,
        config: &GraphicsConfig,
        enable_validation: bool,
    ) -> Result<Self> {
        log::info!("Initializing Vulkan backend...");

        let layers: &[&std::ffi::CStr] = if enable_validation {
            &[VALIDATION_LAYER]
        } else {
            &[]
        };
        let instance = Instance::new(app_name, layers, display_handle)?;
        let surface = Surface::new(instance.clone(), display_handle, window_handle)?;

        let candidate =
            pick_physical_device(&instance.instance, &surface, config.preferred_gpu.as_deref())?;
        let device = Device::new(instance.clone(), &candidate)?;

        let depth_format = choose_depth_format(&DEPTH_FORMATS, |format| {
            let props = unsafe {
                instance
                    .instance
                    .get_physical_device_format_properties(device.physical_device, format)
            };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .context("No supported depth format")?;

        // The render pass only depends on the format, so it exists even
        // before the first swapchain does
        let support = SwapchainSupportDetails::query(&surface, device.physical_device)?;
        let color_format = choose_surface_format(&support.formats)?.format;
        let render_pass = RenderPass::new(
            &device,
            RenderPassDesc::swapchain(color_format, Some(depth_format)),
        )?;

        let frames = (0..config.frames_in_flight())
            .map(|index| FrameResources::new(&device, index))
            .collect::<Result<Vec<_>>>()?;

        let mut backend = Self {
            frames,
            targets: None,
            render_pass,
            device,
            surface,
            instance,
            depth_format,
            state: SwapchainState::new(width, height),
            current_frame: 0,
            vsync: config.vsync,
            requested_mode: config.present_mode(),
        };
        backend.recreate_swapchain(width, height)?;

        log::info!("Vulkan backend ready ({} frames in flight)", backend.frames.len());
        Ok(backend)
    }

    // =========================================================================
    // FRAME LOOP
    // =========================================================================

    /// Wait for this frame's slot and acquire the next swapchain image.
    ///
    /// Returns false if nothing should be rendered this frame (minimized, or
    /// the swapchain went out of date and will be rebuilt).
    pub fn acquire_next_swap_chain_image(&mut self) -> Result<bool> {
        if let Some((width, height)) = self.state.pending_recreate() {
            self.recreate_swapchain(width, height)?;
        }
        if self.state.is_minimized() {
            return Ok(false);
        }
        let Some(targets) = self.targets.as_mut() else {
            return Ok(false);
        };

        let frame = &self.frames[self.current_frame];
        frame.in_flight.wait(u64::MAX)?;

        let result = targets
            .swapchain
            .acquire_next_image(u64::MAX, frame.image_available.handle)?;
        let Some(index) = self.state.acquired(result) else {
            return Ok(false);
        };

        // Another frame may still be rendering into this image
        if let Some(owner) = targets.image_ownership.claim(index as usize, self.current_frame) {
            self.frames[owner].in_flight.wait(u64::MAX)?;
        }

        // Only reset once we know work will be submitted, or the next wait deadlocks
        let frame = &self.frames[self.current_frame];
        frame.in_flight.reset()?;
        frame.command_pool.reset()?;

        Ok(true)
    }

    /// Submit this frame's graphics work; signals the frame fence on completion
    pub fn submit_graphics(&self, command_buffers: &[vk::CommandBuffer]) -> Result<()> {
        if self.state.acquired_image().is_none() {
            anyhow::bail!("submit_graphics called without an acquired swapchain image");
        }
        let frame = &self.frames[self.current_frame];

        let wait_semaphores = [frame.image_available.handle];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.render_finished.handle];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        self.device
            .submit(QueueType::Graphics, &[submit_info], frame.in_flight.handle)
    }

    /// Submit to a non-graphics queue without frame synchronization
    pub fn submit(
        &self,
        queue_type: QueueType,
        command_buffers: &[vk::CommandBuffer],
        fence: Option<&Fence>,
    ) -> Result<()> {
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(command_buffers)
            .build();
        let fence = fence.map_or(vk::Fence::null(), |f| f.handle);
        self.device.submit(queue_type, &[submit_info], fence)
    }

    /// Present the acquired image and advance to the next frame slot
    pub fn present(&mut self) -> Result<()> {
        let index = self
            .state
            .acquired_image()
            .context("present called without an acquired swapchain image")?;
        let targets = self.targets.as_ref().context("No swapchain to present to")?;

        let frame = &self.frames[self.current_frame];
        let result = targets
            .swapchain
            .present(index, &[frame.render_finished.handle])?;

        if result.needs_recreate() {
            log::debug!("Present reported {:?}, scheduling swapchain recreation", result);
        }
        self.state.presented(result);

        self.current_frame = (self.current_frame + 1) % self.frames.len();
        Ok(())
    }

    // =========================================================================
    // SWAPCHAIN LIFECYCLE
    // =========================================================================

    /// Rebuild the swapchain and everything sized from it.
    ///
    /// A zero-sized window or surface marks the backend minimized and
    /// rebuilds nothing.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        if !self.state.begin_recreate(width, height) {
            return Ok(());
        }

        self.device.wait_idle()?;

        let old = self
            .targets
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |t| t.swapchain.swapchain);

        let Some(swapchain) = Swapchain::new(
            &self.device,
            &self.surface,
            width,
            height,
            self.vsync,
            self.requested_mode,
            old,
        )?
        else {
            self.state.surface_has_no_area();
            return Ok(());
        };

        // The retired swapchain and its views go first
        self.targets = None;

        if self.render_pass.color_format() != Some(swapchain.format.format) {
            log::info!("Swapchain format changed, rebuilding render pass");
            self.render_pass = RenderPass::new(
                &self.device,
                RenderPassDesc::swapchain(swapchain.format.format, Some(self.depth_format)),
            )?;
        }

        let depth_view = create_depth_buffer(&self.device, self.depth_format, swapchain.extent)?;
        let framebuffers = create_framebuffers(&self.render_pass, &swapchain, &depth_view)?;

        self.targets = Some(SwapchainTargets {
            framebuffers,
            depth_view,
            image_ownership: ImageOwnership::new(swapchain.image_count()),
            swapchain,
        });
        self.state.finish_recreate();

        Ok(())
    }

    /// Flag the swapchain stale, e.g. after a window resize event
    pub fn request_recreate(&mut self, width: u32, height: u32) {
        self.state.request_recreate(width, height);
    }

    // =========================================================================
    // ONE-SHOT WORK
    // =========================================================================

    /// Record and run a command buffer on `queue_type`, blocking until done
    pub fn immediate_submit<F>(&self, queue_type: QueueType, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let pool = CommandPool::new(&self.device, queue_type, vk::CommandPoolCreateFlags::TRANSIENT)?;
        let cmd = CommandBuffer::new(&pool, vk::CommandBufferLevel::PRIMARY)?;

        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(&self.device.device, cmd.handle)?;
        cmd.end()?;

        let fence = Fence::new(&self.device, false)?;
        self.submit(queue_type, &[cmd.handle], Some(&fence))?;
        fence.wait(u64::MAX)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================
    //
    // Swapchain accessors return None while minimized; per-image ones also
    // between present and the next successful acquire.

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn needs_recreate(&self) -> bool {
        self.state.needs_recreate()
    }

    pub fn is_minimized(&self) -> bool {
        self.state.is_minimized()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> &FrameResources {
        &self.frames[self.current_frame]
    }

    pub fn current_frame_index(&self) -> usize {
        self.current_frame
    }

    pub fn current_image_index(&self) -> Option<u32> {
        self.state.acquired_image()
    }

    /// Command buffer of the current frame; its pool is reset on acquire
    pub fn current_command_buffer(&self) -> &Arc<CommandBuffer> {
        &self.current_frame().command_buffer
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.targets.as_ref().map(|t| t.swapchain.extent)
    }

    pub fn swapchain_format(&self) -> Option<vk::Format> {
        self.targets.as_ref().map(|t| t.swapchain.format.format)
    }

    pub fn swapchain_present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.targets.as_ref().map(|t| t.swapchain.present_mode)
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.targets.as_ref().map_or(0, |t| t.swapchain.image_count())
    }

    pub fn swapchain_render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    pub fn swapchain_framebuffer(&self) -> Option<&Arc<Framebuffer>> {
        let (targets, index) = self.acquired_target()?;
        targets.framebuffers.get(index)
    }

    pub fn swapchain_image(&self) -> Option<&Arc<Image>> {
        let (targets, index) = self.acquired_target()?;
        targets.swapchain.images.get(index)
    }

    pub fn swapchain_image_view(&self) -> Option<&Arc<ImageView>> {
        let (targets, index) = self.acquired_target()?;
        targets.swapchain.image_views.get(index)
    }

    pub fn depth_view(&self) -> Option<&Arc<ImageView>> {
        self.targets.as_ref().map(|t| &t.depth_view)
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    fn acquired_target(&self) -> Option<(&SwapchainTargets, usize)> {
        let index = self.state.acquired_image()?;
        Some((self.targets.as_ref()?, index as usize))
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan backend...");
        // Nothing may be in use when the fields below are destroyed
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed during shutdown: {:#}", e);
        }
    }
}

fn create_depth_buffer(
    device: &Arc<Device>,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<Arc<ImageView>> {
    let image = Image::new(
        device,
        "swapchain depth",
        ImageDesc::new_2d(extent.width, extent.height, format)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
    )?;
    ImageView::new(&image, vk::ImageViewType::TYPE_2D)
}

fn create_framebuffers(
    render_pass: &Arc<RenderPass>,
    swapchain: &Swapchain,
    depth_view: &Arc<ImageView>,
) -> Result<Vec<Arc<Framebuffer>>> {
    swapchain
        .image_views
        .iter()
        .map(|view| {
            Framebuffer::new(
                render_pass,
                vec![view.clone(), depth_view.clone()],
                swapchain.extent,
                1,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_format_follows_preference_order() {
        let chosen = choose_depth_format(&DEPTH_FORMATS, |f| f != vk::Format::D32_SFLOAT);
        assert_eq!(chosen, Some(vk::Format::D32_SFLOAT_S8_UINT));

        assert_eq!(choose_depth_format(&DEPTH_FORMATS, |_| true), Some(vk::Format::D32_SFLOAT));
        assert_eq!(choose_depth_format(&DEPTH_FORMATS, |_| false), None);
    }

    #[test]
    fn first_claim_needs_no_wait() {
        let mut ownership = ImageOwnership::new(3);
        assert_eq!(ownership.claim(0, 0), None);
        assert_eq!(ownership.claim(1, 1), None);
    }

    #[test]
    fn reclaim_by_other_frame_waits_on_previous_owner() {
        let mut ownership = ImageOwnership::new(2);
        ownership.claim(1, 0);
        assert_eq!(ownership.claim(1, 1), Some(0));
        // Now owned by frame 1
        assert_eq!(ownership.claim(1, 0), Some(1));
    }

    #[test]
    fn reclaim_by_same_frame_needs_no_wait() {
        let mut ownership = ImageOwnership::new(2);
        ownership.claim(0, 1);
        assert_eq!(ownership.claim(0, 1), None);
    }

    #[test]
    fn out_of_range_image_is_ignored() {
        let mut ownership = ImageOwnership::new(2);
        assert_eq!(ownership.claim(5, 0), None);
    }

    fn built(width: u32, height: u32) -> SwapchainState {
        let mut state = SwapchainState::new(width, height);
        assert!(state.begin_recreate(width, height));
        state.finish_recreate();
        state
    }

    #[test]
    fn fresh_state_wants_a_build() {
        let state = SwapchainState::new(1280, 720);
        assert_eq!(state.pending_recreate(), Some((1280, 720)));

        let state = built(1280, 720);
        assert!(!state.needs_recreate());
        assert_eq!(state.pending_recreate(), None);
        assert_eq!(state.acquired_image(), None);
    }

    #[test]
    fn zero_window_skips_until_restored() {
        let mut state = built(1280, 720);

        state.request_recreate(0, 0);
        assert!(state.is_minimized());
        assert_eq!(state.pending_recreate(), None);
        assert!(!state.begin_recreate(0, 0));

        state.request_recreate(1024, 768);
        assert!(!state.is_minimized());
        assert_eq!(state.pending_recreate(), Some((1024, 768)));
    }

    #[test]
    fn zero_surface_waits_for_resize() {
        let mut state = built(1280, 720);
        state.request_recreate(1280, 720);
        assert!(state.begin_recreate(1280, 720));
        state.surface_has_no_area();

        assert!(state.is_minimized());
        assert!(state.needs_recreate());
        assert_eq!(state.pending_recreate(), None);

        state.request_recreate(1280, 720);
        assert_eq!(state.pending_recreate(), Some((1280, 720)));
    }

    #[test]
    fn suboptimal_acquire_renders_then_rebuilds() {
        let mut state = built(800, 600);
        let index = state.acquired(AcquireResult::Acquired { index: 2, suboptimal: true });
        assert_eq!(index, Some(2));
        assert!(state.needs_recreate());

        state.presented(PresentResult::Presented);
        assert_eq!(state.pending_recreate(), Some((800, 600)));
    }

    #[test]
    fn out_of_date_acquire_skips_frame() {
        let mut state = built(800, 600);
        assert_eq!(state.acquired(AcquireResult::OutOfDate), None);
        assert!(state.needs_recreate());
        assert_eq!(state.acquired_image(), None);
    }

    #[test]
    fn present_result_flags_rebuild_and_releases_image() {
        let mut state = built(800, 600);
        state.acquired(AcquireResult::Acquired { index: 0, suboptimal: false });
        state.presented(PresentResult::Presented);
        assert!(!state.needs_recreate());
        assert_eq!(state.acquired_image(), None);

        state.acquired(AcquireResult::Acquired { index: 1, suboptimal: false });
        state.presented(PresentResult::OutOfDate);
        assert!(state.needs_recreate());
    }

    #[test]
    fn rebuild_forgets_image_of_old_swapchain() {
        let mut state = built(800, 600);
        state.acquired(AcquireResult::Acquired { index: 3, suboptimal: false });

        assert!(state.begin_recreate(640, 480));
        state.finish_recreate();

        assert_eq!(state.acquired_image(), None);
        assert!(!state.needs_recreate());
    }
}
