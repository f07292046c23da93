// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Logical device + one queue per role (shared when families coincide)
// - Memory allocator setup
// - Queue submission and object naming for the resource wrappers

use super::physical_device::{DeviceCandidate, QueueAssignment, QueueType};
use super::Instance;
use anyhow::{Context, Result};
use ash::{extensions::khr, vk};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

const QUEUE_TYPES: [QueueType; 4] = [
    QueueType::Graphics,
    QueueType::Compute,
    QueueType::Transfer,
    QueueType::Present,
];

/// Logical device shared by every resource created from it
pub struct Device {
    // Dropped by hand before the device is destroyed
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub swapchain_loader: khr::Swapchain,

    // Device properties (cached for performance)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub enabled_features: vk::PhysicalDeviceFeatures,
    pub name: String,

    assignment: QueueAssignment,
    queues: [vk::Queue; 4],
    // vkQueueSubmit / vkQueuePresentKHR need external synchronization
    submit_lock: Mutex<()>,

    instance: Arc<Instance>,
}

impl Device {
    /// Create the logical device for a selected physical device
    pub fn new(instance: Arc<Instance>, candidate: &DeviceCandidate) -> Result<Arc<Self>> {
        let physical_device = candidate.handle;
        let assignment = candidate
            .queues
            .assign(&candidate.queue_families)
            .context("Selected GPU lacks a required queue family")?;

        let properties = unsafe { instance.instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.instance.get_physical_device_memory_properties(physical_device) };
        let supported = unsafe { instance.instance.get_physical_device_features(physical_device) };

        let enabled_features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            fill_mode_non_solid: supported.fill_mode_non_solid,
            wide_lines: supported.wide_lines,
            ..Default::default()
        };

        let priorities: Vec<Vec<f32>> = assignment
            .requests
            .iter()
            .map(|request| vec![1.0; request.count as usize])
            .collect();

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = assignment
            .requests
            .iter()
            .zip(&priorities)
            .map(|(request, priorities)| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(request.family)
                    .queue_priorities(priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&enabled_features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let queues = QUEUE_TYPES.map(|queue_type| {
            let slot = assignment.slot(queue_type);
            unsafe { device.get_device_queue(slot.family, slot.index) }
        });

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e).context("Failed to create memory allocator");
            }
        };

        let swapchain_loader = khr::Swapchain::new(&instance.instance, &device);

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        log::info!("Selected GPU: {} ({:?})", name, properties.device_type);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        for queue_type in QUEUE_TYPES {
            let slot = assignment.slot(queue_type);
            log::info!("{:?} queue: family {} index {}", queue_type, slot.family, slot.index);
        }

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            swapchain_loader,
            properties,
            memory_properties,
            enabled_features,
            name,
            assignment,
            queues,
            submit_lock: Mutex::new(()),
            instance,
        }))
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn queue(&self, queue_type: QueueType) -> vk::Queue {
        self.queues[queue_type as usize]
    }

    pub fn queue_family(&self, queue_type: QueueType) -> u32 {
        self.assignment.slot(queue_type).family
    }

    pub fn queue_assignment(&self) -> &QueueAssignment {
        &self.assignment
    }

    /// Submit work to the queue serving `queue_type`
    pub fn submit(
        &self,
        queue_type: QueueType,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<()> {
        let _guard = self.submit_lock.lock();
        unsafe {
            self.device
                .queue_submit(self.queue(queue_type), submits, fence)
        }
        .with_context(|| format!("Failed to submit to {:?} queue", queue_type))
    }

    pub(crate) fn queue_present(
        &self,
        present_info: &vk::PresentInfoKHR,
    ) -> std::result::Result<bool, vk::Result> {
        let _guard = self.submit_lock.lock();
        unsafe {
            self.swapchain_loader
                .queue_present(self.queue(QueueType::Present), present_info)
        }
    }

    pub(crate) fn allocate(&self, desc: &AllocationCreateDesc) -> Result<Allocation> {
        let allocation = self
            .allocator
            .lock()
            .allocate(desc)
            .with_context(|| format!("Failed to allocate memory for '{}'", desc.name))?;
        Ok(allocation)
    }

    pub(crate) fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free allocation: {}", e);
        }
    }

    /// Attach a debug name to a Vulkan object. No-op without validation.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = self.instance.debug_utils() else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };

        let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(H::TYPE)
            .object_handle(handle.as_raw())
            .object_name(&name);

        if let Err(e) = unsafe {
            debug_utils.set_debug_utils_object_name(self.device.handle(), &name_info)
        } {
            log::warn!("Failed to name object {:?}: {}", name, e);
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        let _guard = self.submit_lock.lock();
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::error!("wait_idle failed while destroying device: {:#}", e);
        }

        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}
