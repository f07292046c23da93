// Vulkan Instance - entry point into the driver
//
// Responsibilities:
// - Load the Vulkan library
// - Enable the surface extensions the windowing system needs
// - Validation layers + debug messenger (optional)

use anyhow::{Context, Result};
use ash::{extensions::ext::DebugUtils, vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with automatic cleanup
pub struct Instance {
    pub instance: ash::Instance,
    pub entry: Entry,
    debug_utils: Option<DebugUtils>,
    debug_messenger: vk::DebugUtilsMessengerEXT,
}

impl Instance {
    /// Create an instance able to present to windows of `display_handle`'s kind.
    ///
    /// `layers` are only enabled if every one of them is available; otherwise
    /// the instance is created without layers.
    pub fn new(
        app_name: &str,
        layers: &[&CStr],
        display_handle: RawDisplayHandle,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let enable_validation = if layers.is_empty() {
            false
        } else if check_validation_layer_support(&entry, layers)? {
            true
        } else {
            log::warn!("Requested layers unavailable, continuing without validation");
            false
        };

        let extensions = required_extensions(display_handle, enable_validation)?;

        let app_name_cstr = CString::new(app_name)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&app_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let layer_names: Vec<*const c_char> = if enable_validation {
            layers.iter().map(|layer| layer.as_ptr()).collect()
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = match create_debug_messenger(&debug_utils) {
                Ok(messenger) => messenger,
                Err(e) => {
                    log::error!("Failed to create Vulkan debug messenger: {:#}", e);
                    vk::DebugUtilsMessengerEXT::null()
                }
            };
            (Some(debug_utils), messenger)
        } else {
            (None, vk::DebugUtilsMessengerEXT::null())
        };

        Ok(Arc::new(Self {
            instance,
            entry,
            debug_utils,
            debug_messenger,
        }))
    }

    /// Debug utils loader, present only when validation is enabled
    pub fn debug_utils(&self) -> Option<&DebugUtils> {
        self.debug_utils.as_ref()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some(debug_utils) = &self.debug_utils {
                if self.debug_messenger != vk::DebugUtilsMessengerEXT::null() {
                    debug_utils.destroy_debug_utils_messenger(self.debug_messenger, None);
                }
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// True if every layer in `layers` is available on this system
pub fn check_validation_layer_support(entry: &Entry, layers: &[&CStr]) -> Result<bool> {
    let properties = entry.enumerate_instance_layer_properties()?;
    let available: Vec<&CStr> = properties
        .iter()
        .map(|p| unsafe { CStr::from_ptr(p.layer_name.as_ptr()) })
        .collect();

    match missing_layer(layers, &available) {
        Some(layer) => {
            log::error!("Validation Layer not available: {}", layer.to_string_lossy());
            Ok(false)
        }
        None => Ok(true),
    }
}

/// First requested layer absent from `available`
pub fn missing_layer<'a>(requested: &[&'a CStr], available: &[&CStr]) -> Option<&'a CStr> {
    requested
        .iter()
        .copied()
        .find(|layer| !available.contains(layer))
}

fn required_extensions(
    display_handle: RawDisplayHandle,
    enable_validation: bool,
) -> Result<Vec<*const c_char>> {
    let mut extensions = ash_window::enumerate_required_extensions(display_handle)
        .context("Failed to query surface extensions for this display")?
        .to_vec();

    if enable_validation {
        extensions.push(DebugUtils::name().as_ptr());
    }

    Ok(extensions)
}

fn create_debug_messenger(debug_utils: &DebugUtils) -> Result<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;
    Ok(messenger)
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_layers_present() {
        let available = [VALIDATION_LAYER, c"VK_LAYER_LUNARG_monitor"];
        assert_eq!(missing_layer(&[VALIDATION_LAYER], &available), None);
    }

    #[test]
    fn reports_first_missing_layer() {
        let available = [c"VK_LAYER_LUNARG_monitor"];
        let requested = [VALIDATION_LAYER, c"VK_LAYER_LUNARG_api_dump"];
        assert_eq!(missing_layer(&requested, &available), Some(VALIDATION_LAYER));
    }

    #[test]
    fn nothing_requested_nothing_missing() {
        assert_eq!(missing_layer(&[], &[]), None);
    }
}
