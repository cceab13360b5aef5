//! Vulkan instance creation and configuration.

use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;

use crate::config::RuntimeConfig;
use crate::error::GraphicsError;

use super::debug::DebugMessenger;

/// Vulkan 1.2 is enough for render passes and everything the compute path
/// needs, and is what MoltenVK exposes.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

/// Validation layer name.
pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Owned Vulkan instance.
///
/// Shared through `Arc`: every [`DeviceHandle`](super::DeviceHandle) and
/// [`Surface`](super::Surface) keeps the instance alive, so it is destroyed
/// only after both.
pub struct InstanceHandle {
    entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    debug: Option<DebugMessenger>,
}

impl InstanceHandle {
    /// Load the Vulkan entry points and create an instance.
    ///
    /// Fails with [`GraphicsError::Configuration`] before any device object
    /// exists if the loader, a required extension, or (when requested) the
    /// validation layer is missing.
    pub fn new(
        config: &RuntimeConfig,
        required_extensions: &[&CStr],
    ) -> Result<Arc<Self>, GraphicsError> {
        // SAFETY: loading the system Vulkan library has no preconditions
        // beyond the library itself being well-formed.
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GraphicsError::Configuration(format!("Vulkan loader not found: {e}")))?;

        let mut extensions: Vec<&CStr> = required_extensions.to_vec();
        if config.validation {
            extensions.push(ash::ext::debug_utils::NAME);
        }
        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_enumeration::NAME);
        }

        let available_extensions =
            unsafe { entry.enumerate_instance_extension_properties(None) }.map_err(|e| {
                GraphicsError::Configuration(format!("Failed to enumerate extensions: {e:?}"))
            })?;
        let available: Vec<&CStr> = available_extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();
        let missing = missing_names(&extensions, &available);
        if !missing.is_empty() {
            return Err(GraphicsError::Configuration(format!(
                "missing instance extensions: {}",
                missing.join(", ")
            )));
        }

        let layers: Vec<&CStr> = if config.validation {
            let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(|e| {
                    GraphicsError::Configuration(format!("Failed to enumerate layers: {e:?}"))
                })?;
            let available: Vec<&CStr> = available_layers
                .iter()
                .filter_map(|layer| layer.layer_name_as_c_str().ok())
                .collect();
            if !missing_names(&[VALIDATION_LAYER_NAME], &available).is_empty() {
                return Err(GraphicsError::Configuration(format!(
                    "validation requested but {} is not installed",
                    VALIDATION_LAYER_NAME.to_string_lossy()
                )));
            }
            vec![VALIDATION_LAYER_NAME]
        } else {
            Vec::new()
        };

        let app_name = CString::new(config.application_name.as_str()).map_err(|_| {
            GraphicsError::Configuration("application name contains a NUL byte".into())
        })?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"VKNgine")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(REQUIRED_API_VERSION);

        let extension_ptrs: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|name| name.as_ptr()).collect();
        let layer_ptrs: Vec<*const std::ffi::c_char> =
            layers.iter().map(|name| name.as_ptr()).collect();

        #[allow(unused_mut)]
        let mut create_flags = vk::InstanceCreateFlags::empty();
        #[cfg(target_os = "macos")]
        {
            create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let create_info = vk::InstanceCreateInfo::default()
            .flags(create_flags)
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| GraphicsError::creation("Vulkan instance", e))?;

        let debug = if config.validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        log::info!(
            "Vulkan instance created (validation: {}, extensions: {})",
            config.validation,
            extensions.len()
        );

        Ok(Arc::new(Self {
            entry,
            instance,
            surface_loader,
            debug,
        }))
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        if let Some(debug) = self.debug.take() {
            debug.destroy();
        }
        unsafe { self.instance.destroy_instance(None) };
        log::debug!("Vulkan instance destroyed");
    }
}

/// Names from `required` that are absent from `available`.
fn missing_names(required: &[&CStr], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}
