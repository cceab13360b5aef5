//! Presentation surface created from a native window.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};

use crate::error::GraphicsError;

use super::InstanceHandle;

/// Owned `VkSurfaceKHR`.
///
/// Holds the instance alive; swapchains built on it hold the surface alive.
pub struct Surface {
    instance: Arc<InstanceHandle>,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Instance extensions needed to present on the given display.
    pub fn required_extensions(
        display: RawDisplayHandle,
    ) -> Result<Vec<&'static CStr>, GraphicsError> {
        let names = ash_window::enumerate_required_extensions(display).map_err(|e| {
            GraphicsError::Configuration(format!("unsupported display for presentation: {e:?}"))
        })?;
        // SAFETY: ash-window returns pointers to static NUL-terminated names.
        Ok(names
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect())
    }

    pub fn new(
        instance: Arc<InstanceHandle>,
        window: &(impl HasWindowHandle + HasDisplayHandle),
    ) -> Result<Arc<Self>, GraphicsError> {
        let display = window
            .display_handle()
            .map_err(|e| GraphicsError::creation("surface", e))?;
        let handle = window
            .window_handle()
            .map_err(|e| GraphicsError::creation("surface", e))?;

        // SAFETY: the window outlives the surface; the app drops every
        // graphics object before the window is closed.
        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.raw(),
                display.as_raw(),
                handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GraphicsError::creation("surface", e))?;

        log::info!("Presentation surface created");
        Ok(Arc::new(Self { instance, surface }))
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool, GraphicsError> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }
        .map_err(|e| GraphicsError::Presentation(format!("surface support query: {e:?}")))
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR, GraphicsError> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .map_err(|e| GraphicsError::Presentation(format!("surface capabilities query: {e:?}")))
    }

    pub fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, GraphicsError> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .map_err(|e| GraphicsError::Presentation(format!("surface format query: {e:?}")))
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>, GraphicsError> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .map_err(|e| GraphicsError::Presentation(format!("present mode query: {e:?}")))
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance
                .surface_loader()
                .destroy_surface(self.surface, None)
        };
    }
}
