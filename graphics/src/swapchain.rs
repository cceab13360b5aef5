//! Swap surface: presentable images and their views.
//!
//! A [`SwapSurfaceState`] is created whole and destroyed whole. Anything
//! sized to it (depth image, framebuffers, recorded draws) lives next to it
//! in the renderer's frame resources and is replaced together with it.

use std::sync::Arc;

use ash::vk;

use crate::allocator::create_image_view;
use crate::error::GraphicsError;
use crate::presentation::{AcquireOutcome, PresentOutcome};
use crate::vulkan::{DeviceHandle, Semaphore, Surface};

/// Preferred surface format, falling back to whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox when offered, otherwise FIFO (always available).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the window size clamped to the surface
/// limits when the surface leaves it to the swapchain.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: window.0.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window.1.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, bounded by the maximum (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

pub fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// The extent a swap surface would get, or `None` when either the window or
/// the surface currently has no area. Surfaces of minimized windows report
/// 0x0 even before the window itself does.
pub fn drawable_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window: (u32, u32),
) -> Option<vk::Extent2D> {
    if window.0 == 0 || window.1 == 0 {
        return None;
    }
    let extent = choose_extent(capabilities, window);
    (!is_zero_area(extent)).then_some(extent)
}

pub struct SwapSurfaceState {
    device: Arc<DeviceHandle>,
    surface: Arc<Surface>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl SwapSurfaceState {
    /// Build a swapchain sized to the surface's current extent.
    ///
    /// Fails with `Presentation` when the surface has no area.
    pub fn new(
        device: Arc<DeviceHandle>,
        surface: Arc<Surface>,
        window: (u32, u32),
    ) -> Result<Self, GraphicsError> {
        let physical = device.physical_device();
        let capabilities = surface.capabilities(physical)?;
        let format = choose_surface_format(&surface.formats(physical)?)
            .ok_or_else(|| GraphicsError::Presentation("surface reports no formats".into()))?;
        let present_mode = choose_present_mode(&surface.present_modes(physical)?);
        let extent = choose_extent(&capabilities, window);
        if is_zero_area(extent) {
            return Err(GraphicsError::Presentation(
                "cannot build a swap surface with zero area".into(),
            ));
        }

        let graphics = device
            .graphics_queue()
            .ok_or_else(|| GraphicsError::Configuration("no graphics queue".into()))?;
        let present = device
            .present_queue()
            .ok_or_else(|| GraphicsError::Configuration("no present queue".into()))?;
        let families = [graphics.family, present.family];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.raw())
            .min_image_count(choose_image_count(&capabilities))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        create_info = if graphics.family != present.family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let loader = device.swapchain_loader()?;
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| GraphicsError::creation("swapchain", e))?;

        // From here Drop releases whatever has been created.
        let mut state = Self {
            device: Arc::clone(&device),
            surface,
            swapchain,
            images: Vec::new(),
            views: Vec::new(),
            format: format.format,
            extent,
        };

        state.images = unsafe { loader.get_swapchain_images(swapchain) }
            .map_err(|e| GraphicsError::creation("swapchain images", e))?;
        for &image in &state.images {
            let view = create_image_view(device.raw(), image, format.format)
                .map_err(|e| GraphicsError::creation("swapchain image view", e))?;
            state.views.push(view);
        }

        log::info!(
            "Swap surface built: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            state.images.len(),
            format.format,
            present_mode
        );
        Ok(state)
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// Request the next presentable image; `image_available` signals when the
    /// presentation engine is done reading it.
    pub fn acquire(
        &self,
        image_available: &Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome, GraphicsError> {
        let loader = self.device.swapchain_loader()?;
        let result = unsafe {
            loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                image_available.raw(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(
                GraphicsError::WaitFailed(format!("no swap image within {timeout_ns} ns")),
            ),
            Err(e) => Err(GraphicsError::Presentation(format!("acquire: {e:?}"))),
        }
    }

    /// Queue `image_index` for presentation after `render_finished` signals.
    pub fn present(
        &self,
        render_finished: &Semaphore,
        image_index: u32,
    ) -> Result<PresentOutcome, GraphicsError> {
        let loader = self.device.swapchain_loader()?;
        let queue = self
            .device
            .present_queue()
            .ok_or_else(|| GraphicsError::Configuration("no present queue".into()))?;

        let wait = [render_finished.raw()];
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { loader.queue_present(queue.queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(GraphicsError::Presentation(format!("present: {e:?}"))),
        }
    }
}

impl Drop for SwapSurfaceState {
    fn drop(&mut self) {
        let device = self.device.raw();
        for view in self.views.drain(..) {
            unsafe { device.destroy_image_view(view, None) };
        }
        if let Ok(loader) = self.device.swapchain_loader() {
            unsafe { loader.destroy_swapchain(self.swapchain, None) };
        }
    }
}
