//! Buffer and image creation with bound device memory.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use crate::error::GraphicsError;
use crate::resources::{GpuBuffer, GpuImage, Sampler};
use crate::vulkan::{aspect_mask, DeviceHandle};

/// Common property sets.
pub mod memory {
    use ash::vk::MemoryPropertyFlags as F;

    pub const DEVICE_LOCAL: F = F::DEVICE_LOCAL;
    /// Mapped memory for staging uploads and readback. Every device offers it.
    pub const HOST_VISIBLE: F = F::from_raw(F::HOST_VISIBLE.as_raw() | F::HOST_COHERENT.as_raw());
    /// Mapped memory with cached host reads, where the device offers it.
    pub const HOST_CACHED: F = F::from_raw(F::HOST_VISIBLE.as_raw() | F::HOST_CACHED.as_raw());
}

/// Allocator location serving the requested memory properties.
pub fn memory_location(properties: vk::MemoryPropertyFlags) -> MemoryLocation {
    if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        if properties.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
            MemoryLocation::GpuToCpu
        } else {
            MemoryLocation::CpuToGpu
        }
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Fail unless memory placed by the allocator carries every `required` flag.
///
/// The memory type query before allocation only proves that a matching type
/// exists; the allocator may still fall back to another type of the same
/// location.
pub fn check_placement(
    type_mask: u32,
    placed: vk::MemoryPropertyFlags,
    required: vk::MemoryPropertyFlags,
) -> Result<(), GraphicsError> {
    if placed.contains(required) {
        Ok(())
    } else {
        log::warn!("Allocation landed in {placed:?}, {required:?} was requested");
        Err(GraphicsError::NoMatchingMemoryType {
            type_mask,
            required,
        })
    }
}

/// Creates buffers and images with memory bound exactly once.
///
/// Any failure is returned as [`GraphicsError::ResourceCreation`] or
/// [`GraphicsError::NoMatchingMemoryType`]; whatever was created before the
/// failing step is released before returning.
#[derive(Clone)]
pub struct ResourceAllocator {
    device: Arc<DeviceHandle>,
}

impl ResourceAllocator {
    pub fn new(device: Arc<DeviceHandle>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<DeviceHandle> {
        &self.device
    }

    pub fn create_buffer(
        &self,
        label: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::creation(label, "zero-sized buffer"));
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = self.device.raw();
        let buffer = unsafe { raw.create_buffer(&create_info, None) }
            .map_err(|e| GraphicsError::creation(label, e))?;

        // Dropping the partially built buffer releases whatever exists so far.
        let mut gpu_buffer = GpuBuffer {
            device: Arc::clone(&self.device),
            buffer,
            allocation: None,
            size,
            usage,
            properties,
            label: label.to_string(),
        };

        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
        let memory_type = self
            .device
            .query_memory_type(requirements.memory_type_bits, properties)?;

        let allocation = self
            .device
            .allocator()
            .lock()
            .allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location: memory_location(properties),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GraphicsError::creation(label, e))?;

        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());
        let placed = allocation.memory_properties();
        gpu_buffer.allocation = Some(allocation);
        check_placement(requirements.memory_type_bits, placed, properties)?;

        unsafe { raw.bind_buffer_memory(buffer, memory, offset) }
            .map_err(|e| GraphicsError::creation(label, e))?;

        log::debug!(
            "Created buffer '{}' ({} bytes, {:?}, {:?}, first matching type {})",
            label,
            size,
            usage,
            properties,
            memory_type
        );
        Ok(gpu_buffer)
    }

    /// Create a single-mip 2D image in `UNDEFINED` layout, with a view over
    /// its full color or depth aspect.
    pub fn create_image(
        &self,
        label: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuImage, GraphicsError> {
        if extent.width == 0 || extent.height == 0 {
            return Err(GraphicsError::creation(
                label,
                format!("zero-area image {}x{}", extent.width, extent.height),
            ));
        }

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = self.device.raw();
        let image = unsafe { raw.create_image(&create_info, None) }
            .map_err(|e| GraphicsError::creation(label, e))?;

        let mut gpu_image = GpuImage {
            device: Arc::clone(&self.device),
            image,
            view: vk::ImageView::null(),
            allocation: None,
            extent,
            format,
            usage,
            label: label.to_string(),
        };

        let requirements = unsafe { raw.get_image_memory_requirements(image) };
        let memory_type = self
            .device
            .query_memory_type(requirements.memory_type_bits, properties)?;

        let allocation = self
            .device
            .allocator()
            .lock()
            .allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location: memory_location(properties),
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GraphicsError::creation(label, e))?;

        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());
        let placed = allocation.memory_properties();
        gpu_image.allocation = Some(allocation);
        check_placement(requirements.memory_type_bits, placed, properties)?;

        unsafe { raw.bind_image_memory(image, memory, offset) }
            .map_err(|e| GraphicsError::creation(label, e))?;

        gpu_image.view = create_image_view(raw, image, format)
            .map_err(|e| GraphicsError::creation(format!("{label} view"), e))?;

        log::debug!(
            "Created image '{}' ({}x{}, {:?}, first matching type {})",
            label,
            extent.width,
            extent.height,
            format,
            memory_type
        );
        Ok(gpu_image)
    }

    pub fn create_sampler(&self) -> Result<Sampler, GraphicsError> {
        Sampler::linear_repeat(Arc::clone(&self.device))
    }
}

pub(crate) fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, vk::Result> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect_mask(format),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    unsafe { device.create_image_view(&view_info, None) }
}
