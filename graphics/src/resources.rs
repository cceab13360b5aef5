//! Owned GPU buffers, images and samplers.
//!
//! Each resource holds an `Arc<DeviceHandle>` and releases its handle and
//! memory on drop, so the device cannot be destroyed before it.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use crate::error::{GraphicsError, HostSyncOp};
use crate::vulkan::DeviceHandle;

/// Device memory bound to a buffer handle.
pub struct GpuBuffer {
    pub(crate) device: Arc<DeviceHandle>,
    pub(crate) buffer: vk::Buffer,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) size: vk::DeviceSize,
    pub(crate) usage: vk::BufferUsageFlags,
    pub(crate) properties: vk::MemoryPropertyFlags,
    pub(crate) label: String,
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .field("properties", &self.properties)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl GpuBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    /// Flags of the memory type the allocator actually placed the buffer in.
    pub fn placed_properties(&self) -> vk::MemoryPropertyFlags {
        self.allocation
            .as_ref()
            .map(|allocation| allocation.memory_properties())
            .unwrap_or_default()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_host_visible(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Scoped host access to the buffer's memory.
    ///
    /// The mapping borrows the buffer mutably, so it cannot outlive it and
    /// the buffer cannot be handed to a submission while mapped. Dropping
    /// the mapping ends host access.
    pub fn map(&mut self) -> Result<HostMapping<'_>, GraphicsError> {
        if !self.is_host_visible() {
            return Err(GraphicsError::NotHostVisible(self.label.clone()));
        }
        let len = self.size as usize;
        let allocation = self
            .allocation
            .as_mut()
            .ok_or_else(|| GraphicsError::NotHostVisible(self.label.clone()))?;
        let memory = unsafe { allocation.memory() };
        let offset = allocation.offset();
        let bytes = allocation
            .mapped_slice_mut()
            .ok_or_else(|| GraphicsError::NotHostVisible(self.label.clone()))?;
        let len = len.min(bytes.len());

        Ok(HostMapping {
            device: &self.device,
            label: &self.label,
            memory,
            offset,
            bytes: &mut bytes[..len],
        })
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().lock().free(allocation) {
                log::error!("Failed to free memory of '{}': {}", self.label, e);
            }
        }
    }
}

/// Host view of a mapped buffer.
pub struct HostMapping<'a> {
    device: &'a DeviceHandle,
    label: &'a str,
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    bytes: &'a mut [u8],
}

impl HostMapping<'_> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Copy `data` into the mapping at byte `offset`.
    pub fn write<T: bytemuck::Pod>(&mut self, offset: usize, data: &[T]) -> Result<(), GraphicsError> {
        let src: &[u8] = bytemuck::cast_slice(data);
        let dst = self.range_mut(offset, src.len())?;
        dst.copy_from_slice(src);
        Ok(())
    }

    /// Fill `out` from the mapping starting at byte `offset`.
    pub fn read<T: bytemuck::Pod>(&self, offset: usize, out: &mut [T]) -> Result<(), GraphicsError> {
        let dst: &mut [u8] = bytemuck::cast_slice_mut(out);
        let end = offset
            .checked_add(dst.len())
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| self.out_of_bounds(offset, dst.len()))?;
        dst.copy_from_slice(&self.bytes[offset..end]);
        Ok(())
    }

    /// Make host writes visible to the device. Must precede the submission
    /// that reads them.
    pub fn flush(&self) -> Result<(), GraphicsError> {
        let range = self.whole_range();
        unsafe { self.device.raw().flush_mapped_memory_ranges(&[range]) }
            .map_err(|e| GraphicsError::host_sync(self.label, HostSyncOp::Flush, e))
    }

    /// Make device writes visible to the host. Must follow the wait on the
    /// submission that wrote them.
    pub fn invalidate(&self) -> Result<(), GraphicsError> {
        let range = self.whole_range();
        unsafe { self.device.raw().invalidate_mapped_memory_ranges(&[range]) }
            .map_err(|e| GraphicsError::host_sync(self.label, HostSyncOp::Invalidate, e))
    }

    fn whole_range(&self) -> vk::MappedMemoryRange<'static> {
        let atom = self.device.limits().non_coherent_atom_size;
        vk::MappedMemoryRange::default()
            .memory(self.memory)
            .offset(align_down(self.offset, atom))
            .size(vk::WHOLE_SIZE)
    }

    fn range_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], GraphicsError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(&mut self.bytes[offset..end]),
            _ => Err(self.out_of_bounds(offset, len)),
        }
    }

    fn out_of_bounds(&self, offset: usize, len: usize) -> GraphicsError {
        GraphicsError::creation(
            format!("host access to '{}'", self.label),
            format!("{len} bytes at {offset} exceed {} mapped bytes", self.bytes.len()),
        )
    }
}

/// Round `value` down to a multiple of `atom`.
pub(crate) fn align_down(value: vk::DeviceSize, atom: vk::DeviceSize) -> vk::DeviceSize {
    if atom <= 1 {
        value
    } else {
        value - value % atom
    }
}

/// Device memory bound to an image, plus its default view.
pub struct GpuImage {
    pub(crate) device: Arc<DeviceHandle>,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) extent: vk::Extent2D,
    pub(crate) format: vk::Format,
    pub(crate) usage: vk::ImageUsageFlags,
    pub(crate) label: String,
}

impl GpuImage {
    pub fn raw(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.raw().destroy_image_view(self.view, None);
            }
            self.device.raw().destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().lock().free(allocation) {
                log::error!("Failed to free memory of '{}': {}", self.label, e);
            }
        }
    }
}

/// Owned texture sampler.
pub struct Sampler {
    device: Arc<DeviceHandle>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear filtering, repeat addressing, maximum supported anisotropy.
    pub fn linear_repeat(device: Arc<DeviceHandle>) -> Result<Self, GraphicsError> {
        let max_anisotropy = device.limits().max_sampler_anisotropy;
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy.max(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

        let sampler = unsafe { device.raw().create_sampler(&create_info, None) }
            .map_err(|e| GraphicsError::creation("sampler", e))?;
        Ok(Self { device, sampler })
    }

    pub fn raw(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_sampler(self.sampler, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(0, 64), 0);
        assert_eq!(align_down(63, 64), 0);
        assert_eq!(align_down(64, 64), 64);
        assert_eq!(align_down(200, 64), 192);
        assert_eq!(align_down(200, 1), 200);
        assert_eq!(align_down(200, 0), 200);
    }
}
