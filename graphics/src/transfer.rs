//! One-shot command execution for copies and layout transitions.
//!
//! Every call records a sequence, submits it, and blocks until the queue is
//! idle and the engine's completion fence has signaled. When a call returns,
//! every resource the sequence touched may be reused or dropped.

use std::sync::Arc;

use ash::vk;
use vkngine_core::ImageData;

use crate::allocator::{memory, ResourceAllocator};
use crate::config::RuntimeConfig;
use crate::error::GraphicsError;
use crate::resources::{GpuBuffer, GpuImage};
use crate::vulkan::{
    aspect_mask, transition_barrier, CommandPool, CommandSequence, DeviceHandle, Fence,
    SubmitSync,
};

/// Engine state across one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Recording,
    Submitted,
    Complete,
}

impl TransferState {
    /// The only successor of each state.
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::Recording,
            Self::Recording => Self::Submitted,
            Self::Submitted => Self::Complete,
            Self::Complete => Self::Idle,
        }
    }
}

pub struct TransferEngine {
    allocator: ResourceAllocator,
    pool: CommandPool,
    fence: Fence,
    fence_timeout_ns: u64,
    state: TransferState,
    submissions: u64,
}

impl TransferEngine {
    pub fn new(allocator: ResourceAllocator, config: &RuntimeConfig) -> Result<Self, GraphicsError> {
        let device = Arc::clone(allocator.device());
        let pool = CommandPool::new(Arc::clone(&device), device.transfer_queue(), true)?;
        let fence = Fence::new(device, false)?;
        Ok(Self {
            allocator,
            pool,
            fence,
            fence_timeout_ns: config.fence_timeout_ns(),
            state: TransferState::Idle,
            submissions: 0,
        })
    }

    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    pub fn device(&self) -> &Arc<DeviceHandle> {
        self.allocator.device()
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Number of queue submissions made so far.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    fn advance(&mut self, from: TransferState) -> Result<(), GraphicsError> {
        if self.state != from {
            return Err(GraphicsError::Submission(format!(
                "transfer engine is {:?}, expected {:?}",
                self.state, from
            )));
        }
        self.state = from.next();
        Ok(())
    }

    /// Record with `record`, submit, and block until complete.
    ///
    /// On failure the engine is returned to [`TransferState::Idle`] so the
    /// next call can proceed.
    pub fn execute_one_shot<F>(&mut self, label: &str, record: F) -> Result<(), GraphicsError>
    where
        F: FnOnce(&CommandSequence) -> Result<(), GraphicsError>,
    {
        self.advance(TransferState::Idle)?;
        let result = self.record_and_submit(label, record);
        self.settle(result)
    }

    fn record_and_submit<F>(&mut self, label: &str, record: F) -> Result<(), GraphicsError>
    where
        F: FnOnce(&CommandSequence) -> Result<(), GraphicsError>,
    {
        let mut sequence = self.pool.begin(label, true)?;
        record(&sequence)?;
        sequence.finish()?;
        self.advance(TransferState::Recording)?;
        self.submit_blocking(&mut sequence)?;
        self.advance(TransferState::Submitted)?;
        self.advance(TransferState::Complete)
    }

    /// Submit a sequence recorded elsewhere under the same one-in-flight
    /// policy and the same reusable fence as [`Self::execute_one_shot`].
    pub fn submit_and_wait(&mut self, sequence: &mut CommandSequence) -> Result<(), GraphicsError> {
        self.advance(TransferState::Idle)?;
        let result = self.advance(TransferState::Recording).and_then(|()| {
            self.submit_blocking(sequence)?;
            self.advance(TransferState::Submitted)?;
            self.advance(TransferState::Complete)
        });
        self.settle(result)
    }

    /// Return to idle after a failed call. A submission that got as far as
    /// the queue may still hold the fence, so drain the queue and reset it.
    fn settle(&mut self, result: Result<(), GraphicsError>) -> Result<(), GraphicsError> {
        let Err(error) = result else {
            return Ok(());
        };
        if self.state == TransferState::Submitted {
            let queue = self.pool.queue().queue;
            let drained = self
                .device()
                .queue_wait_idle(queue)
                .and_then(|()| self.fence.reset());
            if let Err(e) = drained {
                log::warn!("Could not recover transfer fence: {e}");
            }
        }
        log::debug!("Transfer failed in {:?}, back to idle: {error}", self.state);
        self.state = TransferState::Idle;
        Err(error)
    }

    /// Submit guarded by the engine's fence, drain the queue, wait on the
    /// fence and reset it for the next submission.
    fn submit_blocking(&mut self, sequence: &mut CommandSequence) -> Result<(), GraphicsError> {
        sequence.submit(&SubmitSync::fence(&self.fence))?;
        self.submissions += 1;

        self.device().queue_wait_idle(sequence.queue().queue)?;
        self.fence.wait(self.fence_timeout_ns)?;
        self.fence.reset()?;
        sequence.mark_complete()?;
        log::trace!("'{}' complete", sequence.label());
        Ok(())
    }

    /// Copy `size` bytes from the start of `src` to the start of `dst`.
    /// A zero size neither submits nor blocks.
    pub fn copy_buffer(
        &mut self,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: vk::DeviceSize,
    ) -> Result<(), GraphicsError> {
        if size == 0 {
            return Ok(());
        }
        if size > src.size() || size > dst.size() {
            return Err(GraphicsError::Recording(format!(
                "copy of {size} bytes from '{}' ({}) to '{}' ({}) is out of bounds",
                src.label(),
                src.size(),
                dst.label(),
                dst.size()
            )));
        }

        self.execute_one_shot("copy buffer", |sequence| {
            let region = vk::BufferCopy::default().size(size);
            unsafe {
                sequence
                    .device()
                    .cmd_copy_buffer(sequence.raw(), src.raw(), dst.raw(), &[region])
            };
            Ok(())
        })
    }

    /// Copy tightly packed texels from `src` into `dst`, which must already
    /// be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &mut self,
        src: &GpuBuffer,
        dst: &GpuImage,
    ) -> Result<(), GraphicsError> {
        let extent = dst.extent();
        self.execute_one_shot("copy buffer to image", |sequence| {
            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D::default())
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            unsafe {
                sequence.device().cmd_copy_buffer_to_image(
                    sequence.raw(),
                    src.raw(),
                    dst.raw(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                )
            };
            Ok(())
        })
    }

    /// Transition `image` from `old` to `new`.
    ///
    /// The barrier is looked up before anything is recorded, so an
    /// unsupported pair returns [`GraphicsError::UnsupportedTransition`]
    /// without touching the queue.
    pub fn transition_layout(
        &mut self,
        image: &GpuImage,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<(), GraphicsError> {
        let barrier = transition_barrier(old, new)?;
        let aspect = aspect_mask(image.format());

        self.execute_one_shot("layout transition", |sequence| {
            let image_barrier = vk::ImageMemoryBarrier::default()
                .old_layout(old)
                .new_layout(new)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.raw())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .src_access_mask(barrier.src_access)
                .dst_access_mask(barrier.dst_access);
            unsafe {
                sequence.device().cmd_pipeline_barrier(
                    sequence.raw(),
                    barrier.src_stage,
                    barrier.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[image_barrier],
                )
            };
            Ok(())
        })
    }

    /// Create a host-visible staging buffer holding `data`, flushed and
    /// ready to be read by the device.
    pub fn stage<T: bytemuck::Pod>(&self, data: &[T]) -> Result<GpuBuffer, GraphicsError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut staging = self.allocator.create_buffer(
            "staging",
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            memory::HOST_VISIBLE,
        )?;
        {
            let mut mapping = staging.map()?;
            mapping.write(0, bytes)?;
            mapping.flush()?;
        }
        Ok(staging)
    }

    /// Upload `data` into the device-local `dst` through a staging buffer
    /// that is dropped as soon as the copy completes.
    pub fn upload_to_buffer<T: bytemuck::Pod>(
        &mut self,
        data: &[T],
        dst: &GpuBuffer,
    ) -> Result<(), GraphicsError> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        if size == 0 {
            return Ok(());
        }
        let staging = self.stage(data)?;
        self.copy_buffer(&staging, dst, size)
    }

    /// Upload RGBA8 pixels into `dst` and leave it readable by fragment
    /// shaders.
    pub fn upload_to_image(&mut self, image: &ImageData, dst: &GpuImage) -> Result<(), GraphicsError> {
        let extent = dst.extent();
        if extent.width != image.width || extent.height != image.height {
            return Err(GraphicsError::Recording(format!(
                "image {}x{} does not match '{}' ({}x{})",
                image.width,
                image.height,
                dst.label(),
                extent.width,
                extent.height
            )));
        }

        let staging = self.stage(&image.pixels)?;
        self.transition_layout(
            dst,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        self.copy_buffer_to_image(&staging, dst)?;
        drop(staging);
        self.transition_layout(
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    }
}
