//! Command pools and command sequences.

use std::sync::Arc;

use ash::vk;

use crate::error::GraphicsError;

use super::{DeviceHandle, QueueSlot, SubmitSync};

/// Lifecycle of a [`CommandSequence`].
///
/// `Complete` may go back to `Submitted` for sequences recorded once and
/// submitted every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    Recording,
    Recorded,
    Submitted,
    Complete,
}

impl SequenceState {
    pub fn finish(self) -> Result<Self, GraphicsError> {
        match self {
            Self::Recording => Ok(Self::Recorded),
            other => Err(GraphicsError::Recording(format!(
                "cannot finish a sequence in state {other:?}"
            ))),
        }
    }

    pub fn submit(self) -> Result<Self, GraphicsError> {
        match self {
            Self::Recorded | Self::Complete => Ok(Self::Submitted),
            other => Err(GraphicsError::Submission(format!(
                "cannot submit a sequence in state {other:?}"
            ))),
        }
    }

    pub fn complete(self) -> Result<Self, GraphicsError> {
        match self {
            Self::Submitted => Ok(Self::Complete),
            other => Err(GraphicsError::WaitFailed(format!(
                "sequence in state {other:?} has nothing to complete"
            ))),
        }
    }

    /// Back to `Recording`; never while the device may still read it.
    pub fn reset(self) -> Result<Self, GraphicsError> {
        match self {
            Self::Recorded | Self::Complete => Ok(Self::Recording),
            other => Err(GraphicsError::Recording(format!(
                "cannot reset a sequence in state {other:?}"
            ))),
        }
    }
}

struct PoolShared {
    device: Arc<DeviceHandle>,
    pool: vk::CommandPool,
    queue: QueueSlot,
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_command_pool(self.pool, None) };
    }
}

/// Command pool bound to one queue family.
///
/// Sequences allocated from the pool keep it alive, so a pool can never be
/// destroyed while one of its command buffers exists.
#[derive(Clone)]
pub struct CommandPool {
    shared: Arc<PoolShared>,
}

impl CommandPool {
    pub fn new(
        device: Arc<DeviceHandle>,
        queue: QueueSlot,
        transient: bool,
    ) -> Result<Self, GraphicsError> {
        let mut flags = vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        if transient {
            flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        }
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family)
            .flags(flags);

        let pool = unsafe { device.raw().create_command_pool(&pool_info, None) }
            .map_err(|e| GraphicsError::creation("command pool", e))?;

        Ok(Self {
            shared: Arc::new(PoolShared {
                device,
                pool,
                queue,
            }),
        })
    }

    pub fn device(&self) -> &Arc<DeviceHandle> {
        &self.shared.device
    }

    pub fn queue(&self) -> QueueSlot {
        self.shared.queue
    }

    /// Allocate a primary command buffer and begin recording into it.
    pub fn begin(&self, label: &str, one_time: bool) -> Result<CommandSequence, GraphicsError> {
        let device = self.shared.device.raw();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.shared.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| GraphicsError::Recording(format!("allocate '{label}': {e:?}")))?
            .into_iter()
            .next()
            .ok_or_else(|| GraphicsError::Recording(format!("allocate '{label}': empty")))?;

        // From here the sequence owns the buffer and frees it on any error.
        let sequence = CommandSequence {
            pool: Arc::clone(&self.shared),
            buffer,
            state: SequenceState::Recording,
            label: label.to_string(),
        };

        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { device.begin_command_buffer(buffer, &begin_info) }
            .map_err(|e| GraphicsError::Recording(format!("begin '{label}': {e:?}")))?;

        Ok(sequence)
    }
}

/// A recorded list of device operations submitted as a unit.
///
/// The command buffer is returned to its pool on drop. Dropping a sequence
/// that is still in flight first waits for its queue to drain.
pub struct CommandSequence {
    pool: Arc<PoolShared>,
    buffer: vk::CommandBuffer,
    state: SequenceState,
    label: String,
}

impl CommandSequence {
    pub fn raw(&self) -> vk::CommandBuffer {
        self.buffer
    }

    pub fn device(&self) -> &ash::Device {
        self.pool.device.raw()
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue this sequence is submitted to.
    pub fn queue(&self) -> QueueSlot {
        self.pool.queue
    }

    /// Fail unless the sequence is still accepting commands.
    pub fn ensure_recording(&self) -> Result<(), GraphicsError> {
        match self.state {
            SequenceState::Recording => Ok(()),
            other => Err(GraphicsError::Recording(format!(
                "'{}' is {other:?}, not recording",
                self.label
            ))),
        }
    }

    pub fn finish(&mut self) -> Result<(), GraphicsError> {
        let next = self.state.finish()?;
        unsafe { self.device().end_command_buffer(self.buffer) }
            .map_err(|e| GraphicsError::Recording(format!("end '{}': {e:?}", self.label)))?;
        self.state = next;
        Ok(())
    }

    pub fn submit(&mut self, sync: &SubmitSync<'_>) -> Result<(), GraphicsError> {
        let next = self.state.submit()?;

        let wait_semaphores: Vec<vk::Semaphore> = sync.wait.iter().map(|(s, _)| s.raw()).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            sync.wait.iter().map(|(_, stage)| *stage).collect();
        let signal_semaphores: Vec<vk::Semaphore> = sync.signal.iter().map(|s| s.raw()).collect();
        let command_buffers = [self.buffer];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let fence = sync.fence.map_or(vk::Fence::null(), |f| f.raw());
        unsafe {
            self.device()
                .queue_submit(self.pool.queue.queue, &[submit_info], fence)
        }
        .map_err(|e| GraphicsError::Submission(format!("'{}': {e:?}", self.label)))?;

        log::trace!("Submitted '{}'", self.label);
        self.state = next;
        Ok(())
    }

    /// Record that the marker guarding the last submission has signaled.
    pub fn mark_complete(&mut self) -> Result<(), GraphicsError> {
        self.state = self.state.complete()?;
        Ok(())
    }

    /// Discard the recorded commands and begin recording again.
    pub fn reset(&mut self, one_time: bool) -> Result<(), GraphicsError> {
        let next = self.state.reset()?;
        let device = self.pool.device.raw();
        unsafe { device.reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty()) }
            .map_err(|e| GraphicsError::Recording(format!("reset '{}': {e:?}", self.label)))?;

        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { device.begin_command_buffer(self.buffer, &begin_info) }
            .map_err(|e| GraphicsError::Recording(format!("begin '{}': {e:?}", self.label)))?;
        self.state = next;
        Ok(())
    }
}

impl Drop for CommandSequence {
    fn drop(&mut self) {
        if self.state == SequenceState::Submitted {
            log::warn!("'{}' dropped while in flight, draining queue", self.label);
            if let Err(e) = self.pool.device.queue_wait_idle(self.pool.queue.queue) {
                log::warn!("Failed to drain queue for '{}': {e}", self.label);
            }
        }
        unsafe {
            self.pool
                .device
                .raw()
                .free_command_buffers(self.pool.pool, &[self.buffer])
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_lifecycle() {
        let state = SequenceState::Recording;
        let state = state.finish().unwrap();
        assert_eq!(state, SequenceState::Recorded);
        let state = state.submit().unwrap();
        assert_eq!(state, SequenceState::Submitted);
        let state = state.complete().unwrap();
        assert_eq!(state, SequenceState::Complete);
        // Reusable sequences go around again.
        assert_eq!(state.submit().unwrap(), SequenceState::Submitted);
    }

    #[test]
    fn test_cannot_submit_while_recording() {
        assert!(matches!(
            SequenceState::Recording.submit(),
            Err(GraphicsError::Submission(_))
        ));
    }

    #[test]
    fn test_cannot_double_submit() {
        assert!(SequenceState::Submitted.submit().is_err());
    }

    #[test]
    fn test_cannot_finish_twice() {
        assert!(matches!(
            SequenceState::Recorded.finish(),
            Err(GraphicsError::Recording(_))
        ));
    }

    #[test]
    fn test_reset_returns_to_recording() {
        assert_eq!(
            SequenceState::Recorded.reset().unwrap(),
            SequenceState::Recording
        );
        assert_eq!(
            SequenceState::Complete.reset().unwrap(),
            SequenceState::Recording
        );
        assert!(SequenceState::Submitted.reset().is_err());
        assert!(SequenceState::Recording.reset().is_err());
    }

    #[test]
    fn test_complete_requires_submission() {
        assert!(SequenceState::Recorded.complete().is_err());
        assert!(SequenceState::Complete.complete().is_err());
    }
}
