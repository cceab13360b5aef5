//! Synchronization primitives.
//!
//! [`Fence`] is the host-waitable completion marker; [`Semaphore`] is the
//! device-only ordering marker. Both release their handle on drop.

use std::sync::Arc;

use ash::vk;

use crate::error::GraphicsError;

use super::DeviceHandle;

/// Host-waitable completion marker.
pub struct Fence {
    device: Arc<DeviceHandle>,
    fence: vk::Fence,
}

impl Fence {
    pub fn new(device: Arc<DeviceHandle>, signaled: bool) -> Result<Self, GraphicsError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.raw().create_fence(&create_info, None) }
            .map_err(|e| GraphicsError::creation("fence", e))?;
        Ok(Self { device, fence })
    }

    pub fn raw(&self) -> vk::Fence {
        self.fence
    }

    /// Block until signaled. An elapsed timeout is a wait failure, never a
    /// retry.
    pub fn wait(&self, timeout_ns: u64) -> Result<(), GraphicsError> {
        match unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.fence], true, timeout_ns)
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GraphicsError::WaitFailed(format!(
                "fence not signaled within {timeout_ns} ns"
            ))),
            Err(e) => Err(GraphicsError::WaitFailed(format!("fence wait: {e:?}"))),
        }
    }

    pub fn reset(&self) -> Result<(), GraphicsError> {
        unsafe { self.device.raw().reset_fences(&[self.fence]) }
            .map_err(|e| GraphicsError::WaitFailed(format!("fence reset: {e:?}")))
    }

    pub fn is_signaled(&self) -> Result<bool, GraphicsError> {
        unsafe { self.device.raw().get_fence_status(self.fence) }
            .map_err(|e| GraphicsError::WaitFailed(format!("fence status: {e:?}")))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_fence(self.fence, None) };
    }
}

/// Device-only ordering marker.
pub struct Semaphore {
    device: Arc<DeviceHandle>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<DeviceHandle>) -> Result<Self, GraphicsError> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.raw().create_semaphore(&create_info, None) }
            .map_err(|e| GraphicsError::creation("semaphore", e))?;
        Ok(Self { device, semaphore })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_semaphore(self.semaphore, None) };
    }
}

/// Markers attached to one queue submission.
///
/// A submission may wait on device-only markers, signal device-only markers,
/// and signal one host-waitable marker; any of these may be absent.
#[derive(Default)]
pub struct SubmitSync<'a> {
    pub wait: Vec<(&'a Semaphore, vk::PipelineStageFlags)>,
    pub signal: Vec<&'a Semaphore>,
    pub fence: Option<&'a Fence>,
}

impl<'a> SubmitSync<'a> {
    /// Signal only a host-waitable marker.
    pub fn fence(fence: &'a Fence) -> Self {
        Self {
            fence: Some(fence),
            ..Default::default()
        }
    }
}
