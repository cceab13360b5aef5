//! Owned Vulkan objects.
//!
//! Ownership edges follow the dependency order: resources hold the
//! [`DeviceHandle`], the device and [`Surface`] hold the [`InstanceHandle`].
//! Dropping in any order therefore destroys dependents first.

mod command;
mod debug;
mod device;
mod instance;
mod layout;
mod surface;
mod sync;

pub use command::{CommandPool, CommandSequence, SequenceState};
pub use device::{
    gather_candidates, query_memory_type, resolve_queues, select_device, DeviceCandidate,
    DeviceHandle, DeviceLimits, DeviceRequirements, QueueFamilyInfo, QueueRequirements,
    QueueSlot, ResolvedQueues,
};
pub use instance::{InstanceHandle, VALIDATION_LAYER_NAME};
pub use layout::{aspect_mask, has_stencil, is_depth_format, transition_barrier, TransitionBarrier};
pub use surface::Surface;
pub use sync::{Fence, Semaphore, SubmitSync};
