//! # VKNgine Graphics
//!
//! GPU resource lifecycle and host/device synchronization over Vulkan.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`vulkan`] - Instance, surface, device selection, command sequences and sync markers
//! - [`ResourceAllocator`] - Buffers, images and samplers bound to device memory
//! - [`TransferEngine`] - Blocking one-shot copies, uploads and layout transitions
//! - [`CommandStreamScheduler`] - Reusable draw and dispatch recordings
//! - [`PresentationStateMachine`] - Acquire/submit/present loop with swap surface rebuilds
//! - [`ComputeDispatchPath`] - Headless upload, dispatch and readback
//! - [`FrameCapture`] - Optional RenderDoc capture around compute runs (`renderdoc` feature)
//!
//! ## Example
//!
//! ```ignore
//! use vkngine_graphics::*;
//!
//! let config = RuntimeConfig::default();
//! let instance = vulkan::InstanceHandle::new(&config, &[])?;
//! let device = vulkan::DeviceHandle::new(instance, None, vulkan::DeviceRequirements::headless())?;
//! let engine = TransferEngine::new(ResourceAllocator::new(device), &config)?;
//!
//! let mut path = ComputeDispatchPath::new(engine, ComputeKernel::passthrough())?;
//! let mut session = ComputeSession::new(scenario_input(1024, 1));
//! path.run(&mut session)?;
//! assert_eq!(session.output, session.input);
//! ```

pub mod allocator;
pub mod capture;
pub mod compute;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod pipeline;
pub mod presentation;
pub mod renderer;
pub mod resize;
pub mod resources;
pub mod scheduler;
pub mod shader;
pub mod swapchain;
pub mod transfer;
pub mod vulkan;

pub use allocator::{memory, ResourceAllocator};
pub use capture::FrameCapture;
pub use compute::{scenario_input, ComputeDispatchPath, ComputeKernel, ComputeSession};
pub use config::RuntimeConfig;
pub use descriptor::{DescriptorPool, DescriptorWrite};
pub use error::{GraphicsError, HostSyncOp, QueueCapability};
pub use pipeline::{build_pipeline, Pipeline, PipelineDescriptor, PipelineFamily};
pub use presentation::{
    AcquireOutcome, FrameOutcome, FrameTarget, PresentOutcome, PresentState,
    PresentationStateMachine, PresentationStats,
};
pub use renderer::{MeshRenderer, SceneAssets};
pub use resize::{ResizeEvent, ResizeManager};
pub use resources::{GpuBuffer, GpuImage, HostMapping, Sampler};
pub use scheduler::CommandStreamScheduler;
pub use shader::{ShaderSource, ShaderStage, ShaderStageDesc};
pub use swapchain::SwapSurfaceState;
pub use transfer::{TransferEngine, TransferState};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
pub fn init() {
    log::info!("VKNgine Graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config_is_usable() {
        let config = RuntimeConfig::default();
        assert!(config.fence_timeout_ns() > 0);
    }
}
