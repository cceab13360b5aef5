//! Common utilities for GPU integration tests.
//!
//! Every test builds a headless [`TestContext`]. When the machine has no
//! Vulkan loader or no compute-capable device, construction returns `None`
//! and the test prints a message and returns early.

use std::sync::Arc;

use ash::vk;
use vkngine_graphics::vulkan::{DeviceHandle, DeviceRequirements, InstanceHandle};
use vkngine_graphics::{memory, GpuBuffer, ResourceAllocator, RuntimeConfig, TransferEngine};

/// Headless device plus a transfer engine on it.
pub struct TestContext {
    pub config: RuntimeConfig,
    pub device: Arc<DeviceHandle>,
    pub allocator: ResourceAllocator,
    pub engine: TransferEngine,
}

impl TestContext {
    /// Create a context on the first compute-capable device, or `None` when
    /// there is none.
    pub fn new() -> Option<Self> {
        Self::with_requirements(DeviceRequirements::headless())
    }

    /// Like [`TestContext::new`] but also needing a graphics queue, for
    /// transitions into fragment-shader layouts.
    pub fn with_graphics() -> Option<Self> {
        let mut requirements = DeviceRequirements::headless();
        requirements.queues.graphics = true;
        Self::with_requirements(requirements)
    }

    pub fn with_requirements(requirements: DeviceRequirements) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        // The validation layer is not installed everywhere tests run.
        let config = RuntimeConfig::default()
            .with_validation(false)
            .with_application_name("vkngine-tests");
        let instance = match InstanceHandle::new(&config, &[]) {
            Ok(instance) => instance,
            Err(e) => {
                eprintln!("Vulkan not available, skipping: {e}");
                return None;
            }
        };
        let device = match DeviceHandle::new(instance, None, requirements) {
            Ok(device) => device,
            Err(e) => {
                eprintln!("No suitable device, skipping: {e}");
                return None;
            }
        };

        let allocator = ResourceAllocator::new(Arc::clone(&device));
        let engine = TransferEngine::new(allocator.clone(), &config).ok()?;
        Some(Self {
            config,
            device,
            allocator,
            engine,
        })
    }

    pub fn device_buffer(&self, label: &str, size: vk::DeviceSize) -> GpuBuffer {
        self.allocator
            .create_buffer(
                label,
                size,
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST,
                memory::DEVICE_LOCAL,
            )
            .expect("device-local buffer")
    }

    pub fn host_buffer(&self, label: &str, size: vk::DeviceSize) -> GpuBuffer {
        self.allocator
            .create_buffer(
                label,
                size,
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
                memory::HOST_VISIBLE,
            )
            .expect("host-visible buffer")
    }

    /// Copy `buffer` back through a host-visible buffer and return its bytes.
    pub fn read_back(&mut self, buffer: &GpuBuffer) -> Vec<u8> {
        let mut readback = self.host_buffer("test readback", buffer.size());
        self.engine
            .copy_buffer(buffer, &readback, buffer.size())
            .expect("copy to readback");
        let mapping = readback.map().expect("map readback");
        mapping.invalidate().expect("invalidate readback");
        mapping.bytes().to_vec()
    }
}

/// Deterministic byte pattern.
pub fn generate_test_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 % 251) as u8).collect()
}
