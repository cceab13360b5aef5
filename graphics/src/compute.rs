//! Headless compute: upload, dispatch, read back.
//!
//! A run is linear. The input is staged and copied into a device-local
//! storage buffer, one dispatch transforms it in place and copies the result
//! into a host-visible readback buffer, and the host invalidates and reads
//! that buffer. Both submissions go through the transfer engine and share its
//! single completion fence, which is reset between them.

use std::sync::Arc;

use ash::vk;
use glam::Vec4;

use crate::allocator::{memory, ResourceAllocator};
use crate::capture::FrameCapture;
use crate::descriptor::{DescriptorPool, DescriptorWrite};
use crate::error::GraphicsError;
use crate::pipeline::{build_pipeline, BindingDesc, BindingKind, Pipeline, PipelineDescriptor};
use crate::resources::GpuBuffer;
use crate::scheduler::{group_count_for, CommandStreamScheduler, DispatchRecording, Readback};
use crate::shader::{builtin, ShaderStage, ShaderStageDesc};
use crate::transfer::TransferEngine;

/// A compute variant: one storage buffer of `vec4<f32>` at binding 0,
/// transformed in place.
#[derive(Debug, Clone)]
pub struct ComputeKernel {
    pub name: &'static str,
    pub stage: ShaderStageDesc,
    pub workgroup_size: u32,
    /// Host-side reference for one component.
    pub transform: fn(f32) -> f32,
}

impl ComputeKernel {
    pub fn passthrough() -> Self {
        Self {
            name: "passthrough",
            stage: ShaderStageDesc::wgsl(ShaderStage::Compute, builtin::PASSTHROUGH, "main"),
            workgroup_size: 32,
            transform: |x| x,
        }
    }

    pub fn double() -> Self {
        Self {
            name: "double",
            stage: ShaderStageDesc::wgsl(ShaderStage::Compute, builtin::DOUBLE, "main"),
            workgroup_size: 32,
            transform: |x| x * 2.0,
        }
    }

    pub fn descriptor(&self) -> PipelineDescriptor {
        PipelineDescriptor::new(self.name)
            .with_stage(self.stage.clone())
            .with_binding(BindingDesc::new(
                0,
                BindingKind::StorageBuffer,
                vk::ShaderStageFlags::COMPUTE,
            ))
    }

    pub fn expected(&self, input: &[Vec4]) -> Vec<Vec4> {
        input
            .iter()
            .map(|v| Vec4::from_array(v.to_array().map(self.transform)))
            .collect()
    }
}

/// Input and output of one compute run.
#[derive(Debug, Clone, Default)]
pub struct ComputeSession {
    pub input: Vec<Vec4>,
    pub output: Vec<Vec4>,
}

impl ComputeSession {
    pub fn new(input: Vec<Vec4>) -> Self {
        Self {
            input,
            output: Vec::new(),
        }
    }

    /// Index of the first output element that differs bit-for-bit from what
    /// `kernel` should produce.
    pub fn first_mismatch(&self, kernel: &ComputeKernel) -> Option<usize> {
        let expected = kernel.expected(&self.input);
        if self.output.len() != expected.len() {
            return Some(self.output.len().min(expected.len()));
        }
        self.output
            .iter()
            .zip(&expected)
            .position(|(got, want)| {
                got.to_array().map(f32::to_bits) != want.to_array().map(f32::to_bits)
            })
    }
}

/// Small PCG generator for reproducible inputs.
struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    fn new(seed: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: 1442695040888963407,
        };
        rng.state = seed.wrapping_add(rng.inc);
        rng.step();
        rng
    }

    fn step(&mut self) {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(self.inc);
    }

    fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.step();
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        xorshifted.rotate_right((old >> 59) as u32)
    }
}

/// `count` vectors with a pseudo-random whole number in `x` and zeros
/// elsewhere.
pub fn scenario_input(count: usize, seed: u64) -> Vec<Vec4> {
    let mut rng = Pcg32::new(seed);
    (0..count)
        .map(|_| Vec4::new((rng.next_u32() / 10_000_000) as f32, 0.0, 0.0, 0.0))
        .collect()
}

pub struct ComputeDispatchPath {
    engine: TransferEngine,
    scheduler: CommandStreamScheduler,
    kernel: ComputeKernel,
    pipeline: Pipeline,
    descriptor_pool: DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    capture: FrameCapture,
}

impl ComputeDispatchPath {
    pub fn new(engine: TransferEngine, kernel: ComputeKernel) -> Result<Self, GraphicsError> {
        let device = Arc::clone(engine.device());
        let descriptor = kernel.descriptor();
        let pipeline = build_pipeline(&device, &descriptor, None)?;
        let descriptor_pool = DescriptorPool::new(Arc::clone(&device), &descriptor.bindings, 1)?;
        let descriptor_set = descriptor_pool.allocate(&pipeline)?;
        let scheduler = CommandStreamScheduler::new(Arc::clone(&device), device.compute_queue())?;

        Ok(Self {
            engine,
            scheduler,
            kernel,
            pipeline,
            descriptor_pool,
            descriptor_set,
            capture: FrameCapture::disabled(),
        })
    }

    /// Bracket every non-empty run with `capture`.
    pub fn with_frame_capture(mut self, capture: FrameCapture) -> Self {
        self.capture = capture;
        self
    }

    pub fn frame_capture(&self) -> &FrameCapture {
        &self.capture
    }

    pub fn kernel(&self) -> &ComputeKernel {
        &self.kernel
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    /// Transform `session.input` on the device into `session.output`.
    ///
    /// An empty input produces an empty output without touching the device.
    pub fn run(&mut self, session: &mut ComputeSession) -> Result<(), GraphicsError> {
        session.output.clear();
        if session.input.is_empty() {
            return Ok(());
        }

        self.capture.start();
        let result = self.dispatch(session);
        self.capture.end();
        result
    }

    fn dispatch(&mut self, session: &mut ComputeSession) -> Result<(), GraphicsError> {
        let elements = u32::try_from(session.input.len()).map_err(|_| {
            GraphicsError::Recording(format!("{} elements exceed one dispatch", session.input.len()))
        })?;
        let size = std::mem::size_of_val(session.input.as_slice()) as vk::DeviceSize;
        let allocator = self.engine.allocator().clone();

        let data = allocator.create_buffer(
            "compute data",
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            memory::DEVICE_LOCAL,
        )?;
        let mut readback = create_readback(&allocator, size)?;

        self.engine.upload_to_buffer(&session.input, &data)?;

        self.bind_data(&data)?;
        let mut sequence = self.scheduler.record_dispatch(
            self.kernel.name,
            &DispatchRecording {
                pipeline: &self.pipeline,
                descriptor_set: self.descriptor_set,
                group_count: [group_count_for(elements, self.kernel.workgroup_size), 1, 1],
                readback: Some(Readback {
                    src: &data,
                    dst: &readback,
                    size,
                }),
            },
        )?;
        self.engine.submit_and_wait(&mut sequence)?;

        let mapping = readback.map()?;
        mapping.invalidate()?;
        session.output.resize(session.input.len(), Vec4::ZERO);
        mapping.read(0, &mut session.output)?;

        log::info!(
            "Compute '{}' finished: {} elements",
            self.kernel.name,
            elements
        );
        Ok(())
    }

    fn bind_data(&self, data: &GpuBuffer) -> Result<(), GraphicsError> {
        self.descriptor_pool.write(
            self.descriptor_set,
            &self.pipeline,
            &[DescriptorWrite::Buffer {
                binding: 0,
                buffer: data,
            }],
        )
    }
}

/// Host-cached memory when the device has it, plain host-visible otherwise.
fn create_readback(
    allocator: &ResourceAllocator,
    size: vk::DeviceSize,
) -> Result<GpuBuffer, GraphicsError> {
    let usage = vk::BufferUsageFlags::TRANSFER_DST;
    match allocator.create_buffer("compute readback", size, usage, memory::HOST_CACHED) {
        Err(GraphicsError::NoMatchingMemoryType { .. }) => {
            log::debug!("No host-cached memory, reading back through host-visible memory");
            allocator.create_buffer("compute readback", size, usage, memory::HOST_VISIBLE)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_input_shape() {
        let input = scenario_input(1024, 7);
        assert_eq!(input.len(), 1024);
        assert!(input.iter().all(|v| v.y == 0.0 && v.z == 0.0 && v.w == 0.0));
        assert!(input.iter().all(|v| v.x.fract() == 0.0 && v.x <= 429.0));
        assert!(input.iter().any(|v| v.x != input[0].x));
    }

    #[test]
    fn test_scenario_input_is_reproducible() {
        assert_eq!(scenario_input(64, 42), scenario_input(64, 42));
        assert_ne!(scenario_input(64, 42), scenario_input(64, 43));
    }

    #[test]
    fn test_kernel_expectations() {
        let input = vec![Vec4::new(3.0, 0.0, -1.5, 0.25)];
        assert_eq!(ComputeKernel::passthrough().expected(&input), input);
        assert_eq!(
            ComputeKernel::double().expected(&input),
            vec![Vec4::new(6.0, 0.0, -3.0, 0.5)]
        );
    }

    #[test]
    fn test_first_mismatch() {
        let kernel = ComputeKernel::double();
        let mut session = ComputeSession::new(vec![Vec4::ONE, Vec4::splat(2.0)]);
        session.output = vec![Vec4::splat(2.0), Vec4::splat(4.0)];
        assert_eq!(session.first_mismatch(&kernel), None);

        session.output[1].w = 4.5;
        assert_eq!(session.first_mismatch(&kernel), Some(1));

        session.output.pop();
        assert_eq!(session.first_mismatch(&kernel), Some(1));
    }

    #[test]
    fn test_kernel_descriptor_is_compute() {
        let descriptor = ComputeKernel::passthrough().descriptor();
        assert_eq!(
            descriptor.family().unwrap(),
            crate::pipeline::PipelineFamily::Compute
        );
        assert_eq!(descriptor.bindings.len(), 1);
        assert_eq!(descriptor.bindings[0].kind, BindingKind::StorageBuffer);
    }
}
