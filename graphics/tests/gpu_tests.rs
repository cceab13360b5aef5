//! GPU integration tests for the graphics crate.
//!
//! These run against the first compute-capable Vulkan device and skip when
//! none is present.
//!
//! # Test Categories
//!
//! - **Compute Tests**: Upload, dispatch and read back through the compute path
//! - **Transfer Tests**: One-shot copies, uploads and layout transitions
//! - **Memory Tests**: Memory type queries and host mappings on a real device
//!
//! ```bash
//! cargo test --test gpu_tests
//! ```

mod common;

use std::sync::Arc;

use ash::vk;
use glam::Vec4;
use rstest::rstest;

use common::{generate_test_pattern, TestContext};
use vkngine_core::texture::generate_checkerboard;
use vkngine_graphics::vulkan::{CommandPool, Fence, SequenceState, SubmitSync};
use vkngine_graphics::{
    memory, scenario_input, ComputeDispatchPath, ComputeKernel, ComputeSession, FrameCapture,
    GraphicsError, TransferEngine, TransferState,
};

fn compute_path(ctx: &TestContext, kernel: ComputeKernel) -> ComputeDispatchPath {
    let engine = TransferEngine::new(ctx.allocator.clone(), &ctx.config).expect("engine");
    ComputeDispatchPath::new(engine, kernel).expect("compute path")
}

// ============================================================================
// Compute Tests
// ============================================================================

/// Input sizes straddling the workgroup size round-trip unchanged through
/// the identity kernel.
#[rstest]
#[case::single(1)]
#[case::partial_group(31)]
#[case::one_group(32)]
#[case::many_groups(1000)]
#[case::large(65_537)]
fn test_identity_round_trip(#[case] elements: usize) {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let mut path = compute_path(&ctx, ComputeKernel::passthrough());

    let input: Vec<Vec4> = (0..elements)
        .map(|i| Vec4::new(i as f32, -(i as f32) * 0.5, f32::MIN_POSITIVE, 1.0e30))
        .collect();
    let mut session = ComputeSession::new(input);
    path.run(&mut session).expect("compute run");

    assert_eq!(session.output.len(), elements);
    assert_eq!(session.first_mismatch(path.kernel()), None);
}

/// 1024 vectors with only `x` randomized come back bit-for-bit identical.
#[test]
fn test_scenario_1024_vectors() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let mut path = compute_path(&ctx, ComputeKernel::passthrough());

    let mut session = ComputeSession::new(scenario_input(1024, 0x5eed));
    path.run(&mut session).expect("compute run");

    for (i, (got, want)) in session.output.iter().zip(&session.input).enumerate() {
        assert_eq!(
            got.to_array().map(f32::to_bits),
            want.to_array().map(f32::to_bits),
            "element {i}"
        );
    }
}

#[test]
fn test_double_kernel() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let mut path = compute_path(&ctx, ComputeKernel::double());

    let mut session = ComputeSession::new(scenario_input(300, 9));
    path.run(&mut session).expect("compute run");
    assert_eq!(session.first_mismatch(path.kernel()), None);
    assert_eq!(session.output[0].x, session.input[0].x * 2.0);
}

/// Copy and dispatch share the engine's fence: two submissions per run,
/// and the engine is idle again afterwards.
#[test]
fn test_compute_run_submissions() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let mut path = compute_path(&ctx, ComputeKernel::passthrough());

    let mut session = ComputeSession::new(scenario_input(64, 3));
    path.run(&mut session).expect("first run");
    assert_eq!(path.engine().submissions(), 2);

    path.run(&mut session).expect("second run");
    assert_eq!(path.engine().submissions(), 4);
    assert_eq!(path.engine().state(), TransferState::Idle);
}

#[test]
fn test_empty_session_touches_nothing() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let mut path = compute_path(&ctx, ComputeKernel::passthrough());

    let mut session = ComputeSession::new(Vec::new());
    session.output.push(Vec4::ONE);
    path.run(&mut session).expect("empty run");
    assert!(session.output.is_empty());
    assert_eq!(path.engine().submissions(), 0);
}

/// A run under frame capture still produces the same output, and the capture
/// is closed when the run returns.
#[test]
fn test_run_under_frame_capture() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let mut path =
        compute_path(&ctx, ComputeKernel::passthrough()).with_frame_capture(FrameCapture::connect());

    let mut session = ComputeSession::new(scenario_input(128, 9));
    path.run(&mut session).expect("captured run");
    assert_eq!(session.output, session.input);

    let capture = path.frame_capture();
    assert!(!capture.is_active());
    let expected = if capture.is_available() { 1 } else { 0 };
    assert_eq!(capture.captures(), expected);

    let mut empty = ComputeSession::new(Vec::new());
    path.run(&mut empty).expect("empty run");
    assert_eq!(path.frame_capture().captures(), expected);
}

// ============================================================================
// Transfer Tests
// ============================================================================

#[test]
fn test_buffer_upload_round_trip() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };
    let data = generate_test_pattern(4096);
    let buffer = ctx.device_buffer("upload target", data.len() as u64);

    ctx.engine
        .upload_to_buffer(&data, &buffer)
        .expect("upload");
    assert_eq!(ctx.read_back(&buffer), data);
    assert_eq!(ctx.engine.state(), TransferState::Idle);
}

#[test]
fn test_zero_length_transfer_submits_nothing() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };
    let src = ctx.host_buffer("src", 256);
    let dst = ctx.device_buffer("dst", 256);

    ctx.engine.copy_buffer(&src, &dst, 0).expect("empty copy");
    ctx.engine
        .upload_to_buffer::<u32>(&[], &dst)
        .expect("empty upload");

    assert_eq!(ctx.engine.submissions(), 0);
    assert_eq!(ctx.engine.state(), TransferState::Idle);
}

#[test]
fn test_out_of_bounds_copy_is_rejected() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };
    let src = ctx.host_buffer("src", 128);
    let dst = ctx.device_buffer("dst", 64);

    let err = ctx.engine.copy_buffer(&src, &dst, 128).unwrap_err();
    assert!(matches!(err, GraphicsError::Recording(_)));
    assert_eq!(ctx.engine.submissions(), 0);
}

/// A failed recording leaves the engine idle and ready for the next copy.
#[test]
fn test_failed_one_shot_returns_to_idle() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };
    let err = ctx
        .engine
        .execute_one_shot("failing record", |_| {
            Err(GraphicsError::Recording("rejected by caller".into()))
        })
        .unwrap_err();
    assert!(matches!(err, GraphicsError::Recording(_)));
    assert_eq!(ctx.engine.state(), TransferState::Idle);
    assert_eq!(ctx.engine.submissions(), 0);

    let data = generate_test_pattern(256);
    let buffer = ctx.device_buffer("after failure", data.len() as u64);
    ctx.engine
        .upload_to_buffer(&data, &buffer)
        .expect("upload after failure");
    assert_eq!(ctx.read_back(&buffer), data);
}

#[test]
fn test_unsupported_transition_submits_nothing() {
    let Some(mut ctx) = TestContext::new() else {
        return;
    };
    let image = ctx
        .allocator
        .create_image(
            "transition target",
            vk::Extent2D {
                width: 4,
                height: 4,
            },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            memory::DEVICE_LOCAL,
        )
        .expect("image");

    let err = ctx
        .engine
        .transition_layout(
            &image,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap_err();
    assert!(matches!(err, GraphicsError::UnsupportedTransition { .. }));
    assert_eq!(ctx.engine.submissions(), 0);
    assert_eq!(ctx.engine.state(), TransferState::Idle);
}

#[test]
fn test_texture_upload() {
    let Some(mut ctx) = TestContext::with_graphics() else {
        return;
    };
    let pixels = generate_checkerboard(64, 8, [255, 255, 255, 255], [0, 0, 0, 255]);
    let image = ctx
        .allocator
        .create_image(
            "checkerboard",
            vk::Extent2D {
                width: 64,
                height: 64,
            },
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            memory::DEVICE_LOCAL,
        )
        .expect("image");

    ctx.engine.upload_to_image(&pixels, &image).expect("upload");
    // Undefined -> transfer dst, copy, transfer dst -> shader read.
    assert_eq!(ctx.engine.submissions(), 3);
}

#[test]
fn test_texture_size_mismatch() {
    let Some(mut ctx) = TestContext::with_graphics() else {
        return;
    };
    let pixels = generate_checkerboard(32, 8, [255, 0, 0, 255], [0, 0, 255, 255]);
    let image = ctx
        .allocator
        .create_image(
            "too large",
            vk::Extent2D {
                width: 64,
                height: 64,
            },
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            memory::DEVICE_LOCAL,
        )
        .expect("image");

    assert!(ctx.engine.upload_to_image(&pixels, &image).is_err());
    assert_eq!(ctx.engine.submissions(), 0);
}

#[test]
fn test_depth_image_transition() {
    let Some(mut ctx) = TestContext::with_graphics() else {
        return;
    };
    let format = ctx.device.find_depth_format().expect("depth format");
    let depth = ctx
        .allocator
        .create_image(
            "depth",
            vk::Extent2D {
                width: 32,
                height: 32,
            },
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            memory::DEVICE_LOCAL,
        )
        .expect("depth image");

    ctx.engine
        .transition_layout(
            &depth,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .expect("transition");
    assert_eq!(ctx.engine.submissions(), 1);
}

/// Dropping a sequence that is still in flight drains its queue before the
/// command buffer is freed.
#[test]
fn test_in_flight_sequence_drop_drains_queue() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let pool = CommandPool::new(Arc::clone(&ctx.device), ctx.device.compute_queue(), true)
        .expect("pool");
    let fence = Fence::new(Arc::clone(&ctx.device), false).expect("fence");

    let mut sequence = pool.begin("dropped in flight", true).expect("begin");
    sequence.finish().expect("finish");
    sequence.submit(&SubmitSync::fence(&fence)).expect("submit");
    assert_eq!(sequence.state(), SequenceState::Submitted);
    drop(sequence);

    assert!(fence.is_signaled().expect("fence status"));
}

// ============================================================================
// Memory Tests
// ============================================================================

#[test]
fn test_memory_type_query() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    assert!(ctx
        .device
        .query_memory_type(u32::MAX, memory::DEVICE_LOCAL)
        .is_ok());
    assert!(ctx
        .device
        .query_memory_type(u32::MAX, memory::HOST_VISIBLE)
        .is_ok());

    let err = ctx
        .device
        .query_memory_type(0, vk::MemoryPropertyFlags::empty())
        .unwrap_err();
    assert!(matches!(err, GraphicsError::NoMatchingMemoryType { .. }));
}

#[test]
fn test_buffers_land_in_requested_memory() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let device_local = ctx.device_buffer("device placement", 64);
    assert!(device_local.placed_properties().contains(memory::DEVICE_LOCAL));

    let host = ctx.host_buffer("host placement", 64);
    assert!(host.placed_properties().contains(memory::HOST_VISIBLE));
}

#[test]
fn test_host_mapping_round_trip() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let mut buffer = ctx.host_buffer("mapped", 64);
    let values: Vec<u32> = (0..16).collect();

    let mut mapping = buffer.map().expect("map");
    mapping.write(0, &values).expect("write");
    mapping.flush().expect("flush");

    let mut out = vec![0u32; 16];
    mapping.read(0, &mut out).expect("read");
    assert_eq!(out, values);
    assert!(mapping.write(60, &values).is_err());
}

#[test]
fn test_device_local_buffer_cannot_be_mapped() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let mut buffer = ctx.device_buffer("device only", 64);
    assert!(matches!(
        buffer.map(),
        Err(GraphicsError::NotHostVisible(_))
    ));
}

#[test]
fn test_zero_sized_buffer_is_rejected() {
    let Some(ctx) = TestContext::new() else {
        return;
    };
    let err = ctx
        .allocator
        .create_buffer(
            "empty",
            0,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            memory::DEVICE_LOCAL,
        )
        .unwrap_err();
    assert!(matches!(err, GraphicsError::ResourceCreation { .. }));
}
