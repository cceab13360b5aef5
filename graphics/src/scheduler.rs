//! Records reusable draw and dispatch sequences.
//!
//! The scheduler records and submits; it never waits. Completion of what it
//! submits is owned by the caller: the presentation state machine for draws,
//! the compute dispatch path for dispatches.

use std::sync::Arc;

use ash::vk;

use crate::error::GraphicsError;
use crate::pipeline::{Pipeline, PipelineFamily};
use crate::resources::GpuBuffer;
use crate::vulkan::{CommandPool, CommandSequence, DeviceHandle, QueueSlot, SubmitSync};

/// Everything a textured indexed draw into one framebuffer needs.
pub struct DrawRecording<'a> {
    pub pipeline: &'a Pipeline,
    pub descriptor_set: vk::DescriptorSet,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub vertex_buffer: &'a GpuBuffer,
    pub index_buffer: &'a GpuBuffer,
    pub index_count: u32,
}

/// Device-side copy of a dispatch's results into a host-visible buffer,
/// recorded after the dispatch in the same sequence.
pub struct Readback<'a> {
    pub src: &'a GpuBuffer,
    pub dst: &'a GpuBuffer,
    pub size: vk::DeviceSize,
}

pub struct DispatchRecording<'a> {
    pub pipeline: &'a Pipeline,
    pub descriptor_set: vk::DescriptorSet,
    pub group_count: [u32; 3],
    pub readback: Option<Readback<'a>>,
}

/// Workgroups needed to cover `elements` invocations.
pub fn group_count_for(elements: u32, workgroup_size: u32) -> u32 {
    elements.div_ceil(workgroup_size.max(1))
}

pub struct CommandStreamScheduler {
    pool: CommandPool,
}

impl CommandStreamScheduler {
    pub fn new(device: Arc<DeviceHandle>, queue: QueueSlot) -> Result<Self, GraphicsError> {
        Ok(Self {
            pool: CommandPool::new(device, queue, false)?,
        })
    }

    pub fn queue(&self) -> QueueSlot {
        self.pool.queue()
    }

    fn expect_family(pipeline: &Pipeline, family: PipelineFamily) -> Result<(), GraphicsError> {
        if pipeline.family() != family {
            return Err(GraphicsError::Recording(format!(
                "pipeline '{}' is {:?}, expected {:?}",
                pipeline.label(),
                pipeline.family(),
                family
            )));
        }
        Ok(())
    }

    /// Record a render pass drawing one indexed mesh.
    pub fn record_draw(
        &self,
        label: &str,
        draw: &DrawRecording<'_>,
    ) -> Result<CommandSequence, GraphicsError> {
        Self::expect_family(draw.pipeline, PipelineFamily::Graphics)?;

        let mut sequence = self.pool.begin(label, false)?;
        let device = sequence.device();
        let cmd = sequence.raw();

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: draw.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(draw.render_pass)
            .framebuffer(draw.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: draw.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline.raw());
            device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer.raw()], &[0]);
            device.cmd_bind_index_buffer(cmd, draw.index_buffer.raw(), 0, vk::IndexType::UINT32);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                draw.pipeline.layout(),
                0,
                &[draw.descriptor_set],
                &[],
            );
            device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);
        }

        sequence.finish()?;
        Ok(sequence)
    }

    /// Record a single dispatch, optionally followed by a readback copy.
    pub fn record_dispatch(
        &self,
        label: &str,
        dispatch: &DispatchRecording<'_>,
    ) -> Result<CommandSequence, GraphicsError> {
        Self::expect_family(dispatch.pipeline, PipelineFamily::Compute)?;

        let limits = self.pool.device().limits().max_compute_work_group_count;
        for (axis, (&count, &max)) in dispatch.group_count.iter().zip(&limits).enumerate() {
            if count == 0 || count > max {
                return Err(GraphicsError::Recording(format!(
                    "group count {count} on axis {axis} outside 1..={max}"
                )));
            }
        }

        let mut sequence = self.pool.begin(label, true)?;
        let device = sequence.device();
        let cmd = sequence.raw();
        let [x, y, z] = dispatch.group_count;

        unsafe {
            // Earlier transfers into the bound buffers must be visible.
            let before = vk::MemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[before],
                &[],
                &[],
            );

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, dispatch.pipeline.raw());
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                dispatch.pipeline.layout(),
                0,
                &[dispatch.descriptor_set],
                &[],
            );
            device.cmd_dispatch(cmd, x, y, z);
        }

        if let Some(readback) = &dispatch.readback {
            record_readback(device, cmd, readback)?;
        }

        sequence.finish()?;
        Ok(sequence)
    }

    /// Submit without waiting. The caller owns completion through the
    /// markers in `sync`.
    pub fn submit(
        &self,
        sequence: &mut CommandSequence,
        sync: &SubmitSync<'_>,
    ) -> Result<(), GraphicsError> {
        sequence.submit(sync)
    }
}

fn record_readback(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    readback: &Readback<'_>,
) -> Result<(), GraphicsError> {
    if readback.size > readback.src.size() || readback.size > readback.dst.size() {
        return Err(GraphicsError::Recording(format!(
            "readback of {} bytes exceeds '{}' or '{}'",
            readback.size,
            readback.src.label(),
            readback.dst.label()
        )));
    }

    let to_transfer = vk::BufferMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
        .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(readback.src.raw())
        .offset(0)
        .size(readback.size);
    let to_host = vk::BufferMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::HOST_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(readback.dst.raw())
        .offset(0)
        .size(readback.size);
    let region = vk::BufferCopy::default().size(readback.size);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[to_transfer],
            &[],
        );
        device.cmd_copy_buffer(cmd, readback.src.raw(), readback.dst.raw(), &[region]);
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[],
            &[to_host],
            &[],
        );
    }
    Ok(())
}
