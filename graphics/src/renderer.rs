//! Windowed renderer for one textured, lit mesh.
//!
//! Scene resources (vertex, index and uniform buffers, texture, sampler) are
//! created once. Everything sized to the swap surface lives in
//! [`FrameResources`] and is replaced as one unit on rebuild.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use static_assertions::const_assert_eq;
use vkngine_core::{ImageData, MeshData};

use crate::allocator::{memory, ResourceAllocator};
use crate::config::RuntimeConfig;
use crate::descriptor::{DescriptorPool, DescriptorWrite};
use crate::error::GraphicsError;
use crate::pipeline::{
    build_pipeline, BindingDesc, BindingKind, Pipeline, PipelineDescriptor, RenderTarget,
    VertexLayout,
};
use crate::presentation::{AcquireOutcome, FrameTarget, PresentOutcome};
use crate::resources::{GpuBuffer, GpuImage, Sampler};
use crate::scheduler::{CommandStreamScheduler, DrawRecording};
use crate::shader::{builtin, ShaderStage, ShaderStageDesc};
use crate::swapchain::{drawable_extent, is_zero_area, SwapSurfaceState};
use crate::transfer::TransferEngine;
use crate::vulkan::{CommandSequence, DeviceHandle, Semaphore, SubmitSync, Surface};

const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.03, 1.0];

/// Interleaved vertex matching `mesh.wgsl`'s `VertexInput`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<MeshVertex>(), 48);

impl MeshVertex {
    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: std::mem::size_of::<Self>() as u32,
            attributes: vec![
                (0, vk::Format::R32G32B32_SFLOAT, 0),
                (1, vk::Format::R32G32B32_SFLOAT, 12),
                (2, vk::Format::R32G32_SFLOAT, 24),
                (3, vk::Format::R32G32B32A32_SFLOAT, 32),
            ],
        }
    }

    /// Interleave the attribute streams of `mesh`.
    pub fn interleave(mesh: &MeshData) -> Vec<Self> {
        (0..mesh.vertex_count())
            .map(|i| Self {
                position: mesh.positions[i],
                normal: mesh.normals.get(i).copied().unwrap_or(MeshData::DEFAULT_NORMAL),
                uv: mesh.uvs.get(i).copied().unwrap_or_default(),
                tangent: mesh
                    .tangents
                    .get(i)
                    .copied()
                    .unwrap_or(MeshData::DEFAULT_TANGENT),
            })
            .collect()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Uniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

const_assert_eq!(std::mem::size_of::<Uniforms>(), 192);

impl Uniforms {
    /// Mesh spinning around +Z at 90 degrees per second, seen from (2, 2, 2).
    pub fn at(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space has Y pointing down.
        proj.y_axis.y *= -1.0;
        Self {
            model: Mat4::from_rotation_z(elapsed_secs * 90f32.to_radians()),
            view: Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z),
            proj,
        }
    }
}

/// CPU-side scene for the windowed mode.
#[derive(Debug, Clone)]
pub struct SceneAssets {
    pub mesh: MeshData,
    pub texture: ImageData,
}

pub fn mesh_pipeline_descriptor() -> PipelineDescriptor {
    PipelineDescriptor::new("textured mesh")
        .with_stage(ShaderStageDesc::wgsl(ShaderStage::Vertex, builtin::MESH, "vs_main"))
        .with_stage(ShaderStageDesc::wgsl(ShaderStage::Fragment, builtin::MESH, "fs_main"))
        .with_binding(BindingDesc::new(
            0,
            BindingKind::UniformBuffer,
            vk::ShaderStageFlags::VERTEX,
        ))
        .with_binding(BindingDesc::new(
            1,
            BindingKind::SampledTexture,
            vk::ShaderStageFlags::FRAGMENT,
        ))
        .with_binding(BindingDesc::new(
            2,
            BindingKind::Sampler,
            vk::ShaderStageFlags::FRAGMENT,
        ))
        .with_vertex_layout(MeshVertex::layout())
}

struct RenderPass {
    device: Arc<DeviceHandle>,
    raw: vk::RenderPass,
}

impl RenderPass {
    fn new(
        device: Arc<DeviceHandle>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self, GraphicsError> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            // Transitioned once when the depth image is created.
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];
        let color_ref = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref)];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let raw = unsafe { device.raw().create_render_pass(&create_info, None) }
            .map_err(|e| GraphicsError::creation("render pass", e))?;
        Ok(Self { device, raw })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_render_pass(self.raw, None) };
    }
}

struct Framebuffer {
    device: Arc<DeviceHandle>,
    raw: vk::Framebuffer,
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_framebuffer(self.raw, None) };
    }
}

/// Everything sized to or recorded against the swap surface.
///
/// Fields drop top to bottom: recorded draws before the framebuffers and
/// pipeline they reference, the swap surface last.
struct FrameResources {
    draws: Vec<CommandSequence>,
    image_available: Semaphore,
    render_finished: Semaphore,
    _framebuffers: Vec<Framebuffer>,
    _descriptor_pool: DescriptorPool,
    _pipeline: Pipeline,
    _depth: GpuImage,
    _render_pass: RenderPass,
    swap: SwapSurfaceState,
}

/// Scene resources the frame resources are recorded against.
struct Scene {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    texture: GpuImage,
    sampler: Sampler,
    uniform_buffer: GpuBuffer,
}

impl FrameResources {
    /// Build for the current surface, or `None` while there is nothing to
    /// draw into.
    fn build_if_drawable(
        engine: &mut TransferEngine,
        scheduler: &CommandStreamScheduler,
        surface: &Arc<Surface>,
        window: (u32, u32),
        scene: &Scene,
    ) -> Result<Option<Self>, GraphicsError> {
        let capabilities = surface.capabilities(engine.device().physical_device())?;
        if drawable_extent(&capabilities, window).is_none() {
            log::debug!(
                "Surface has no area (window {}x{}), swap surface left empty",
                window.0,
                window.1
            );
            return Ok(None);
        }
        Self::build(engine, scheduler, surface, window, scene).map(Some)
    }

    fn build(
        engine: &mut TransferEngine,
        scheduler: &CommandStreamScheduler,
        surface: &Arc<Surface>,
        window: (u32, u32),
        scene: &Scene,
    ) -> Result<Self, GraphicsError> {
        let device = Arc::clone(engine.device());
        let allocator = engine.allocator().clone();

        let swap = SwapSurfaceState::new(Arc::clone(&device), Arc::clone(surface), window)?;
        let extent = swap.extent();

        let depth_format = device.find_depth_format()?;
        let render_pass = RenderPass::new(Arc::clone(&device), swap.format(), depth_format)?;
        let depth = allocator.create_image(
            "depth",
            extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            memory::DEVICE_LOCAL,
        )?;
        engine.transition_layout(
            &depth,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )?;

        let descriptor = mesh_pipeline_descriptor();
        let pipeline = build_pipeline(
            &device,
            &descriptor,
            Some(RenderTarget {
                render_pass: render_pass.raw,
                extent,
            }),
        )?;
        let descriptor_pool = DescriptorPool::new(Arc::clone(&device), &descriptor.bindings, 1)?;
        let descriptor_set = descriptor_pool.allocate(&pipeline)?;
        descriptor_pool.write(
            descriptor_set,
            &pipeline,
            &[
                DescriptorWrite::Buffer {
                    binding: 0,
                    buffer: &scene.uniform_buffer,
                },
                DescriptorWrite::Texture {
                    binding: 1,
                    image: &scene.texture,
                },
                DescriptorWrite::Sampler {
                    binding: 2,
                    sampler: &scene.sampler,
                },
            ],
        )?;

        let mut framebuffers = Vec::with_capacity(swap.image_count());
        for &view in swap.views() {
            let attachments = [view, depth.view()];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.raw)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let raw = unsafe { device.raw().create_framebuffer(&create_info, None) }
                .map_err(|e| GraphicsError::creation("framebuffer", e))?;
            framebuffers.push(Framebuffer {
                device: Arc::clone(&device),
                raw,
            });
        }

        let draws = framebuffers
            .iter()
            .enumerate()
            .map(|(i, framebuffer)| {
                scheduler.record_draw(
                    &format!("draw {i}"),
                    &DrawRecording {
                        pipeline: &pipeline,
                        descriptor_set,
                        render_pass: render_pass.raw,
                        framebuffer: framebuffer.raw,
                        extent,
                        clear_color: CLEAR_COLOR,
                        vertex_buffer: &scene.vertex_buffer,
                        index_buffer: &scene.index_buffer,
                        index_count: scene.index_count,
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            draws,
            image_available: Semaphore::new(Arc::clone(&device))?,
            render_finished: Semaphore::new(device)?,
            _framebuffers: framebuffers,
            _descriptor_pool: descriptor_pool,
            _pipeline: pipeline,
            _depth: depth,
            _render_pass: render_pass,
            swap,
        })
    }
}

pub struct MeshRenderer {
    frame: Option<FrameResources>,
    in_flight: Option<u32>,
    scene: Scene,
    scheduler: CommandStreamScheduler,
    engine: TransferEngine,
    surface: Arc<Surface>,
    window: (u32, u32),
    fence_timeout_ns: u64,
    started: Instant,
}

impl MeshRenderer {
    /// Upload the scene and build the first set of frame resources.
    pub fn new(
        device: Arc<DeviceHandle>,
        surface: Arc<Surface>,
        assets: &SceneAssets,
        config: &RuntimeConfig,
    ) -> Result<Self, GraphicsError> {
        assets
            .mesh
            .validate()
            .map_err(|e| GraphicsError::Configuration(e.to_string()))?;
        let graphics = device
            .graphics_queue()
            .ok_or_else(|| GraphicsError::Configuration("no graphics queue".into()))?;

        let allocator = ResourceAllocator::new(Arc::clone(&device));
        let mut engine = TransferEngine::new(allocator.clone(), config)?;
        let scheduler = CommandStreamScheduler::new(Arc::clone(&device), graphics)?;

        let vertices = MeshVertex::interleave(&assets.mesh);
        let vertex_buffer = allocator.create_buffer(
            "vertices",
            std::mem::size_of_val(vertices.as_slice()) as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            memory::DEVICE_LOCAL,
        )?;
        engine.upload_to_buffer(&vertices, &vertex_buffer)?;

        let indices = &assets.mesh.indices;
        let index_buffer = allocator.create_buffer(
            "indices",
            std::mem::size_of_val(indices.as_slice()) as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            memory::DEVICE_LOCAL,
        )?;
        engine.upload_to_buffer(indices, &index_buffer)?;

        let texture = allocator.create_image(
            "base color",
            vk::Extent2D {
                width: assets.texture.width,
                height: assets.texture.height,
            },
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            memory::DEVICE_LOCAL,
        )?;
        engine.upload_to_image(&assets.texture, &texture)?;

        let scene = Scene {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            texture,
            sampler: allocator.create_sampler()?,
            uniform_buffer: allocator.create_buffer(
                "uniforms",
                std::mem::size_of::<Uniforms>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                memory::HOST_VISIBLE,
            )?,
        };

        let window = config.window_extent;
        let frame =
            FrameResources::build_if_drawable(&mut engine, &scheduler, &surface, window, &scene)?;
        log::info!(
            "Mesh renderer ready: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            frame,
            in_flight: None,
            scene,
            scheduler,
            engine,
            surface,
            window,
            fence_timeout_ns: config.fence_timeout_ns(),
            started: Instant::now(),
        })
    }

    /// Latest window size, used when the surface leaves the extent to us.
    pub fn set_window_extent(&mut self, width: u32, height: u32) {
        self.window = (width, height);
    }

    /// False while the window has no area; nothing may be drawn then.
    pub fn is_drawable(&self) -> bool {
        !is_zero_area(vk::Extent2D {
            width: self.window.0,
            height: self.window.1,
        })
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.frame.as_ref().map(|f| f.swap.extent())
    }

    fn device(&self) -> &Arc<DeviceHandle> {
        self.engine.device()
    }

    fn frame(&self) -> Result<&FrameResources, GraphicsError> {
        self.frame
            .as_ref()
            .ok_or_else(|| GraphicsError::Presentation("no swap surface".into()))
    }

    fn write_uniforms(&mut self, extent: vk::Extent2D) -> Result<(), GraphicsError> {
        let uniforms = Uniforms::at(self.started.elapsed().as_secs_f32(), extent);
        let mut mapping = self.scene.uniform_buffer.map()?;
        mapping.write(0, std::slice::from_ref(&uniforms))?;
        mapping.flush()
    }

    /// Mark the draw submitted last as done; the caller has drained the queue.
    fn settle_in_flight(&mut self) -> Result<(), GraphicsError> {
        if let (Some(index), Some(frame)) = (self.in_flight.take(), self.frame.as_mut()) {
            frame.draws[index as usize].mark_complete()?;
        }
        Ok(())
    }
}

impl FrameTarget for MeshRenderer {
    fn acquire(&mut self) -> Result<AcquireOutcome, GraphicsError> {
        // Torn down while the window had no area.
        let Some(frame) = self.frame.as_ref() else {
            return Ok(AcquireOutcome::OutOfDate);
        };
        frame.swap.acquire(&frame.image_available, self.fence_timeout_ns)
    }

    fn submit(&mut self, image_index: u32) -> Result<(), GraphicsError> {
        let extent = self.frame()?.swap.extent();
        // Host write and flush happen before the submit that reads them.
        self.write_uniforms(extent)?;

        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| GraphicsError::Presentation("no swap surface".into()))?;
        let draw = frame.draws.get_mut(image_index as usize).ok_or_else(|| {
            GraphicsError::Submission(format!("no draw recorded for image {image_index}"))
        })?;
        let sync = SubmitSync {
            wait: vec![(
                &frame.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )],
            signal: vec![&frame.render_finished],
            fence: None,
        };
        self.scheduler.submit(draw, &sync)?;
        self.in_flight = Some(image_index);
        log::trace!("Frame submitted on image {image_index}");
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome, GraphicsError> {
        let frame = self.frame()?;
        frame.swap.present(&frame.render_finished, image_index)
    }

    fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        let queue = self.scheduler.queue().queue;
        self.device().queue_wait_idle(queue)?;
        self.settle_in_flight()
    }

    fn rebuild(&mut self) -> Result<(), GraphicsError> {
        self.device().wait_idle()?;
        self.settle_in_flight()?;
        // The old surface state is gone before the new one is built.
        self.frame = None;
        self.frame = FrameResources::build_if_drawable(
            &mut self.engine,
            &self.scheduler,
            &self.surface,
            self.window,
            &self.scene,
        )?;
        Ok(())
    }
}

impl Drop for MeshRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.device().wait_idle() {
            log::warn!("Device did not go idle before renderer teardown: {e}");
        }
        if let Err(e) = self.settle_in_flight() {
            log::warn!("Failed to settle in-flight frame on teardown: {e}");
        }
    }
}
