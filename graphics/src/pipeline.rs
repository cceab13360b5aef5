//! Pipeline descriptors and the single builder for graphics and compute
//! pipelines.
//!
//! A [`PipelineDescriptor`] is plain data: shader stages, descriptor
//! bindings and fixed-function state. [`build_pipeline`] turns any
//! descriptor into a [`Pipeline`]; the family (graphics or compute) is
//! derived from the stages. Each pipeline owns its own descriptor-set layout,
//! created unconditionally at build time.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::error::GraphicsError;
use crate::shader::{ShaderModule, ShaderStage, ShaderStageDesc};
use crate::vulkan::DeviceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer,
    SampledTexture,
    Sampler,
}

impl BindingKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::SampledTexture => vk::DescriptorType::SAMPLED_IMAGE,
            Self::Sampler => vk::DescriptorType::SAMPLER,
        }
    }
}

/// One binding of set 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingDesc {
    pub binding: u32,
    pub kind: BindingKind,
    pub stages: vk::ShaderStageFlags,
}

impl BindingDesc {
    pub fn new(binding: u32, kind: BindingKind, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            kind,
            stages,
        }
    }
}

/// Interleaved vertex buffer layout at binding 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    /// `(location, format, offset)`
    pub attributes: Vec<(u32, vk::Format, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFunctionState {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFamily {
    Graphics,
    Compute,
}

impl PipelineFamily {
    pub fn bind_point(self) -> vk::PipelineBindPoint {
        match self {
            Self::Graphics => vk::PipelineBindPoint::GRAPHICS,
            Self::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

/// Render pass and extent a graphics pipeline is built against.
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    pub label: String,
    pub stages: Vec<ShaderStageDesc>,
    pub bindings: Vec<BindingDesc>,
    pub vertex_layout: Option<VertexLayout>,
    pub fixed_function: FixedFunctionState,
}

impl PipelineDescriptor {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stages: Vec::new(),
            bindings: Vec::new(),
            vertex_layout: None,
            fixed_function: FixedFunctionState::default(),
        }
    }

    pub fn with_stage(mut self, stage: ShaderStageDesc) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_binding(mut self, binding: BindingDesc) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn with_vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = Some(layout);
        self
    }

    pub fn with_fixed_function(mut self, state: FixedFunctionState) -> Self {
        self.fixed_function = state;
        self
    }

    /// Derive the pipeline family from the stages.
    ///
    /// A lone compute stage is a compute pipeline; a vertex stage with an
    /// optional fragment stage is a graphics pipeline. Anything else is a
    /// configuration error.
    pub fn family(&self) -> Result<PipelineFamily, GraphicsError> {
        let count = |stage: ShaderStage| self.stages.iter().filter(|s| s.stage == stage).count();
        match (
            count(ShaderStage::Vertex),
            count(ShaderStage::Fragment),
            count(ShaderStage::Compute),
        ) {
            (0, 0, 1) => Ok(PipelineFamily::Compute),
            (1, 0 | 1, 0) => Ok(PipelineFamily::Graphics),
            (v, f, c) => Err(GraphicsError::Configuration(format!(
                "pipeline '{}' has {v} vertex, {f} fragment and {c} compute stages",
                self.label
            ))),
        }
    }

    pub fn validate_bindings(&self) -> Result<(), GraphicsError> {
        for (i, a) in self.bindings.iter().enumerate() {
            if self.bindings[..i].iter().any(|b| b.binding == a.binding) {
                return Err(GraphicsError::Configuration(format!(
                    "pipeline '{}' declares binding {} twice",
                    self.label, a.binding
                )));
            }
        }
        Ok(())
    }
}

/// Built pipeline with its layout and descriptor-set layout.
pub struct Pipeline {
    device: Arc<DeviceHandle>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    family: PipelineFamily,
    bindings: Vec<BindingDesc>,
    label: String,
}

impl Pipeline {
    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    pub fn family(&self) -> PipelineFamily {
        self.family
    }

    pub fn bindings(&self) -> &[BindingDesc] {
        &self.bindings
    }

    pub fn binding(&self, binding: u32) -> Option<&BindingDesc> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Null handles from a failed build are ignored by the driver.
        unsafe {
            let device = self.device.raw();
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Build a graphics or compute pipeline from `desc`.
///
/// Graphics pipelines need `target`; their viewport and scissor are fixed to
/// its extent, so they are rebuilt whenever the swap surface is.
pub fn build_pipeline(
    device: &Arc<DeviceHandle>,
    desc: &PipelineDescriptor,
    target: Option<RenderTarget>,
) -> Result<Pipeline, GraphicsError> {
    let family = desc.family()?;
    desc.validate_bindings()?;

    // Load every stage before creating any device object.
    let code = desc
        .stages
        .iter()
        .map(ShaderStageDesc::spirv)
        .collect::<Result<Vec<_>, _>>()?;

    let raw = device.raw();
    let mut pipeline = Pipeline {
        device: Arc::clone(device),
        pipeline: vk::Pipeline::null(),
        layout: vk::PipelineLayout::null(),
        set_layout: vk::DescriptorSetLayout::null(),
        family,
        bindings: desc.bindings.clone(),
        label: desc.label.clone(),
    };

    let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
        .bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(b.binding)
                .descriptor_type(b.kind.descriptor_type())
                .descriptor_count(1)
                .stage_flags(b.stages)
        })
        .collect();
    let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
    pipeline.set_layout = unsafe { raw.create_descriptor_set_layout(&set_layout_info, None) }
        .map_err(|e| GraphicsError::creation(format!("{} set layout", desc.label), e))?;

    let set_layouts = [pipeline.set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    pipeline.layout = unsafe { raw.create_pipeline_layout(&layout_info, None) }
        .map_err(|e| GraphicsError::creation(format!("{} layout", desc.label), e))?;

    let modules = code
        .iter()
        .map(|words| ShaderModule::new(Arc::clone(device), words))
        .collect::<Result<Vec<_>, _>>()?;
    let entry_points = desc
        .stages
        .iter()
        .map(|s| {
            CString::new(s.entry_point.as_str()).map_err(|_| {
                GraphicsError::ShaderLoad(format!("entry point '{}' contains NUL", s.entry_point))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = desc
        .stages
        .iter()
        .zip(&modules)
        .zip(&entry_points)
        .map(|((stage, module), name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage.stage.to_vk())
                .module(module.raw())
                .name(name)
        })
        .collect();

    pipeline.pipeline = match family {
        PipelineFamily::Compute => {
            let create_info = vk::ComputePipelineCreateInfo::default()
                .stage(stage_infos[0])
                .layout(pipeline.layout);
            unsafe {
                raw.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
            }
            .map_err(|(_, e)| GraphicsError::creation(&desc.label, e))?[0]
        }
        PipelineFamily::Graphics => {
            let target = target.ok_or_else(|| {
                GraphicsError::Configuration(format!(
                    "graphics pipeline '{}' needs a render target",
                    desc.label
                ))
            })?;
            create_graphics_pipeline(raw, desc, &stage_infos, pipeline.layout, target)?
        }
    };

    log::info!("Built {:?} pipeline '{}'", family, desc.label);
    Ok(pipeline)
}

fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &PipelineDescriptor,
    stages: &[vk::PipelineShaderStageCreateInfo],
    layout: vk::PipelineLayout,
    target: RenderTarget,
) -> Result<vk::Pipeline, GraphicsError> {
    let fixed = &desc.fixed_function;

    let (vertex_bindings, vertex_attributes) = match &desc.vertex_layout {
        Some(layout) => (
            vec![vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(layout.stride)
                .input_rate(vk::VertexInputRate::VERTEX)],
            layout
                .attributes
                .iter()
                .map(|&(location, format, offset)| {
                    vk::VertexInputAttributeDescription::default()
                        .binding(0)
                        .location(location)
                        .format(format)
                        .offset(offset)
                })
                .collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let input_assembly =
        vk::PipelineInputAssemblyStateCreateInfo::default().topology(fixed.topology);

    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: target.extent.width as f32,
        height: target.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent: target.extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(fixed.polygon_mode)
        .cull_mode(fixed.cull_mode)
        .front_face(fixed.front_face)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(fixed.depth_test)
        .depth_write_enable(fixed.depth_test)
        .depth_compare_op(vk::CompareOp::LESS);

    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .layout(layout)
        .render_pass(target.render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| GraphicsError::creation(&desc.label, e))?;
    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::builtin;

    fn compute_stage() -> ShaderStageDesc {
        ShaderStageDesc::wgsl(ShaderStage::Compute, builtin::PASSTHROUGH, "main")
    }

    #[test]
    fn test_family_compute() {
        let desc = PipelineDescriptor::new("compute").with_stage(compute_stage());
        assert_eq!(desc.family().unwrap(), PipelineFamily::Compute);
        assert_eq!(
            PipelineFamily::Compute.bind_point(),
            vk::PipelineBindPoint::COMPUTE
        );
    }

    #[test]
    fn test_family_graphics() {
        let desc = PipelineDescriptor::new("mesh")
            .with_stage(ShaderStageDesc::wgsl(ShaderStage::Vertex, builtin::MESH, "vs_main"))
            .with_stage(ShaderStageDesc::wgsl(ShaderStage::Fragment, builtin::MESH, "fs_main"));
        assert_eq!(desc.family().unwrap(), PipelineFamily::Graphics);
    }

    #[test]
    fn test_family_rejects_mixed_and_empty() {
        let mixed = PipelineDescriptor::new("mixed")
            .with_stage(compute_stage())
            .with_stage(ShaderStageDesc::wgsl(ShaderStage::Vertex, builtin::MESH, "vs_main"));
        assert!(matches!(mixed.family(), Err(GraphicsError::Configuration(_))));
        assert!(PipelineDescriptor::new("empty").family().is_err());

        let fragment_only = PipelineDescriptor::new("fragment")
            .with_stage(ShaderStageDesc::wgsl(ShaderStage::Fragment, builtin::MESH, "fs_main"));
        assert!(fragment_only.family().is_err());
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let desc = PipelineDescriptor::new("dup")
            .with_stage(compute_stage())
            .with_binding(BindingDesc::new(
                0,
                BindingKind::StorageBuffer,
                vk::ShaderStageFlags::COMPUTE,
            ))
            .with_binding(BindingDesc::new(
                0,
                BindingKind::UniformBuffer,
                vk::ShaderStageFlags::COMPUTE,
            ));
        assert!(desc.validate_bindings().is_err());
    }

    #[test]
    fn test_descriptor_types() {
        assert_eq!(
            BindingKind::StorageBuffer.descriptor_type(),
            vk::DescriptorType::STORAGE_BUFFER
        );
        assert_eq!(
            BindingKind::SampledTexture.descriptor_type(),
            vk::DescriptorType::SAMPLED_IMAGE
        );
    }

    #[test]
    fn test_default_fixed_function() {
        let state = FixedFunctionState::default();
        assert_eq!(state.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(state.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert!(state.depth_test);
    }
}
