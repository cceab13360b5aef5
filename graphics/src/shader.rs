//! Shader sources and SPIR-V loading.
//!
//! Stages come either from a precompiled SPIR-V file or from WGSL compiled
//! to SPIR-V with naga when the pipeline is built.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;

use crate::error::GraphicsError;
use crate::vulkan::DeviceHandle;

/// Built-in WGSL sources.
pub mod builtin {
    /// Textured mesh: `vs_main` / `fs_main`.
    pub const MESH: &str = include_str!("shaders/mesh.wgsl");
    /// Identity compute kernel over `array<vec4<f32>>`: `main`.
    pub const PASSTHROUGH: &str = include_str!("shaders/passthrough.wgsl");
    /// Doubling compute kernel over `array<vec4<f32>>`: `main`.
    pub const DOUBLE: &str = include_str!("shaders/double.wgsl");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    fn to_naga(self) -> naga::ShaderStage {
        match self {
            Self::Vertex => naga::ShaderStage::Vertex,
            Self::Fragment => naga::ShaderStage::Fragment,
            Self::Compute => naga::ShaderStage::Compute,
        }
    }
}

/// Where a stage's bytecode comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    Wgsl(Cow<'static, str>),
    SpirvFile(PathBuf),
}

/// One programmable stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStageDesc {
    pub stage: ShaderStage,
    pub source: ShaderSource,
    pub entry_point: String,
}

impl ShaderStageDesc {
    pub fn wgsl(stage: ShaderStage, source: impl Into<Cow<'static, str>>, entry_point: &str) -> Self {
        Self {
            stage,
            source: ShaderSource::Wgsl(source.into()),
            entry_point: entry_point.to_string(),
        }
    }

    pub fn spirv_file(stage: ShaderStage, path: impl Into<PathBuf>, entry_point: &str) -> Self {
        Self {
            stage,
            source: ShaderSource::SpirvFile(path.into()),
            entry_point: entry_point.to_string(),
        }
    }

    /// Produce SPIR-V words for this stage.
    pub fn spirv(&self) -> Result<Vec<u32>, GraphicsError> {
        match &self.source {
            ShaderSource::Wgsl(source) => compile_wgsl(source, self.stage, &self.entry_point),
            ShaderSource::SpirvFile(path) => load_spirv(path),
        }
    }
}

/// Read a precompiled SPIR-V binary.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, GraphicsError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| GraphicsError::ShaderLoad(format!("{}: {e}", path.display())))?;
    ash::util::read_spv(&mut file)
        .map_err(|e| GraphicsError::ShaderLoad(format!("{}: {e}", path.display())))
}

/// Compile WGSL to SPIR-V for a single entry point.
pub fn compile_wgsl(
    source: &str,
    stage: ShaderStage,
    entry_point: &str,
) -> Result<Vec<u32>, GraphicsError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| GraphicsError::ShaderLoad(format!("WGSL parse error: {e}")))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| GraphicsError::ShaderLoad(format!("validation error: {e}")))?;

    let naga_stage = stage.to_naga();
    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == naga_stage)
    {
        return Err(GraphicsError::ShaderLoad(format!(
            "entry point '{entry_point}' not found for stage {stage:?}"
        )));
    }

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::empty(),
        capabilities: None,
        bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| GraphicsError::ShaderLoad(format!("SPIR-V generation error: {e}")))
}

/// Owned `VkShaderModule`, only needed until its pipeline is created.
pub(crate) struct ShaderModule {
    device: Arc<DeviceHandle>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    pub(crate) fn new(device: Arc<DeviceHandle>, code: &[u32]) -> Result<Self, GraphicsError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { device.raw().create_shader_module(&create_info, None) }
            .map_err(|e| GraphicsError::creation("shader module", e))?;
        Ok(Self { device, module })
    }

    pub(crate) fn raw(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_builtin_mesh_compiles() {
        let vs = compile_wgsl(builtin::MESH, ShaderStage::Vertex, "vs_main").unwrap();
        let fs = compile_wgsl(builtin::MESH, ShaderStage::Fragment, "fs_main").unwrap();
        assert_eq!(vs[0], SPIRV_MAGIC);
        assert_eq!(fs[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_builtin_kernels_compile() {
        for source in [builtin::PASSTHROUGH, builtin::DOUBLE] {
            let spv = compile_wgsl(source, ShaderStage::Compute, "main").unwrap();
            assert_eq!(spv[0], SPIRV_MAGIC);
        }
    }

    #[test]
    fn test_wrong_stage_entry_point() {
        let err = compile_wgsl(builtin::PASSTHROUGH, ShaderStage::Vertex, "main").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderLoad(_)));
    }

    #[test]
    fn test_invalid_wgsl() {
        let err = compile_wgsl("fn broken(", ShaderStage::Compute, "main").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderLoad(_)));
    }

    #[test]
    fn test_missing_spirv_file() {
        let desc = ShaderStageDesc::spirv_file(
            ShaderStage::Compute,
            "shaders/does-not-exist.spv",
            "main",
        );
        assert!(matches!(desc.spirv(), Err(GraphicsError::ShaderLoad(_))));
    }

    #[test]
    fn test_spirv_file_round_trip() {
        let words = compile_wgsl(builtin::DOUBLE, ShaderStage::Compute, "main").unwrap();
        let path = std::env::temp_dir().join(format!("vkngine-double-{}.spv", std::process::id()));
        std::fs::write(&path, bytemuck::cast_slice::<u32, u8>(&words)).unwrap();

        let loaded = load_spirv(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, words);
    }

    #[test]
    fn test_truncated_spirv_file() {
        let path = std::env::temp_dir().join(format!("vkngine-short-{}.spv", std::process::id()));
        std::fs::write(&path, [0x03u8, 0x02, 0x23]).unwrap();
        let result = load_spirv(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(GraphicsError::ShaderLoad(_))));
    }
}
