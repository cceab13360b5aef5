//! Command line arguments.
//!
//! Every flag is optional; running with no arguments opens the textured
//! mesh window with the default [`RuntimeConfig`].
//!
//! ```bash
//! # Textured mesh with a procedural cube and checkerboard
//! ./vkngine
//!
//! # Your own assets, validation on
//! ./vkngine --mesh model.gltf --texture albedo.png --validation
//!
//! # Headless compute check on 4096 vectors
//! ./vkngine --mode passthrough --elements 4096
//!
//! # Run for 100 frames then exit (useful for testing)
//! ./vkngine --max-frames 100
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use vkngine_graphics::{ComputeKernel, RuntimeConfig};

/// What the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RunMode {
    /// Windowed renderer presenting a rotating textured mesh.
    #[default]
    TexturedMesh,
    /// Headless compute: copy every vector through unchanged.
    Passthrough,
    /// Headless compute: double the first component of every vector.
    Double,
}

impl RunMode {
    /// The compute kernel for headless modes, `None` for the windowed one.
    pub fn kernel(self) -> Option<ComputeKernel> {
        match self {
            Self::TexturedMesh => None,
            Self::Passthrough => Some(ComputeKernel::passthrough()),
            Self::Double => Some(ComputeKernel::double()),
        }
    }

    pub fn is_headless(self) -> bool {
        self.kernel().is_some()
    }
}

/// VKNgine arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "vkngine",
    about = "Vulkan textured mesh renderer and headless compute check",
    version
)]
pub struct AppArgs {
    /// What to run.
    #[arg(long, default_value = "textured-mesh", value_enum)]
    pub mode: RunMode,

    /// Enable GPU validation layers (slower but helps catch bugs).
    #[arg(long, conflicts_with = "no_validation")]
    pub validation: bool,

    /// Disable GPU validation layers.
    #[arg(long, conflicts_with = "validation")]
    pub no_validation: bool,

    /// Upper bound on every fence wait and swapchain acquire, in milliseconds.
    #[arg(long)]
    pub fence_timeout_ms: Option<u64>,

    /// glTF mesh to render. A cube is used when omitted.
    #[arg(long)]
    pub mesh: Option<PathBuf>,

    /// Image to texture the mesh with. A checkerboard is used when omitted.
    #[arg(long)]
    pub texture: Option<PathBuf>,

    /// Number of vectors for the headless compute modes.
    #[arg(long, default_value = "1024")]
    pub elements: usize,

    /// Exit after presenting N frames.
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Initial window width in pixels.
    #[arg(long)]
    pub width: Option<u32>,

    /// Initial window height in pixels.
    #[arg(long)]
    pub height: Option<u32>,
}

impl AppArgs {
    /// Fold the flags over [`RuntimeConfig::default`].
    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        // --validation forces on, --no-validation forces off, otherwise the build default.
        if self.validation {
            config = config.with_validation(true);
        } else if self.no_validation {
            config = config.with_validation(false);
        }
        if let Some(ms) = self.fence_timeout_ms {
            config = config.with_fence_timeout(Duration::from_millis(ms));
        }
        let (width, height) = config.window_extent;
        config.with_window_extent(self.width.unwrap_or(width), self.height.unwrap_or(height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> AppArgs {
        AppArgs::try_parse_from(std::iter::once("vkngine").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_arguments_uses_defaults() {
        let args = parse(&[]);
        assert_eq!(args.mode, RunMode::TexturedMesh);
        assert_eq!(args.elements, 1024);
        assert!(args.mesh.is_none());
        assert!(args.max_frames.is_none());
        assert_eq!(args.runtime_config(), RuntimeConfig::default());
    }

    #[rstest]
    #[case("textured-mesh", RunMode::TexturedMesh, false)]
    #[case("passthrough", RunMode::Passthrough, true)]
    #[case("double", RunMode::Double, true)]
    fn test_mode_values(#[case] value: &str, #[case] mode: RunMode, #[case] headless: bool) {
        let args = parse(&["--mode", value]);
        assert_eq!(args.mode, mode);
        assert_eq!(args.mode.is_headless(), headless);
    }

    #[test]
    fn test_kernel_per_mode() {
        assert!(RunMode::TexturedMesh.kernel().is_none());
        assert_eq!(RunMode::Passthrough.kernel().unwrap().name, "passthrough");
        assert_eq!(RunMode::Double.kernel().unwrap().name, "double");
    }

    #[test]
    fn test_flags_reach_config() {
        let config = parse(&[
            "--no-validation",
            "--fence-timeout-ms",
            "250",
            "--width",
            "1024",
        ])
        .runtime_config();
        assert!(!config.validation);
        assert_eq!(config.fence_timeout, Duration::from_millis(250));
        assert_eq!(config.window_extent, (1024, 600));

        assert!(parse(&["--validation"]).runtime_config().validation);
    }

    #[test]
    fn test_validation_flags_conflict() {
        assert!(AppArgs::try_parse_from(["vkngine", "--validation", "--no-validation"]).is_err());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(AppArgs::try_parse_from(["vkngine", "--mode", "sort"]).is_err());
    }
}
