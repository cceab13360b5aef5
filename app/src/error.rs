//! Application errors and the process exit policy.

use thiserror::Error;
use vkngine_core::AssetError;
use vkngine_graphics::GraphicsError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("asset load failed: {0}")]
    AssetLoad(#[from] AssetError),

    #[error(transparent)]
    Graphics(#[from] GraphicsError),

    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("window creation failed: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("{kernel} output differs at element {index}: expected {expected:?}, got {actual:?}")]
    Mismatch {
        kernel: &'static str,
        index: usize,
        expected: [f32; 4],
        actual: [f32; 4],
    },
}

/// How the process ends after an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Orderly exit with this code.
    Exit(i32),
    /// Abort without unwinding a half-built device context.
    Abort,
}

impl AppError {
    pub fn exit_policy(&self) -> ExitPolicy {
        match self {
            Self::AssetLoad(_) | Self::Graphics(GraphicsError::ShaderLoad(_)) => ExitPolicy::Exit(1),
            Self::Mismatch { .. } => ExitPolicy::Exit(2),
            _ => ExitPolicy::Abort,
        }
    }

    /// Log the error and end the process according to [`AppError::exit_policy`].
    pub fn terminate(self) -> ! {
        log::error!("{self}");
        match self.exit_policy() {
            ExitPolicy::Exit(code) => std::process::exit(code),
            ExitPolicy::Abort => std::process::abort(),
        }
    }
}
