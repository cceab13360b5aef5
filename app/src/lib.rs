//! # VKNgine App
//!
//! Process entry for VKNgine: a windowed textured mesh renderer and a
//! headless compute check, selected by [`RunMode`].
//!
//! ## Overview
//!
//! - [`AppArgs`] - Optional command line flags folded over the default configuration
//! - [`App`] - winit event loop driving the presentation state machine
//! - [`run_compute`] - Upload, dispatch, read back and verify on a headless device
//! - [`AppError`] - Error wrapper that decides how the process ends

mod app;
mod args;
mod error;
mod headless;

pub use app::{scene_assets, App};
pub use args::{AppArgs, RunMode};
pub use error::{AppError, ExitPolicy};
pub use headless::{run_compute, ComputeSummary, SCENARIO_SEED};

/// App library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the app subsystem.
pub fn init() {
    log::info!("VKNgine App v{} initialized", VERSION);
}

/// Run whatever `args` selects.
pub fn run(args: AppArgs) -> Result<(), AppError> {
    match args.mode.kernel() {
        Some(kernel) => run_compute(&args.runtime_config(), kernel, args.elements).map(|_| ()),
        None => App::run(args),
    }
}
