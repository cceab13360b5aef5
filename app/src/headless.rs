//! Headless compute runner.

use std::time::{Duration, Instant};

use vkngine_graphics::vulkan::{DeviceHandle, DeviceRequirements, InstanceHandle};
use vkngine_graphics::{
    scenario_input, ComputeDispatchPath, ComputeKernel, ComputeSession, FrameCapture,
    ResourceAllocator, RuntimeConfig, TransferEngine,
};

use crate::error::AppError;

/// Seed of the generated input, fixed so runs are comparable.
pub const SCENARIO_SEED: u64 = 0x5eed;

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeSummary {
    pub kernel: &'static str,
    pub elements: usize,
    pub elapsed: Duration,
}

/// Run `kernel` over `elements` generated vectors and check every result.
pub fn run_compute(
    config: &RuntimeConfig,
    kernel: ComputeKernel,
    elements: usize,
) -> Result<ComputeSummary, AppError> {
    let instance = InstanceHandle::new(config, &[])?;
    let device = DeviceHandle::new(instance, None, DeviceRequirements::headless())?;
    let engine = TransferEngine::new(ResourceAllocator::new(device), config)?;
    let mut path =
        ComputeDispatchPath::new(engine, kernel)?.with_frame_capture(FrameCapture::connect());

    let mut session = ComputeSession::new(scenario_input(elements, SCENARIO_SEED));
    let started = Instant::now();
    path.run(&mut session)?;
    let elapsed = started.elapsed();

    verify(path.kernel(), &session)?;

    let summary = ComputeSummary {
        kernel: path.kernel().name,
        elements,
        elapsed,
    };
    log::info!(
        "Compute '{}' verified {} elements in {:.2?}",
        summary.kernel,
        summary.elements,
        summary.elapsed
    );
    Ok(summary)
}

fn verify(kernel: &ComputeKernel, session: &ComputeSession) -> Result<(), AppError> {
    let Some(index) = session.first_mismatch(kernel) else {
        return Ok(());
    };
    let expected = session
        .input
        .get(index)
        .map(|v| v.to_array().map(kernel.transform))
        .unwrap_or_default();
    let actual = session
        .output
        .get(index)
        .map(|v| v.to_array())
        .unwrap_or_default();
    Err(AppError::Mismatch {
        kernel: kernel.name,
        index,
        expected,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_accepts_expected_output() {
        let kernel = ComputeKernel::double();
        let mut session = ComputeSession::new(scenario_input(16, SCENARIO_SEED));
        session.output = kernel.expected(&session.input);
        assert!(verify(&kernel, &session).is_ok());
    }

    #[test]
    fn test_verify_reports_first_difference() {
        let kernel = ComputeKernel::passthrough();
        let mut session = ComputeSession::new(scenario_input(16, SCENARIO_SEED));
        session.output = session.input.clone();
        session.output[5].x += 1.0;
        session.output[9].x += 1.0;

        match verify(&kernel, &session) {
            Err(AppError::Mismatch { index, kernel, .. }) => {
                assert_eq!(index, 5);
                assert_eq!(kernel, "passthrough");
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_reports_short_output() {
        let kernel = ComputeKernel::passthrough();
        let mut session = ComputeSession::new(scenario_input(4, SCENARIO_SEED));
        session.output = session.input[..2].to_vec();

        match verify(&kernel, &session) {
            Err(AppError::Mismatch { index, actual, .. }) => {
                assert_eq!(index, 2);
                assert_eq!(actual, [0.0; 4]);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
}
