//! Windowed frame loop: acquire, submit, present, and rebuild on surface
//! invalidation.
//!
//! The state machine is independent of Vulkan. It drives a [`FrameTarget`],
//! which the mesh renderer implements over a real swapchain and tests
//! implement with a scripted mock.

use crate::error::GraphicsError;

/// Result of asking the surface for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready. A suboptimal surface still presents correctly, so
    /// the frame proceeds.
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented, but the swap surface no longer matches the window.
    Suboptimal,
    /// Not presented; the swap surface must be rebuilt.
    OutOfDate,
}

/// Everything the state machine needs from a presentable target.
pub trait FrameTarget {
    /// Request the next image, guarded by the image-available marker.
    fn acquire(&mut self) -> Result<AcquireOutcome, GraphicsError>;

    /// Submit the sequence for `image_index`, waiting on image-available at
    /// the color-output stage and signaling render-finished.
    fn submit(&mut self, image_index: u32) -> Result<(), GraphicsError>;

    /// Present `image_index` once render-finished signals.
    fn present(&mut self, image_index: u32) -> Result<PresentOutcome, GraphicsError>;

    /// Block until the queue is idle before the next acquire.
    fn wait_idle(&mut self) -> Result<(), GraphicsError>;

    /// Drain the device and replace every swap-sized resource as one unit.
    fn rebuild(&mut self) -> Result<(), GraphicsError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentState {
    Acquire,
    Submit { image_index: u32 },
    Present { image_index: u32 },
    Rebuild,
}

/// What one call to [`PresentationStateMachine::draw_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// A rebuild ran before any image was presented.
    Rebuilt,
    /// An image was presented and the swap surface was rebuilt after it.
    PresentedThenRebuilt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentationStats {
    pub frames_presented: u64,
    pub rebuilds: u64,
    pub suboptimal_acquires: u64,
}

pub struct PresentationStateMachine {
    state: PresentState,
    rebuild_requested: bool,
    stats: PresentationStats,
}

impl Default for PresentationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationStateMachine {
    pub fn new() -> Self {
        Self {
            state: PresentState::Acquire,
            rebuild_requested: false,
            stats: PresentationStats::default(),
        }
    }

    pub fn state(&self) -> PresentState {
        self.state
    }

    pub fn stats(&self) -> PresentationStats {
        self.stats
    }

    /// Rebuild before the next acquire, e.g. after a window resize.
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_requested
    }

    /// Perform exactly one transition and return the new state.
    pub fn step<T: FrameTarget>(&mut self, target: &mut T) -> Result<PresentState, GraphicsError> {
        self.state = match self.state {
            PresentState::Acquire if self.rebuild_requested => PresentState::Rebuild,
            PresentState::Acquire => match transient_as(target.acquire(), AcquireOutcome::OutOfDate)? {
                AcquireOutcome::Ready {
                    image_index,
                    suboptimal,
                } => {
                    if suboptimal {
                        log::debug!("Acquired image {image_index} from a suboptimal surface");
                        self.stats.suboptimal_acquires += 1;
                    }
                    PresentState::Submit { image_index }
                }
                AcquireOutcome::OutOfDate => {
                    log::debug!("Surface out of date at acquire");
                    PresentState::Rebuild
                }
            },
            PresentState::Submit { image_index } => {
                target.submit(image_index)?;
                PresentState::Present { image_index }
            }
            PresentState::Present { image_index } => {
                match transient_as(target.present(image_index), PresentOutcome::OutOfDate)? {
                    PresentOutcome::Presented => {
                        self.stats.frames_presented += 1;
                        target.wait_idle()?;
                        PresentState::Acquire
                    }
                    PresentOutcome::Suboptimal => {
                        log::debug!("Surface suboptimal at present");
                        self.stats.frames_presented += 1;
                        PresentState::Rebuild
                    }
                    PresentOutcome::OutOfDate => {
                        log::debug!("Surface out of date at present");
                        PresentState::Rebuild
                    }
                }
            }
            PresentState::Rebuild => {
                target.rebuild()?;
                self.rebuild_requested = false;
                self.stats.rebuilds += 1;
                log::info!("Swap surface rebuilt ({} total)", self.stats.rebuilds);
                PresentState::Acquire
            }
        };
        log::trace!("Presentation state -> {:?}", self.state);
        Ok(self.state)
    }

    /// Step until the machine is back at `Acquire`.
    ///
    /// Any error other than a transient surface error is returned and is
    /// fatal for the caller.
    pub fn draw_frame<T: FrameTarget>(&mut self, target: &mut T) -> Result<FrameOutcome, GraphicsError> {
        let presented_before = self.stats.frames_presented;
        let rebuilds_before = self.stats.rebuilds;

        loop {
            if self.step(target)? == PresentState::Acquire {
                break;
            }
        }

        let presented = self.stats.frames_presented > presented_before;
        let rebuilt = self.stats.rebuilds > rebuilds_before;
        Ok(match (presented, rebuilt) {
            (true, true) => FrameOutcome::PresentedThenRebuilt,
            (false, _) => FrameOutcome::Rebuilt,
            (true, false) => FrameOutcome::Presented,
        })
    }
}

/// Map a transient surface error onto the outcome that triggers a rebuild.
fn transient_as<O>(result: Result<O, GraphicsError>, rebuild: O) -> Result<O, GraphicsError> {
    match result {
        Err(e) if e.is_transient() => Ok(rebuild),
        other => other,
    }
}
