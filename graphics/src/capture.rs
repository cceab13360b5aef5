//! Optional RenderDoc frame capture around headless work.
//!
//! With the `renderdoc` feature, [`FrameCapture::connect`] attaches to a
//! RenderDoc instance already injected into the process. Without the feature,
//! or when no instance is present, every capture call is a no-op.

#[cfg(feature = "renderdoc")]
use std::ffi::c_void;

#[cfg(feature = "renderdoc")]
use renderdoc::{RenderDoc, V110};

pub struct FrameCapture {
    #[cfg(feature = "renderdoc")]
    api: Option<RenderDoc<V110>>,
    active: bool,
    captures: u64,
}

impl FrameCapture {
    /// A capture that never records anything.
    pub fn disabled() -> Self {
        Self {
            #[cfg(feature = "renderdoc")]
            api: None,
            active: false,
            captures: 0,
        }
    }

    /// Attach to RenderDoc if it is loaded, otherwise log and continue
    /// without capturing.
    #[cfg(feature = "renderdoc")]
    pub fn connect() -> Self {
        match RenderDoc::<V110>::new() {
            Ok(api) => {
                let (major, minor, patch) = api.get_api_version();
                log::info!("RenderDoc API {major}.{minor}.{patch} attached, capturing compute runs");
                Self {
                    api: Some(api),
                    ..Self::disabled()
                }
            }
            Err(e) => {
                log::warn!("RenderDoc not available, running without capture: {e}");
                Self::disabled()
            }
        }
    }

    #[cfg(not(feature = "renderdoc"))]
    pub fn connect() -> Self {
        log::debug!("Built without the renderdoc feature, frame capture disabled");
        Self::disabled()
    }

    #[cfg(feature = "renderdoc")]
    pub fn is_available(&self) -> bool {
        self.api.is_some()
    }

    #[cfg(not(feature = "renderdoc"))]
    pub fn is_available(&self) -> bool {
        false
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of captures ended so far.
    pub fn captures(&self) -> u64 {
        self.captures
    }

    /// Begin capturing every device and window. Nested starts are ignored.
    pub fn start(&mut self) {
        if self.active || !self.is_available() {
            return;
        }
        self.signal(true);
        self.active = true;
    }

    /// End the capture begun by [`Self::start`], if any.
    pub fn end(&mut self) {
        if !self.active {
            return;
        }
        self.signal(false);
        self.active = false;
        self.captures += 1;
        log::debug!("Frame capture {} ended", self.captures);
    }

    /// Null device and window pointers select every device and window.
    #[cfg(feature = "renderdoc")]
    fn signal(&mut self, starting: bool) {
        let Some(api) = self.api.as_mut() else {
            return;
        };
        let device: *const c_void = std::ptr::null();
        if starting {
            api.start_frame_capture(device, std::ptr::null());
        } else {
            api.end_frame_capture(device, std::ptr::null());
        }
    }

    #[cfg(not(feature = "renderdoc"))]
    fn signal(&mut self, _starting: bool) {}
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Drop for FrameCapture {
    fn drop(&mut self) {
        if self.active {
            log::warn!("Frame capture dropped while active, ending it");
            self.end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_capture_is_inert() {
        let mut capture = FrameCapture::disabled();
        assert!(!capture.is_available());

        capture.start();
        assert!(!capture.is_active());
        capture.end();
        assert_eq!(capture.captures(), 0);
    }

    #[test]
    fn test_connect_without_renderdoc_continues() {
        // No RenderDoc is injected under the test harness.
        let mut capture = FrameCapture::connect();
        capture.start();
        capture.end();
        if !capture.is_available() {
            assert_eq!(capture.captures(), 0);
        }
    }
}
