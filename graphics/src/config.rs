//! Runtime configuration.

use std::time::Duration;

/// Tunables for device creation, synchronization and the window.
///
/// There is no configuration file; the binary fills this from optional
/// command-line flags and otherwise uses [`RuntimeConfig::default`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Request the Khronos validation layer and a debug messenger.
    pub validation: bool,
    /// Bound on every host-side fence wait and on swapchain acquire.
    /// Elapsing is a fatal wait failure.
    pub fence_timeout: Duration,
    pub application_name: String,
    pub window_extent: (u32, u32),
    /// Quiet period after the last resize event before the swap surface
    /// is rebuilt.
    pub resize_debounce: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            fence_timeout: Duration::from_secs(10),
            application_name: String::from("VKNgine"),
            window_extent: (800, 600),
            resize_debounce: Duration::from_millis(100),
        }
    }
}

impl RuntimeConfig {
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn with_window_extent(mut self, width: u32, height: u32) -> Self {
        self.window_extent = (width, height);
        self
    }

    pub fn with_resize_debounce(mut self, debounce: Duration) -> Self {
        self.resize_debounce = debounce;
        self
    }

    /// Fence timeout in the nanosecond form the driver expects, saturated
    /// at `u64::MAX`.
    pub fn fence_timeout_ns(&self) -> u64 {
        u64::try_from(self.fence_timeout.as_nanos()).unwrap_or(u64::MAX)
    }
}
