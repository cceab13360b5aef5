//! Window resize debouncing.
//!
//! During a drag-resize the OS sends a burst of resize events. Rebuilding
//! the swap surface for each one stalls the device every time, so
//! [`ResizeManager`] buffers them and reports a single resize once the
//! window has been quiet for the debounce period:
//!
//! ```text
//! Events:  R  R  R  R  R  R  ... R [quiet period]
//!          └──────────────────────┘      │
//!            (events buffered)           ▼
//!                              One swap surface rebuild
//! ```
//!
//! A zero-area size (minimized window) is not buffered. It marks the window
//! as minimized immediately so the frame loop stops drawing; the next
//! non-zero size is debounced as usual.

use std::time::{Duration, Instant};

/// A resize that should be applied now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    pub width: u32,
    pub height: u32,
    pub previous_width: u32,
    pub previous_height: u32,
}

#[derive(Debug)]
pub struct ResizeManager {
    /// Latest size not yet applied.
    pending_size: Option<(u32, u32)>,
    last_event_time: Instant,
    debounce: Duration,
    /// Size the swap surface was last built for.
    current_size: (u32, u32),
    minimized: bool,
}

impl ResizeManager {
    pub fn new(initial_size: (u32, u32), debounce: Duration) -> Self {
        Self {
            pending_size: None,
            last_event_time: Instant::now(),
            debounce,
            current_size: initial_size,
            minimized: initial_size.0 == 0 || initial_size.1 == 0,
        }
    }

    /// Record an OS resize event.
    pub fn on_resize_event(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            if !self.minimized {
                log::debug!("Window minimized");
            }
            self.minimized = true;
            self.pending_size = None;
            return;
        }
        let new_size = (width, height);
        let restored = std::mem::replace(&mut self.minimized, false);

        // Coming back from minimized always needs a rebuild.
        if !restored && (Some(new_size) == self.pending_size || new_size == self.current_size) {
            return;
        }

        self.pending_size = Some(new_size);
        self.last_event_time = Instant::now();
        log::trace!(
            "Resize event: {}x{} (pending, debounce={}ms)",
            width,
            height,
            self.debounce.as_millis()
        );
    }

    /// Returns the resize to apply once the quiet period has elapsed.
    ///
    /// Call once per frame.
    pub fn update(&mut self) -> Option<ResizeEvent> {
        if self.last_event_time.elapsed() < self.debounce {
            return None;
        }
        self.apply_pending()
    }

    /// Apply a pending resize without waiting for the quiet period.
    pub fn force_resize(&mut self) -> Option<ResizeEvent> {
        self.apply_pending()
    }

    fn apply_pending(&mut self) -> Option<ResizeEvent> {
        let (width, height) = self.pending_size.take()?;
        let previous = std::mem::replace(&mut self.current_size, (width, height));
        log::debug!(
            "Resize applied: {}x{} -> {}x{}",
            previous.0,
            previous.1,
            width,
            height
        );
        Some(ResizeEvent {
            width,
            height,
            previous_width: previous.0,
            previous_height: previous.1,
        })
    }

    pub fn swapchain_size(&self) -> (u32, u32) {
        self.current_size
    }

    pub fn pending_size(&self) -> Option<(u32, u32)> {
        self.pending_size
    }

    pub fn is_resizing(&self) -> bool {
        self.pending_size.is_some()
    }

    /// True while the window has no area; nothing should be drawn.
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Time left before the pending resize is reported.
    pub fn remaining_debounce(&self) -> Duration {
        if self.pending_size.is_some() {
            self.debounce.saturating_sub(self.last_event_time.elapsed())
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn manager(debounce_ms: u64) -> ResizeManager {
        ResizeManager::new((1920, 1080), Duration::from_millis(debounce_ms))
    }

    #[test]
    fn test_new() {
        let manager = manager(50);
        assert_eq!(manager.swapchain_size(), (1920, 1080));
        assert!(!manager.is_resizing());
        assert!(!manager.is_minimized());
        assert!(manager.pending_size().is_none());
    }

    #[test]
    fn test_resize_event_sets_pending() {
        let mut manager = manager(50);
        manager.on_resize_event(1024, 768);

        assert!(manager.is_resizing());
        assert_eq!(manager.pending_size(), Some((1024, 768)));
        assert_eq!(manager.swapchain_size(), (1920, 1080));
    }

    #[test]
    fn test_duplicate_event_ignored() {
        let mut manager = manager(50);
        manager.on_resize_event(1024, 768);
        let first_time = manager.last_event_time;

        thread::sleep(Duration::from_millis(5));
        manager.on_resize_event(1024, 768);
        assert_eq!(manager.last_event_time, first_time);

        manager.on_resize_event(1920, 1080);
        assert_eq!(manager.pending_size(), Some((1024, 768)));
    }

    #[test]
    fn test_update_before_debounce() {
        let mut manager = manager(100);
        manager.on_resize_event(1024, 768);
        assert!(manager.update().is_none());
        assert!(manager.is_resizing());
    }

    #[test]
    fn test_update_after_debounce() {
        let mut manager = manager(10);
        manager.on_resize_event(1024, 768);
        thread::sleep(Duration::from_millis(15));

        let event = manager.update().unwrap();
        assert_eq!(
            event,
            ResizeEvent {
                width: 1024,
                height: 768,
                previous_width: 1920,
                previous_height: 1080,
            }
        );
        assert!(!manager.is_resizing());
        assert_eq!(manager.swapchain_size(), (1024, 768));
        assert!(manager.update().is_none());
    }

    #[test]
    fn test_force_resize() {
        let mut manager = manager(1000);
        manager.on_resize_event(1024, 768);
        assert!(manager.force_resize().is_some());
        assert_eq!(manager.swapchain_size(), (1024, 768));
        assert!(manager.force_resize().is_none());
    }

    #[test]
    fn test_multiple_events_uses_latest() {
        let mut manager = manager(10);
        manager.on_resize_event(1024, 768);
        manager.on_resize_event(800, 600);
        manager.on_resize_event(640, 480);

        thread::sleep(Duration::from_millis(15));
        let event = manager.update().unwrap();
        assert_eq!((event.width, event.height), (640, 480));
    }

    #[test]
    fn test_minimize_drops_pending() {
        let mut manager = manager(10);
        manager.on_resize_event(1024, 768);
        manager.on_resize_event(0, 0);

        assert!(manager.is_minimized());
        assert!(manager.pending_size().is_none());
        thread::sleep(Duration::from_millis(15));
        assert!(manager.update().is_none());
    }

    #[test]
    fn test_restore_to_same_size_still_rebuilds() {
        let mut manager = manager(10);
        manager.on_resize_event(0, 1080);
        manager.on_resize_event(1920, 1080);

        assert!(!manager.is_minimized());
        assert_eq!(manager.pending_size(), Some((1920, 1080)));
        thread::sleep(Duration::from_millis(15));
        assert!(manager.update().is_some());
    }

    #[test]
    fn test_starts_minimized_with_zero_size() {
        let manager = ResizeManager::new((0, 0), Duration::from_millis(10));
        assert!(manager.is_minimized());
    }

    #[test]
    fn test_remaining_debounce() {
        let mut manager = manager(100);
        assert_eq!(manager.remaining_debounce(), Duration::ZERO);

        manager.on_resize_event(1024, 768);
        let remaining = manager.remaining_debounce();
        assert!(remaining > Duration::ZERO);
        assert!(remaining <= Duration::from_millis(100));
    }
}
