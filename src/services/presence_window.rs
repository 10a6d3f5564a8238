//! Rolling record of recent presence detections for one sensor
//!
//! Fixed-capacity ring buffer: the newest detection overwrites the oldest
//! once the window is full. Timestamps are epoch milliseconds.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Detections kept per sensor
pub const WINDOW_CAPACITY: usize = 10;

/// Window shared between its poller (sole writer) and the resolver/status readers
pub type SharedWindow = Arc<RwLock<PresenceWindow>>;

#[derive(Debug, Clone)]
pub struct PresenceWindow {
    slots: [u64; WINDOW_CAPACITY],
    /// Next slot to write
    head: usize,
    len: usize,
}

impl PresenceWindow {
    pub fn new() -> Self {
        Self { slots: [0; WINDOW_CAPACITY], head: 0, len: 0 }
    }

    /// Create a window wrapped for sharing across tasks
    pub fn shared() -> SharedWindow {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a detection, evicting the oldest when full
    pub fn record(&mut self, timestamp_ms: u64) {
        self.slots[self.head] = timestamp_ms;
        self.head = (self.head + 1) % WINDOW_CAPACITY;
        if self.len < WINDOW_CAPACITY {
            self.len += 1;
        }
    }

    /// True if any stored detection is younger than `timeout` at `now_ms`
    ///
    /// A detection stamped after `now_ms` counts as active.
    pub fn recently_active(&self, timeout: Duration, now_ms: u64) -> bool {
        let timeout_ms = timeout.as_millis() as u64;
        self.iter().any(|t| now_ms.saturating_sub(t) < timeout_ms)
    }

    /// Most recent detection, `None` if the sensor never fired
    pub fn latest(&self) -> Option<u64> {
        self.iter().max()
    }

    /// Stored detections, oldest first
    pub fn timestamps(&self) -> Vec<u64> {
        self.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        WINDOW_CAPACITY
    }

    fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        let start = (self.head + WINDOW_CAPACITY - self.len) % WINDOW_CAPACITY;
        (0..self.len).map(move |i| self.slots[(start + i) % WINDOW_CAPACITY])
    }
}

impl Default for PresenceWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_empty_window() {
        let window = PresenceWindow::new();
        assert!(window.is_empty());
        assert_eq!(window.latest(), None);
        assert!(!window.recently_active(TIMEOUT, 10_000));
        assert!(window.timestamps().is_empty());
    }

    #[test]
    fn test_bounded_window_keeps_most_recent() {
        let mut window = PresenceWindow::new();
        for t in 1..=15u64 {
            window.record(t * 100);
        }

        assert_eq!(window.len(), WINDOW_CAPACITY);
        let expected: Vec<u64> = (6..=15u64).map(|t| t * 100).collect();
        assert_eq!(window.timestamps(), expected);
        assert_eq!(window.latest(), Some(1500));
    }

    #[test]
    fn test_partial_window_order() {
        let mut window = PresenceWindow::new();
        window.record(10);
        window.record(20);
        window.record(30);
        assert_eq!(window.timestamps(), vec![10, 20, 30]);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_recently_active_boundary() {
        let mut window = PresenceWindow::new();
        window.record(1_000);

        // now - t < timeout is strict
        assert!(window.recently_active(TIMEOUT, 5_999));
        assert!(!window.recently_active(TIMEOUT, 6_000));
    }

    #[test]
    fn test_any_detection_in_window_counts() {
        let mut window = PresenceWindow::new();
        window.record(1_000);
        window.record(20_000);
        window.record(2_000);

        assert!(window.recently_active(TIMEOUT, 22_000));
        assert_eq!(window.latest(), Some(20_000));
    }

    #[test]
    fn test_future_timestamp_counts_as_active() {
        let mut window = PresenceWindow::new();
        window.record(50_000);
        assert!(window.recently_active(TIMEOUT, 10_000));
    }

    #[test]
    fn test_old_entries_are_evicted_from_activity() {
        let mut window = PresenceWindow::new();
        window.record(100_000);
        for _ in 0..WINDOW_CAPACITY {
            window.record(1_000);
        }
        // The recent detection has been pushed out by ten older ones
        assert!(!window.recently_active(TIMEOUT, 100_500));
    }
}
