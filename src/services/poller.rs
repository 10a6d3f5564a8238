//! Shared poller lifecycle pieces
//!
//! Every poller is a cooperative loop: one transport read, then a pause of
//! one poll interval (or the error backoff). The pause races the stop
//! signal, so a stop request is observed within one interval.

use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle of one poller
///
/// `Disconnected -> Connected -> Running -> Stopped`, or
/// `Disconnected -> Error` when the transport cannot be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Disconnected,
    Connected,
    Running,
    Stopped,
    Error,
}

impl PollerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollerState::Disconnected => "disconnected",
            PollerState::Connected => "connected",
            PollerState::Running => "running",
            PollerState::Stopped => "stopped",
            PollerState::Error => "error",
        }
    }
}

/// Loop cadence shared by all pollers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerTiming {
    /// Pause between successful polls (10 Hz by default)
    pub poll_interval: Duration,
    /// Pause after a transport error
    pub error_backoff: Duration,
}

impl Default for PollerTiming {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(100), error_backoff: Duration::from_secs(1) }
    }
}

/// Sleep for `delay` unless a stop is requested first
///
/// Returns true if the poller should stop.
pub(crate) async fn pause(stop_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *stop_rx.borrow() {
        return true;
    }
    tokio::select! {
        changed = stop_rx.changed() => {
            // A dropped sender also means nobody can restart us
            changed.is_err() || *stop_rx.borrow()
        }
        _ = tokio::time::sleep(delay) => *stop_rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_pause_sleeps_full_delay() {
        let (_tx, mut rx) = watch::channel(false);
        let start = Instant::now();
        assert!(!pause(&mut rx, Duration::from_millis(30)).await);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_pause_returns_early_on_stop() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let stopped = pause(&mut rx, Duration::from_secs(10)).await;
            (stopped, start.elapsed())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let (stopped, elapsed) = handle.await.unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_pause_already_stopped() {
        let (_tx, mut rx) = watch::channel(true);
        assert!(pause(&mut rx, Duration::from_secs(10)).await);
    }

    #[test]
    fn test_default_timing() {
        let timing = PollerTiming::default();
        assert_eq!(timing.poll_interval, Duration::from_millis(100));
        assert_eq!(timing.error_backoff, Duration::from_secs(1));
    }
}
