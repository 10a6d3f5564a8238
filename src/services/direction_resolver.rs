//! Presence-gated direction resolution
//!
//! Correlates a tag read with the two presence windows. A read is only
//! accepted when at least one side saw a person within the detection
//! timeout; the side that fired (or fired last) decides the direction.

use crate::domain::types::Direction;
use crate::services::presence_window::SharedWindow;
use std::time::Duration;
use tracing::debug;

pub struct DirectionResolver {
    inside: SharedWindow,
    outside: SharedWindow,
    timeout: Duration,
}

impl DirectionResolver {
    pub fn new(inside: SharedWindow, outside: SharedWindow, timeout: Duration) -> Self {
        Self { inside, outside, timeout }
    }

    /// (inside_active, outside_active) at `now_ms`
    pub fn presence(&self, now_ms: u64) -> (bool, bool) {
        let inside_active = self.inside.read().recently_active(self.timeout, now_ms);
        let outside_active = self.outside.read().recently_active(self.timeout, now_ms);
        (inside_active, outside_active)
    }

    /// Direction of the crossing that would explain a tag read at `now_ms`
    ///
    /// Returns `None` when neither side saw anyone, in which case the read
    /// must be dropped. When both sides are active the more recent
    /// detection wins; an exact tie resolves to `In`.
    pub fn evaluate(&self, now_ms: u64) -> Option<Direction> {
        let (inside_active, outside_active) = self.presence(now_ms);

        match (inside_active, outside_active) {
            (true, false) => Some(Direction::Out),
            (false, true) => Some(Direction::In),
            (true, true) => {
                let inside_latest = self.inside.read().latest();
                let outside_latest = self.outside.read().latest();
                let direction =
                    if inside_latest > outside_latest { Direction::Out } else { Direction::In };
                debug!(
                    inside_latest = ?inside_latest,
                    outside_latest = ?outside_latest,
                    direction = %direction,
                    "direction_both_sides_active"
                );
                Some(direction)
            }
            (false, false) => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn inside_window(&self) -> &SharedWindow {
        &self.inside
    }

    pub fn outside_window(&self) -> &SharedWindow {
        &self.outside
    }
}
