//! Per-subsystem connection state
//!
//! Each cell is an independent atomic: a reader sees a value that was valid
//! at some point, with no cross-field consistency.

use crate::domain::types::{ConnectionState, Subsystem};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct StatusBoard {
    rfid_reader: AtomicU8,
    sensor_inside: AtomicU8,
    sensor_outside: AtomicU8,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, subsystem: Subsystem) -> &AtomicU8 {
        match subsystem {
            Subsystem::RfidReader => &self.rfid_reader,
            Subsystem::SensorInside => &self.sensor_inside,
            Subsystem::SensorOutside => &self.sensor_outside,
        }
    }

    pub fn set(&self, subsystem: Subsystem, state: ConnectionState) {
        let prev = self.cell(subsystem).swap(state as u8, Ordering::AcqRel);
        if prev != state as u8 {
            info!(
                subsystem = %subsystem.as_str(),
                state = %state.as_str(),
                "subsystem_state_changed"
            );
        }
    }

    pub fn get(&self, subsystem: Subsystem) -> ConnectionState {
        ConnectionState::from_u8(self.cell(subsystem).load(Ordering::Acquire))
    }
}
