//! Domain models - crossing records and the types around them
//!
//! - `types` - directions, sensor sides, connection states, detections
//! - `record` - ledger records, query filters and derived views

pub mod record;
pub mod types;

// Re-export commonly used types at module level
pub use record::{RecordFilter, Statistics, SystemStatus, TrackingRecord};
pub use types::{ConnectionState, Direction, SensorLocation};
