//! Services - presence gating, polling and the crossing ledger
//!
//! - `presence_window` - recent detections for one sensor
//! - `direction_resolver` - turns the two windows into IN/OUT or a rejection
//! - `sensor_poller` / `tag_poller` - device polling loops
//! - `ledger` - accepted crossings, queries and statistics
//! - `status` - per-device connection state
//! - `doorway` - wires everything together at startup
//! - `simulation` - trigger handles for mock mode

pub mod direction_resolver;
pub mod doorway;
pub mod ledger;
pub mod poller;
pub mod presence_window;
pub mod sensor_poller;
pub mod simulation;
pub mod status;
pub mod tag_poller;

// Re-export commonly used types
pub use doorway::{ConfigureError, Devices, Doorway};
pub use ledger::{EventLedger, LedgerError};
