//! IO modules - external system interfaces
//!
//! - `transport` - device traits the pollers read through
//! - `serial` - line-protocol sensors and RFID reader over tokio-serial
//! - `simulated` - hardware-free devices with manual triggers
//! - `store` - durable JSON mirror of the ledger
//! - `api` - HTTP/JSON API
//! - `prometheus` - Prometheus text rendering for `/metrics`

pub mod api;
pub mod prometheus;
pub mod serial;
pub mod simulated;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use store::{DurableStore, JsonFileStore, MemoryStore};
pub use transport::{RfidTransport, SensorTransport};
