//! Hardware transport interfaces
//!
//! Pollers talk to devices only through these traits. The serial and
//! simulated implementations are chosen once, at construction, from config.

use async_trait::async_trait;

/// Presence sensor (mmWave) on one side of the doorway
#[async_trait]
pub trait SensorTransport: Send {
    /// Open the device
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Set the detection range in meters
    async fn configure_range(&mut self, meters: u32) -> anyhow::Result<()>;

    /// Read one sample line, `None` if nothing was available
    async fn read_sample(&mut self) -> anyhow::Result<Option<String>>;

    /// Release the device
    async fn close(&mut self);
}

/// UHF RFID reader
#[async_trait]
pub trait RfidTransport: Send {
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Set read power in dBm (controls read distance)
    async fn configure_power(&mut self, dbm: u32) -> anyhow::Result<()>;

    /// Read one tag identifier, `None` if no tag was seen
    async fn read_tag(&mut self) -> anyhow::Result<Option<String>>;

    async fn close(&mut self);
}
