//! Serial transports for the mmWave sensors and the UHF RFID reader
//!
//! Both devices speak a newline-terminated ASCII protocol:
//! - Sensor: emits status lines ("presence", "occupied", ...);
//!   range command `sensorStart <meters>\n`
//! - RFID reader: emits one tag EPC per line;
//!   power command `AT+POWER=<dBm>\r\n`
//!
//! Bytes are accumulated in a persistent buffer because lines can arrive
//! split across reads.

use crate::io::transport::{RfidTransport, SensorTransport};
use anyhow::Context;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace, warn};

/// Devices need this long after the port opens before they accept commands
const DEVICE_SETTLE: Duration = Duration::from_secs(2);

/// Upper bound on one read attempt so a quiet device never stalls the poll cadence
const READ_WAIT: Duration = Duration::from_millis(20);

/// Buffer without a newline beyond this is line noise and gets dropped
const MAX_LINE_LEN: usize = 1024;

/// Shortest string accepted as a tag EPC
const MIN_TAG_LEN: usize = 4;

fn range_command(meters: u32) -> String {
    format!("sensorStart {meters}\n")
}

fn power_command(dbm: u32) -> String {
    format!("AT+POWER={dbm}\r\n")
}

/// Newline-delimited serial port
pub struct SerialLine {
    device: String,
    baud: u32,
    settle: Duration,
    port: Option<SerialStream>,
    read_buffer: Vec<u8>,
}

impl SerialLine {
    pub fn new(device: &str, baud: u32) -> Self {
        Self {
            device: device.to_string(),
            baud,
            settle: DEVICE_SETTLE,
            port: None,
            read_buffer: Vec::with_capacity(256),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    async fn open(&mut self) -> anyhow::Result<()> {
        let port = tokio_serial::new(&self.device, self.baud)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .with_context(|| format!("Failed to open serial port {}", self.device))?;

        info!(device = %self.device, baud = %self.baud, "serial_port_opened");
        tokio::time::sleep(self.settle).await;

        self.port = Some(port);
        self.read_buffer.clear();
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        let port = self.port.as_mut().context("serial port not open")?;
        port.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write to {}", self.device))?;
        debug!(device = %self.device, command = %line.trim_end(), "serial_command_sent");
        Ok(())
    }

    /// Return the next complete line, reading at most once from the port
    async fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let port = self.port.as_mut().context("serial port not open")?;
        let mut temp_buf = [0u8; 256];

        match tokio::time::timeout(READ_WAIT, port.read(&mut temp_buf)).await {
            Ok(Ok(n)) if n > 0 => {
                self.read_buffer.extend_from_slice(&temp_buf[..n]);
                Ok(self.take_line())
            }
            // Zero bytes read
            Ok(Ok(_)) => Ok(None),
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Ok(Err(e)) => {
                Err(e).with_context(|| format!("Failed to read from {}", self.device))
            }
            Err(_) => Ok(None),
        }
    }

    /// Extract one line from the buffer, keeping any remainder for the next read
    fn take_line(&mut self) -> Option<String> {
        loop {
            let Some(newline) = self.read_buffer.iter().position(|&b| b == b'\n') else {
                if self.read_buffer.len() > MAX_LINE_LEN {
                    debug!(discarded = self.read_buffer.len(), "serial_line_overflow");
                    self.read_buffer.clear();
                }
                return None;
            };

            let raw: Vec<u8> = self.read_buffer.drain(..=newline).collect();
            if std::str::from_utf8(&raw).is_err() {
                trace!(raw = %hex::encode(&raw), "serial_line_not_utf8");
            }

            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!(device = %self.device, "serial_port_closed");
        }
        self.read_buffer.clear();
    }
}

/// S3KM1110 mmWave presence sensor over serial
pub struct SerialSensor {
    line: SerialLine,
}

impl SerialSensor {
    pub fn new(device: &str, baud: u32) -> Self {
        Self { line: SerialLine::new(device, baud) }
    }
}

#[async_trait]
impl SensorTransport for SerialSensor {
    async fn connect(&mut self) -> anyhow::Result<()> {
        self.line.open().await
    }

    async fn configure_range(&mut self, meters: u32) -> anyhow::Result<()> {
        self.line.write_line(&range_command(meters)).await
    }

    async fn read_sample(&mut self) -> anyhow::Result<Option<String>> {
        self.line.read_line().await
    }

    async fn close(&mut self) {
        self.line.close();
    }
}

/// M5Stack UHF RFID reader over serial
pub struct SerialRfidReader {
    line: SerialLine,
}

impl SerialRfidReader {
    pub fn new(device: &str, baud: u32) -> Self {
        Self { line: SerialLine::new(device, baud) }
    }
}

#[async_trait]
impl RfidTransport for SerialRfidReader {
    async fn connect(&mut self) -> anyhow::Result<()> {
        self.line.open().await
    }

    async fn configure_power(&mut self, dbm: u32) -> anyhow::Result<()> {
        self.line.write_line(&power_command(dbm)).await
    }

    async fn read_tag(&mut self) -> anyhow::Result<Option<String>> {
        match self.line.read_line().await? {
            Some(line) if line.len() >= MIN_TAG_LEN => Ok(Some(line)),
            Some(line) => {
                warn!(device = %self.line.device(), line = %line, "rfid_short_line_ignored");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.line.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_with(bytes: &[u8]) -> SerialLine {
        let mut line = SerialLine::new("/dev/null", 115200);
        line.read_buffer.extend_from_slice(bytes);
        line
    }

    #[test]
    fn test_commands() {
        assert_eq!(range_command(5), "sensorStart 5\n");
        assert_eq!(power_command(26), "AT+POWER=26\r\n");
    }

    #[test]
    fn test_take_line_splits_and_keeps_remainder() {
        let mut line = line_with(b"presence\r\nocc");
        assert_eq!(line.take_line().as_deref(), Some("presence"));
        assert_eq!(line.take_line(), None);
        assert_eq!(line.read_buffer, b"occ");

        line.read_buffer.extend_from_slice(b"upied\n");
        assert_eq!(line.take_line().as_deref(), Some("occupied"));
        assert!(line.read_buffer.is_empty());
    }

    #[test]
    fn test_take_line_skips_blank_lines() {
        let mut line = line_with(b"\r\n\n  \nE2001234\n");
        assert_eq!(line.take_line().as_deref(), Some("E2001234"));
    }

    #[test]
    fn test_take_line_drops_overflow() {
        let mut line = line_with(&[b'x'; MAX_LINE_LEN + 1]);
        assert_eq!(line.take_line(), None);
        assert!(line.read_buffer.is_empty());
    }

    #[test]
    fn test_take_line_tolerates_invalid_utf8() {
        let mut line = line_with(&[0xFF, b'a', b'b', b'\n']);
        let text = line.take_line().unwrap();
        assert!(text.ends_with("ab"));
    }

    #[tokio::test]
    async fn test_read_without_open_port_fails() {
        let mut sensor = SerialSensor::new("/dev/null", 115200);
        assert!(sensor.read_sample().await.is_err());
        assert!(sensor.configure_range(3).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_missing_device_fails() {
        let mut reader = SerialRfidReader::new("/dev/does-not-exist-rfid", 115200);
        assert!(reader.connect().await.is_err());
    }
}
