//! Simulated transports for running without hardware
//!
//! Each simulated device optionally produces random traffic and can be
//! driven by hand through a trigger handle (cloned out before the device is
//! moved into its poller).

use crate::io::transport::{RfidTransport, SensorTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Line a simulated sensor emits on detection
pub const PRESENCE_SAMPLE: &str = "presence detected";

/// EPCs used when a tag read is simulated without an explicit tag
pub const SAMPLE_TAGS: [&str; 5] = [
    "E200001234567890ABCD1234",
    "E200001234567890ABCD5678",
    "E200001234567890ABCD9012",
    "E200001234567890ABCD3456",
    "E200001234567890ABCD7890",
];

/// Pick one of the sample tags at random
pub fn random_sample_tag() -> String {
    let mut rng = rand::rng();
    SAMPLE_TAGS.choose(&mut rng).copied().unwrap_or(SAMPLE_TAGS[0]).to_string()
}

fn roll(probability: f64) -> bool {
    if probability <= 0.0 {
        return false;
    }
    rand::rng().random_bool(probability.min(1.0))
}

/// Hand trigger for a simulated sensor; each `fire` yields one detection sample
#[derive(Debug, Clone, Default)]
pub struct SensorTrigger {
    pending: Arc<AtomicUsize>,
}

impl SensorTrigger {
    pub fn fire(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn take(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Hand trigger for a simulated reader; queued tags are read in order
#[derive(Debug, Clone, Default)]
pub struct TagTrigger {
    queue: Arc<Mutex<VecDeque<String>>>,
}

impl TagTrigger {
    pub fn push(&self, tag: impl Into<String>) {
        self.queue.lock().push_back(tag.into());
    }

    fn take(&self) -> Option<String> {
        self.queue.lock().pop_front()
    }
}

pub struct SimulatedSensor {
    label: String,
    trigger: SensorTrigger,
    detection_probability: f64,
    connected: bool,
    unavailable: bool,
    failing_reads: usize,
    range_m: u32,
}

impl SimulatedSensor {
    /// Sensor that fires only when triggered
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            trigger: SensorTrigger::default(),
            detection_probability: 0.0,
            connected: false,
            unavailable: false,
            failing_reads: 0,
            range_m: 0,
        }
    }

    /// Also emit a detection on each read with this probability
    pub fn with_detection_probability(mut self, probability: f64) -> Self {
        self.detection_probability = probability;
        self
    }

    /// Fail every connect attempt
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Fail the next `count` reads before behaving normally
    pub fn with_failing_reads(mut self, count: usize) -> Self {
        self.failing_reads = count;
        self
    }

    pub fn trigger(&self) -> SensorTrigger {
        self.trigger.clone()
    }
}

#[async_trait]
impl SensorTransport for SimulatedSensor {
    async fn connect(&mut self) -> anyhow::Result<()> {
        if self.unavailable {
            anyhow::bail!("simulated sensor {} unavailable", self.label);
        }
        self.connected = true;
        info!(sensor = %self.label, "simulated_sensor_connected");
        Ok(())
    }

    async fn configure_range(&mut self, meters: u32) -> anyhow::Result<()> {
        self.range_m = meters;
        debug!(sensor = %self.label, range_m = %meters, "simulated_sensor_range_set");
        Ok(())
    }

    async fn read_sample(&mut self) -> anyhow::Result<Option<String>> {
        if !self.connected {
            anyhow::bail!("simulated sensor {} not connected", self.label);
        }
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            anyhow::bail!("simulated read failure on {}", self.label);
        }
        if self.trigger.take() || roll(self.detection_probability) {
            return Ok(Some(PRESENCE_SAMPLE.to_string()));
        }
        Ok(None)
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}

pub struct SimulatedRfidReader {
    trigger: TagTrigger,
    tag_probability: f64,
    connected: bool,
    unavailable: bool,
    power_dbm: u32,
}

impl SimulatedRfidReader {
    /// Reader that reads only triggered tags
    pub fn new() -> Self {
        Self {
            trigger: TagTrigger::default(),
            tag_probability: 0.0,
            connected: false,
            unavailable: false,
            power_dbm: 0,
        }
    }

    /// Also read a random sample tag on each poll with this probability
    pub fn with_tag_probability(mut self, probability: f64) -> Self {
        self.tag_probability = probability;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn trigger(&self) -> TagTrigger {
        self.trigger.clone()
    }
}

impl Default for SimulatedRfidReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RfidTransport for SimulatedRfidReader {
    async fn connect(&mut self) -> anyhow::Result<()> {
        if self.unavailable {
            anyhow::bail!("simulated rfid reader unavailable");
        }
        self.connected = true;
        info!("simulated_rfid_connected");
        Ok(())
    }

    async fn configure_power(&mut self, dbm: u32) -> anyhow::Result<()> {
        self.power_dbm = dbm;
        debug!(power_dbm = %dbm, "simulated_rfid_power_set");
        Ok(())
    }

    async fn read_tag(&mut self) -> anyhow::Result<Option<String>> {
        if !self.connected {
            anyhow::bail!("simulated rfid reader not connected");
        }
        if let Some(tag) = self.trigger.take() {
            return Ok(Some(tag));
        }
        if roll(self.tag_probability) {
            return Ok(Some(random_sample_tag()));
        }
        Ok(None)
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sensor_fires_only_when_triggered() {
        let mut sensor = SimulatedSensor::new("inside");
        let trigger = sensor.trigger();
        sensor.connect().await.unwrap();

        assert_eq!(sensor.read_sample().await.unwrap(), None);
        trigger.fire();
        trigger.fire();
        assert_eq!(sensor.read_sample().await.unwrap().as_deref(), Some(PRESENCE_SAMPLE));
        assert_eq!(sensor.read_sample().await.unwrap().as_deref(), Some(PRESENCE_SAMPLE));
        assert_eq!(sensor.read_sample().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sensor_certain_probability() {
        let mut sensor = SimulatedSensor::new("outside").with_detection_probability(1.0);
        sensor.connect().await.unwrap();
        assert!(sensor.read_sample().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sensor_unavailable_and_failing_reads() {
        let mut down = SimulatedSensor::new("inside").unavailable();
        assert!(down.connect().await.is_err());
        assert!(down.read_sample().await.is_err());

        let mut flaky = SimulatedSensor::new("inside").with_failing_reads(2);
        flaky.connect().await.unwrap();
        assert!(flaky.read_sample().await.is_err());
        assert!(flaky.read_sample().await.is_err());
        assert!(flaky.read_sample().await.is_ok());
    }

    #[tokio::test]
    async fn test_reader_reads_queued_tags_in_order() {
        let mut reader = SimulatedRfidReader::new();
        let trigger = reader.trigger();
        reader.connect().await.unwrap();

        trigger.push("TAG1");
        trigger.push("TAG2");
        assert_eq!(reader.read_tag().await.unwrap().as_deref(), Some("TAG1"));
        assert_eq!(reader.read_tag().await.unwrap().as_deref(), Some("TAG2"));
        assert_eq!(reader.read_tag().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_random_tags_come_from_samples() {
        let mut reader = SimulatedRfidReader::new().with_tag_probability(1.0);
        reader.connect().await.unwrap();
        let tag = reader.read_tag().await.unwrap().unwrap();
        assert!(SAMPLE_TAGS.contains(&tag.as_str()));
    }

    #[tokio::test]
    async fn test_reader_closed_fails_reads() {
        let mut reader = SimulatedRfidReader::new();
        reader.connect().await.unwrap();
        reader.close().await;
        assert!(reader.read_tag().await.is_err());
    }
}
