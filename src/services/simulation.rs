//! Mock-mode driver for the simulated devices
//!
//! Holds the trigger handles of the simulated sensors and reader so the
//! test routes can inject detections and tag reads. Injected events travel
//! through the pollers like real device traffic.

use crate::domain::types::{Direction, SensorLocation};
use crate::io::simulated::{random_sample_tag, SensorTrigger, TagTrigger, SAMPLE_TAGS};
use std::time::Duration;
use tracing::info;

/// Wait between the sensor trigger and the tag read in a simulated movement
pub const MOVEMENT_SENSOR_LEAD: Duration = Duration::from_millis(200);

/// Wait after the tag read so the crossing is recorded before returning
pub const MOVEMENT_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct Simulator {
    inside: SensorTrigger,
    outside: SensorTrigger,
    tags: TagTrigger,
}

impl Simulator {
    pub fn new(inside: SensorTrigger, outside: SensorTrigger, tags: TagTrigger) -> Self {
        Self { inside, outside, tags }
    }

    pub fn trigger_sensor(&self, location: SensorLocation) {
        match location {
            SensorLocation::Inside => self.inside.fire(),
            SensorLocation::Outside => self.outside.fire(),
        }
        info!(sensor = %location, "simulated_detection_triggered");
    }

    /// Queue a tag read; a random sample tag is used when none is given
    ///
    /// Returns the tag that was queued.
    pub fn trigger_tag(&self, tag: Option<&str>) -> String {
        let tag = match tag.map(str::trim) {
            Some(tag) if !tag.is_empty() => tag.to_string(),
            _ => random_sample_tag(),
        };
        self.tags.push(tag.clone());
        info!(tag = %tag, "simulated_tag_triggered");
        tag
    }

    /// Walk a tag through the doorway
    ///
    /// Moving IN starts on the outside, moving OUT on the inside; the tag
    /// is read once the sensor has had time to register.
    pub async fn simulate_movement(&self, direction: Direction, tag: Option<&str>) -> String {
        let start = match direction {
            Direction::In => SensorLocation::Outside,
            Direction::Out => SensorLocation::Inside,
        };
        self.trigger_sensor(start);
        tokio::time::sleep(MOVEMENT_SENSOR_LEAD).await;

        let tag = self.trigger_tag(tag);
        tokio::time::sleep(MOVEMENT_SETTLE).await;

        info!(tag = %tag, direction = %direction, "simulated_movement_done");
        tag
    }

    pub fn sample_tags(&self) -> &'static [&'static str] {
        &SAMPLE_TAGS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::simulated::{SimulatedRfidReader, SimulatedSensor};
    use crate::io::transport::{RfidTransport, SensorTransport};

    struct Rig {
        inside: SimulatedSensor,
        outside: SimulatedSensor,
        reader: SimulatedRfidReader,
        sim: Simulator,
    }

    async fn rig() -> Rig {
        let mut inside = SimulatedSensor::new("inside");
        let mut outside = SimulatedSensor::new("outside");
        let mut reader = SimulatedRfidReader::new();
        inside.connect().await.unwrap();
        outside.connect().await.unwrap();
        reader.connect().await.unwrap();
        let sim = Simulator::new(inside.trigger(), outside.trigger(), reader.trigger());
        Rig { inside, outside, reader, sim }
    }

    #[tokio::test]
    async fn test_trigger_sensor_targets_one_side() {
        let mut rig = rig().await;
        rig.sim.trigger_sensor(SensorLocation::Inside);

        assert!(rig.inside.read_sample().await.unwrap().is_some());
        assert!(rig.outside.read_sample().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trigger_tag_defaults_to_sample() {
        let mut rig = rig().await;

        assert_eq!(rig.sim.trigger_tag(Some("TAG1")), "TAG1");
        let random = rig.sim.trigger_tag(None);
        let blank = rig.sim.trigger_tag(Some("  "));
        assert!(SAMPLE_TAGS.contains(&random.as_str()));
        assert!(SAMPLE_TAGS.contains(&blank.as_str()));

        assert_eq!(rig.reader.read_tag().await.unwrap().as_deref(), Some("TAG1"));
        assert_eq!(rig.reader.read_tag().await.unwrap(), Some(random));
    }

    #[tokio::test]
    async fn test_movement_out_starts_inside() {
        let mut rig = rig().await;
        let tag = rig.sim.simulate_movement(Direction::Out, Some("TAG9")).await;

        assert_eq!(tag, "TAG9");
        assert!(rig.inside.read_sample().await.unwrap().is_some());
        assert!(rig.outside.read_sample().await.unwrap().is_none());
        assert_eq!(rig.reader.read_tag().await.unwrap().as_deref(), Some("TAG9"));
    }

    #[test]
    fn test_sample_tags() {
        let sim = Simulator::new(
            SensorTrigger::default(),
            SensorTrigger::default(),
            TagTrigger::default(),
        );
        assert_eq!(sim.sample_tags().len(), 5);
    }
}
