//! Shared types for the doorway tracker

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Crossing direction through the doorway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("direction must be IN or OUT, got {0:?}")]
pub struct ParseDirectionError(pub String);

impl std::str::FromStr for Direction {
    type Err = ParseDirectionError;

    /// Case-insensitive, surrounding whitespace ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(Direction::In),
            "OUT" => Ok(Direction::Out),
            _ => Err(ParseDirectionError(s.to_string())),
        }
    }
}

/// Physical side of the doorway a presence sensor watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorLocation {
    Inside,
    Outside,
}

impl SensorLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorLocation::Inside => "inside",
            SensorLocation::Outside => "outside",
        }
    }

    /// Status subsystem that reports this sensor's connection state
    pub fn subsystem(&self) -> Subsystem {
        match self {
            SensorLocation::Inside => Subsystem::SensorInside,
            SensorLocation::Outside => Subsystem::SensorOutside,
        }
    }
}

impl std::fmt::Display for SensorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sensor must be \"inside\" or \"outside\", got {0:?}")]
pub struct ParseLocationError(pub String);

impl std::str::FromStr for SensorLocation {
    type Err = ParseLocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inside" => Ok(SensorLocation::Inside),
            "outside" => Ok(SensorLocation::Outside),
            _ => Err(ParseLocationError(s.to_string())),
        }
    }
}

/// Subsystems whose connection state is reported in the system status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    RfidReader,
    SensorInside,
    SensorOutside,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::RfidReader => "rfid_reader",
            Subsystem::SensorInside => "sensor_inside",
            Subsystem::SensorOutside => "sensor_outside",
        }
    }
}

/// Connection state of one hardware subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connected = 1,
    Error = 2,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    /// Decode the value stored in a status cell; unknown values read as disconnected
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Error,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// A positive presence classification from one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionEvent {
    pub location: SensorLocation,
    /// Epoch milliseconds
    pub timestamp_ms: u64,
}

impl DetectionEvent {
    #[inline]
    pub fn new(location: SensorLocation, timestamp_ms: u64) -> Self {
        Self { location, timestamp_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_str() {
        assert_eq!("IN".parse::<Direction>().unwrap(), Direction::In);
        assert_eq!("out".parse::<Direction>().unwrap(), Direction::Out);
        assert_eq!(" In ".parse::<Direction>().unwrap(), Direction::In);
        assert!("SIDEWAYS".parse::<Direction>().is_err());
        assert!("".parse::<Direction>().is_err());
    }

    #[test]
    fn test_direction_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Direction::In).unwrap(), "\"IN\"");
        assert_eq!(serde_json::to_string(&Direction::Out).unwrap(), "\"OUT\"");
        let parsed: Direction = serde_json::from_str("\"OUT\"").unwrap();
        assert_eq!(parsed, Direction::Out);
    }

    #[test]
    fn test_sensor_location_from_str() {
        assert_eq!("Inside".parse::<SensorLocation>().unwrap(), SensorLocation::Inside);
        assert_eq!("outside".parse::<SensorLocation>().unwrap(), SensorLocation::Outside);
        assert!("hallway".parse::<SensorLocation>().is_err());
        assert_eq!(SensorLocation::Inside.subsystem(), Subsystem::SensorInside);
        assert_eq!(SensorLocation::Outside.subsystem().as_str(), "sensor_outside");
    }

    #[test]
    fn test_connection_state_round_trips_through_u8() {
        for state in [ConnectionState::Disconnected, ConnectionState::Connected, ConnectionState::Error]
        {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
        assert_eq!(ConnectionState::from_u8(99), ConnectionState::Disconnected);
    }
}
