//! Configuration loading from TOML files
//!
//! The binary takes the path from `--config`, then the CONFIG_FILE
//! environment variable, then `config/dev.toml`.
//!
//! Every section and key is optional; missing values take the defaults
//! below.

use crate::services::poller::PollerTiming;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Real devices on serial ports
    Serial,
    /// Simulated devices with manual triggers (mock mode)
    Simulated,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMode::Serial => "serial",
            DeviceMode::Simulated => "simulated",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 5000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub mode: DeviceMode,
    pub rfid_port: String,
    pub sensor_inside_port: String,
    pub sensor_outside_port: String,
    pub baud: u32,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            mode: DeviceMode::Serial,
            rfid_port: "/dev/ttyUSB0".to_string(),
            sensor_inside_port: "/dev/ttyUSB1".to_string(),
            sensor_outside_port: "/dev/ttyUSB2".to_string(),
            baud: 115200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RfidConfig {
    /// Read power applied on connect (dBm)
    pub read_power_dbm: u32,
    pub power_min_dbm: u32,
    pub power_max_dbm: u32,
}

impl Default for RfidConfig {
    fn default() -> Self {
        Self { read_power_dbm: 26, power_min_dbm: 10, power_max_dbm: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Detection range applied on connect (meters)
    pub detection_range_m: u32,
    pub range_min_m: u32,
    pub range_max_m: u32,
    /// How long a detection keeps a side "present"
    pub detection_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            detection_range_m: 5,
            range_min_m: 1,
            range_max_m: 10,
            detection_timeout_secs: 5,
            poll_interval_ms: 100,
            error_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file the ledger is mirrored to
    pub data_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_file: "data/tag_tracking.json".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Per-poll chance a simulated sensor reports presence
    pub detection_probability: f64,
    /// Per-poll chance the simulated reader returns a sample tag
    pub tag_probability: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { detection_probability: 0.05, tag_probability: 0.02 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub devices: DevicesConfig,
    pub rfid: RfidConfig,
    pub sensor: SensorConfig,
    pub storage: StorageConfig,
    pub simulation: SimulationConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    bind_address: String,
    port: u16,
    device_mode: DeviceMode,
    rfid_port: String,
    sensor_inside_port: String,
    sensor_outside_port: String,
    baud: u32,
    rfid_read_power: u32,
    rfid_power_min: u32,
    rfid_power_max: u32,
    sensor_detection_range: u32,
    sensor_range_min: u32,
    sensor_range_max: u32,
    detection_timeout_secs: u64,
    poll_interval_ms: u64,
    error_backoff_ms: u64,
    data_file: String,
    sim_detection_probability: f64,
    sim_tag_probability: f64,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            bind_address: toml_config.server.bind_address,
            port: toml_config.server.port,
            device_mode: toml_config.devices.mode,
            rfid_port: toml_config.devices.rfid_port,
            sensor_inside_port: toml_config.devices.sensor_inside_port,
            sensor_outside_port: toml_config.devices.sensor_outside_port,
            baud: toml_config.devices.baud,
            rfid_read_power: toml_config.rfid.read_power_dbm,
            rfid_power_min: toml_config.rfid.power_min_dbm,
            rfid_power_max: toml_config.rfid.power_max_dbm,
            sensor_detection_range: toml_config.sensor.detection_range_m,
            sensor_range_min: toml_config.sensor.range_min_m,
            sensor_range_max: toml_config.sensor.range_max_m,
            detection_timeout_secs: toml_config.sensor.detection_timeout_secs,
            poll_interval_ms: toml_config.sensor.poll_interval_ms,
            error_backoff_ms: toml_config.sensor.error_backoff_ms,
            data_file: toml_config.storage.data_file,
            sim_detection_probability: toml_config.simulation.detection_probability,
            sim_tag_probability: toml_config.simulation.tag_probability,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Whether simulated devices and the test routes are active
    pub fn is_mock(&self) -> bool {
        self.device_mode == DeviceMode::Simulated
    }

    pub fn poller_timing(&self) -> PollerTiming {
        PollerTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
        }
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs)
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn device_mode(&self) -> DeviceMode {
        self.device_mode
    }

    pub fn rfid_port(&self) -> &str {
        &self.rfid_port
    }

    pub fn sensor_inside_port(&self) -> &str {
        &self.sensor_inside_port
    }

    pub fn sensor_outside_port(&self) -> &str {
        &self.sensor_outside_port
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn rfid_read_power(&self) -> u32 {
        self.rfid_read_power
    }

    pub fn rfid_power_min(&self) -> u32 {
        self.rfid_power_min
    }

    pub fn rfid_power_max(&self) -> u32 {
        self.rfid_power_max
    }

    pub fn sensor_detection_range(&self) -> u32 {
        self.sensor_detection_range
    }

    pub fn sensor_range_min(&self) -> u32 {
        self.sensor_range_min
    }

    pub fn sensor_range_max(&self) -> u32 {
        self.sensor_range_max
    }

    pub fn data_file(&self) -> &str {
        &self.data_file
    }

    pub fn sim_detection_probability(&self) -> f64 {
        self.sim_detection_probability
    }

    pub fn sim_tag_probability(&self) -> f64 {
        self.sim_tag_probability
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder for tests: switch to simulated devices
    pub fn with_device_mode(mut self, mode: DeviceMode) -> Self {
        self.device_mode = mode;
        self
    }

    /// Builder for tests: move the ledger file
    pub fn with_data_file(mut self, path: impl Into<String>) -> Self {
        self.data_file = path.into();
        self
    }

    /// Builder for tests: disable random simulated traffic
    pub fn with_sim_probabilities(mut self, detection: f64, tag: f64) -> Self {
        self.sim_detection_probability = detection;
        self.sim_tag_probability = tag;
        self
    }

    /// Builder for tests: faster poll cadence
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }
}
