//! Doorway service - wires the pollers, resolver and ledger together
//!
//! Built once at startup from `Config`. Everything the API touches hangs
//! off this object; there is no global state.

use crate::domain::types::{ConnectionState, SensorLocation, Subsystem};
use crate::infra::config::{Config, DeviceMode};
use crate::infra::metrics::Metrics;
use crate::io::serial::{SerialRfidReader, SerialSensor};
use crate::io::simulated::{SimulatedRfidReader, SimulatedSensor};
use crate::io::store::{DurableStore, JsonFileStore};
use crate::io::transport::{RfidTransport, SensorTransport};
use crate::services::direction_resolver::DirectionResolver;
use crate::services::poller::PollerState;
use crate::services::ledger::EventLedger;
use crate::services::presence_window::PresenceWindow;
use crate::services::sensor_poller::SensorPoller;
use crate::services::simulation::Simulator;
use crate::services::status::StatusBoard;
use crate::services::tag_poller::TagPoller;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Rejected device reconfiguration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigureError {
    #[error("value {value} outside {min}-{max}")]
    OutOfRange { value: u32, min: u32, max: u32 },
    #[error("{subsystem} rejected setting: {reason}")]
    Device { subsystem: &'static str, reason: String },
}

/// Transports for one doorway, chosen once at construction
pub struct Devices {
    pub inside: Box<dyn SensorTransport>,
    pub outside: Box<dyn SensorTransport>,
    pub rfid: Box<dyn RfidTransport>,
    /// Trigger handles, present only for simulated devices
    pub simulator: Option<Simulator>,
}

impl Devices {
    pub fn from_config(config: &Config) -> Self {
        match config.device_mode() {
            DeviceMode::Serial => Self::serial(config),
            DeviceMode::Simulated => Self::simulated(
                config.sim_detection_probability(),
                config.sim_tag_probability(),
            ),
        }
    }

    pub fn serial(config: &Config) -> Self {
        Self {
            inside: Box::new(SerialSensor::new(config.sensor_inside_port(), config.baud())),
            outside: Box::new(SerialSensor::new(config.sensor_outside_port(), config.baud())),
            rfid: Box::new(SerialRfidReader::new(config.rfid_port(), config.baud())),
            simulator: None,
        }
    }

    pub fn simulated(detection_probability: f64, tag_probability: f64) -> Self {
        let inside =
            SimulatedSensor::new("inside").with_detection_probability(detection_probability);
        let outside =
            SimulatedSensor::new("outside").with_detection_probability(detection_probability);
        let rfid = SimulatedRfidReader::new().with_tag_probability(tag_probability);
        let simulator = Simulator::new(inside.trigger(), outside.trigger(), rfid.trigger());

        Self {
            inside: Box::new(inside),
            outside: Box::new(outside),
            rfid: Box::new(rfid),
            simulator: Some(simulator),
        }
    }
}

pub struct Doorway {
    config: Config,
    status: Arc<StatusBoard>,
    metrics: Arc<Metrics>,
    ledger: Arc<EventLedger>,
    resolver: Arc<DirectionResolver>,
    inside: Arc<SensorPoller>,
    outside: Arc<SensorPoller>,
    rfid: Arc<TagPoller>,
    simulator: Option<Simulator>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

/// Split a data file path into the file store root and key
fn store_location(data_file: &str) -> (&Path, String) {
    let path = Path::new(data_file);
    let root = path.parent().unwrap_or_else(|| Path::new(""));
    let key = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| data_file.to_string());
    (root, key)
}

impl Doorway {
    /// Build from config with the JSON file store and configured devices
    pub fn from_config(config: Config, metrics: Arc<Metrics>) -> Self {
        let (root, key) = store_location(config.data_file());
        let store: Arc<dyn DurableStore> = Arc::new(JsonFileStore::new(root));
        let devices = Devices::from_config(&config);
        Self::with_parts(config, store, key, devices, metrics)
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn DurableStore>,
        store_key: String,
        devices: Devices,
        metrics: Arc<Metrics>,
    ) -> Self {
        let status = Arc::new(StatusBoard::new());
        let ledger =
            Arc::new(EventLedger::load(store, store_key, status.clone(), metrics.clone()));

        let inside_window = PresenceWindow::shared();
        let outside_window = PresenceWindow::shared();
        let resolver = Arc::new(DirectionResolver::new(
            inside_window.clone(),
            outside_window.clone(),
            config.detection_timeout(),
        ));

        let timing = config.poller_timing();
        let inside = Arc::new(SensorPoller::new(
            SensorLocation::Inside,
            devices.inside,
            inside_window,
            status.clone(),
            metrics.clone(),
            config.sensor_detection_range(),
            timing,
        ));
        let outside = Arc::new(SensorPoller::new(
            SensorLocation::Outside,
            devices.outside,
            outside_window,
            status.clone(),
            metrics.clone(),
            config.sensor_detection_range(),
            timing,
        ));
        let rfid = Arc::new(TagPoller::new(
            devices.rfid,
            resolver.clone(),
            ledger.clone(),
            status.clone(),
            metrics.clone(),
            config.rfid_read_power(),
            timing,
        ));

        Self {
            config,
            status,
            metrics,
            ledger,
            resolver,
            inside,
            outside,
            rfid,
            simulator: devices.simulator,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Connect every device and spawn a poller for each one that came up
    ///
    /// A device that fails to connect stays in `error` and is not polled;
    /// the rest of the doorway keeps running.
    pub async fn start(&self) {
        let mut handles = Vec::with_capacity(3);

        for sensor in [&self.inside, &self.outside] {
            if sensor.connect().await {
                handles.push(tokio::spawn(sensor.clone().run()));
            }
        }
        if self.rfid.connect().await {
            handles.push(tokio::spawn(self.rfid.clone().run()));
        }

        let status = self.ledger.status();
        info!(
            mode = %self.config.device_mode().as_str(),
            rfid_reader = %status.rfid_reader.as_str(),
            sensor_inside = %status.sensor_inside.as_str(),
            sensor_outside = %status.sensor_outside.as_str(),
            pollers = %handles.len(),
            "doorway_started"
        );

        self.tasks.lock().extend(handles);
    }

    /// Stop all pollers and wait for their loops to exit
    pub async fn shutdown(&self) {
        self.rfid.stop();
        self.inside.stop();
        self.outside.stop();

        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "poller_task_failed");
            }
        }
        info!("doorway_stopped");
    }

    /// Apply a detection range to every live sensor
    ///
    /// Sensors that failed to connect are skipped. A device rejection on
    /// one sensor does not stop the other from being configured; the call
    /// fails only when no live sensor took the value.
    pub async fn configure_sensor_range(&self, meters: u32) -> Result<u32, ConfigureError> {
        let (min, max) = self.sensor_range_bounds();
        if !(min..=max).contains(&meters) {
            return Err(ConfigureError::OutOfRange { value: meters, min, max });
        }

        let mut applied = 0;
        let mut first_failure = None;
        for sensor in [&self.inside, &self.outside] {
            if sensor.state() == PollerState::Error {
                debug!(sensor = %sensor.location(), range_m = %meters, "sensor_range_skipped_failed_device");
                continue;
            }
            match sensor.configure_range(meters).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(sensor = %sensor.location(), range_m = %meters, error = %e, "sensor_range_rejected");
                    if first_failure.is_none() {
                        first_failure = Some(ConfigureError::Device {
                            subsystem: sensor.location().subsystem().as_str(),
                            reason: format!("{e:#}"),
                        });
                    }
                }
            }
        }

        if applied > 0 {
            return Ok(meters);
        }
        Err(first_failure.unwrap_or(ConfigureError::Device {
            subsystem: "sensors",
            reason: "no sensor connected".to_string(),
        }))
    }

    /// Apply a read power to the RFID reader
    pub async fn configure_rfid_power(&self, dbm: u32) -> Result<u32, ConfigureError> {
        let (min, max) = self.rfid_power_bounds();
        if !(min..=max).contains(&dbm) {
            return Err(ConfigureError::OutOfRange { value: dbm, min, max });
        }

        self.rfid.configure_power(dbm).await.map_err(|e| {
            warn!(power_dbm = %dbm, error = %e, "rfid_power_rejected");
            ConfigureError::Device {
                subsystem: Subsystem::RfidReader.as_str(),
                reason: format!("{e:#}"),
            }
        })?;
        Ok(dbm)
    }

    pub fn sensor_range_bounds(&self) -> (u32, u32) {
        (self.config.sensor_range_min(), self.config.sensor_range_max())
    }

    pub fn rfid_power_bounds(&self) -> (u32, u32) {
        (self.config.rfid_power_min(), self.config.rfid_power_max())
    }

    /// Current detection range, read from the first live sensor
    pub fn sensor_range(&self) -> u32 {
        [&self.inside, &self.outside]
            .into_iter()
            .find(|sensor| sensor.state() != PollerState::Error)
            .unwrap_or(&self.inside)
            .detection_range()
    }

    pub fn rfid_power(&self) -> u32 {
        self.rfid.read_power()
    }

    pub fn connection_state(&self, subsystem: Subsystem) -> ConnectionState {
        self.status.get(subsystem)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<EventLedger> {
        &self.ledger
    }

    pub fn resolver(&self) -> &Arc<DirectionResolver> {
        &self.resolver
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn sensor(&self, location: SensorLocation) -> &Arc<SensorPoller> {
        match location {
            SensorLocation::Inside => &self.inside,
            SensorLocation::Outside => &self.outside,
        }
    }

    pub fn tag_poller(&self) -> &Arc<TagPoller> {
        &self.rfid
    }

    /// Trigger handles; `None` unless running simulated devices
    pub fn simulator(&self) -> Option<&Simulator> {
        self.simulator.as_ref()
    }

    pub fn is_mock(&self) -> bool {
        self.simulator.is_some()
    }
}
