//! Presence sensor polling loop
//!
//! One poller per doorway side. It is the only writer of its presence
//! window: every sample classified as presence stamps the window with the
//! current time.

use crate::domain::types::{epoch_ms, ConnectionState, DetectionEvent, SensorLocation};
use crate::infra::metrics::Metrics;
use crate::io::transport::SensorTransport;
use crate::services::poller::{pause, PollerState, PollerTiming};
use crate::services::presence_window::SharedWindow;
use crate::services::status::StatusBoard;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, trace, warn};

/// Sample keywords that mean someone is in front of the sensor
const PRESENCE_KEYWORDS: [&str; 2] = ["presence", "occupied"];

/// Whether a raw sensor line reports presence (case-insensitive keyword match)
pub fn is_presence(sample: &str) -> bool {
    let lower = sample.to_ascii_lowercase();
    PRESENCE_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub struct SensorPoller {
    location: SensorLocation,
    transport: Mutex<Box<dyn SensorTransport>>,
    window: SharedWindow,
    status: Arc<StatusBoard>,
    metrics: Arc<Metrics>,
    state: parking_lot::Mutex<PollerState>,
    detection_range_m: AtomicU32,
    timing: PollerTiming,
    stop_tx: watch::Sender<bool>,
}

impl SensorPoller {
    pub fn new(
        location: SensorLocation,
        transport: Box<dyn SensorTransport>,
        window: SharedWindow,
        status: Arc<StatusBoard>,
        metrics: Arc<Metrics>,
        detection_range_m: u32,
        timing: PollerTiming,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            location,
            transport: Mutex::new(transport),
            window,
            status,
            metrics,
            state: parking_lot::Mutex::new(PollerState::Disconnected),
            detection_range_m: AtomicU32::new(detection_range_m),
            timing,
            stop_tx,
        }
    }

    /// Open the transport and apply the configured range
    ///
    /// Failure is reported through the status board, never returned as an error.
    pub async fn connect(&self) -> bool {
        let range = self.detection_range_m.load(Ordering::Relaxed);
        let mut transport = self.transport.lock().await;

        if let Err(e) = transport.connect().await {
            error!(sensor = %self.location, error = %e, "sensor_connect_failed");
            *self.state.lock() = PollerState::Error;
            self.status.set(self.location.subsystem(), ConnectionState::Error);
            return false;
        }

        if let Err(e) = transport.configure_range(range).await {
            warn!(sensor = %self.location, range_m = %range, error = %e, "sensor_range_config_failed");
        }

        *self.state.lock() = PollerState::Connected;
        self.status.set(self.location.subsystem(), ConnectionState::Connected);
        info!(sensor = %self.location, range_m = %range, "sensor_connected");
        true
    }

    /// Poll until stopped; returns immediately unless connected
    pub async fn run(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != PollerState::Connected {
                warn!(sensor = %self.location, state = %state.as_str(), "sensor_poller_not_started");
                return;
            }
            *state = PollerState::Running;
        }

        let mut stop_rx = self.stop_tx.subscribe();
        info!(
            sensor = %self.location,
            poll_interval_ms = %self.timing.poll_interval.as_millis(),
            "sensor_poller_started"
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(_) => self.timing.poll_interval,
                Err(e) => {
                    self.metrics.record_transport_error();
                    warn!(sensor = %self.location, error = %e, "sensor_read_error");
                    self.timing.error_backoff
                }
            };

            if pause(&mut stop_rx, delay).await {
                break;
            }
        }

        self.transport.lock().await.close().await;
        *self.state.lock() = PollerState::Stopped;
        self.status.set(self.location.subsystem(), ConnectionState::Disconnected);
        info!(sensor = %self.location, "sensor_poller_stopped");
    }

    /// Read one sample; returns the detection if it reported presence
    pub async fn poll_once(&self) -> anyhow::Result<Option<DetectionEvent>> {
        let sample = self.transport.lock().await.read_sample().await?;

        let Some(sample) = sample else {
            return Ok(None);
        };

        if !is_presence(&sample) {
            trace!(sensor = %self.location, sample = %sample, "sensor_sample");
            return Ok(None);
        }

        let event = DetectionEvent::new(self.location, epoch_ms());
        self.window.write().record(event.timestamp_ms);
        self.metrics.record_detection(self.location);
        info!(sensor = %self.location, timestamp_ms = %event.timestamp_ms, "presence_detected");
        Ok(Some(event))
    }

    /// Request the loop to exit at its next check
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        info!(sensor = %self.location, "sensor_poller_stop_requested");
    }

    /// Forward a new detection range to the device
    pub async fn configure_range(&self, meters: u32) -> anyhow::Result<()> {
        self.transport.lock().await.configure_range(meters).await?;
        self.detection_range_m.store(meters, Ordering::Relaxed);
        info!(sensor = %self.location, range_m = %meters, "sensor_range_set");
        Ok(())
    }

    pub fn location(&self) -> SensorLocation {
        self.location
    }

    pub fn window(&self) -> &SharedWindow {
        &self.window
    }

    pub fn state(&self) -> PollerState {
        *self.state.lock()
    }

    pub fn detection_range(&self) -> u32 {
        self.detection_range_m.load(Ordering::Relaxed)
    }
}
