//! RFID polling loop
//!
//! Every non-empty tag read is run through the presence gate. Accepted reads
//! become ledger records; rejected reads are logged and dropped (no retry,
//! no queueing).

use crate::domain::record::TrackingRecord;
use crate::domain::types::{epoch_ms, ConnectionState, Subsystem};
use crate::infra::metrics::Metrics;
use crate::io::transport::RfidTransport;
use crate::services::direction_resolver::DirectionResolver;
use crate::services::ledger::EventLedger;
use crate::services::poller::{pause, PollerState, PollerTiming};
use crate::services::status::StatusBoard;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

pub struct TagPoller {
    transport: Mutex<Box<dyn RfidTransport>>,
    resolver: Arc<DirectionResolver>,
    ledger: Arc<EventLedger>,
    status: Arc<StatusBoard>,
    metrics: Arc<Metrics>,
    state: parking_lot::Mutex<PollerState>,
    read_power_dbm: AtomicU32,
    timing: PollerTiming,
    stop_tx: watch::Sender<bool>,
}

impl TagPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Box<dyn RfidTransport>,
        resolver: Arc<DirectionResolver>,
        ledger: Arc<EventLedger>,
        status: Arc<StatusBoard>,
        metrics: Arc<Metrics>,
        read_power_dbm: u32,
        timing: PollerTiming,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            transport: Mutex::new(transport),
            resolver,
            ledger,
            status,
            metrics,
            state: parking_lot::Mutex::new(PollerState::Disconnected),
            read_power_dbm: AtomicU32::new(read_power_dbm),
            timing,
            stop_tx,
        }
    }

    /// Open the reader and apply the configured read power
    pub async fn connect(&self) -> bool {
        let power = self.read_power_dbm.load(Ordering::Relaxed);
        let mut transport = self.transport.lock().await;

        if let Err(e) = transport.connect().await {
            error!(error = %e, "rfid_connect_failed");
            *self.state.lock() = PollerState::Error;
            self.status.set(Subsystem::RfidReader, ConnectionState::Error);
            return false;
        }

        if let Err(e) = transport.configure_power(power).await {
            warn!(power_dbm = %power, error = %e, "rfid_power_config_failed");
        }

        *self.state.lock() = PollerState::Connected;
        self.status.set(Subsystem::RfidReader, ConnectionState::Connected);
        info!(power_dbm = %power, "rfid_connected");
        true
    }

    /// Poll until stopped; returns immediately unless connected
    pub async fn run(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != PollerState::Connected {
                warn!(state = %state.as_str(), "rfid_poller_not_started");
                return;
            }
            *state = PollerState::Running;
        }

        let mut stop_rx = self.stop_tx.subscribe();
        info!(poll_interval_ms = %self.timing.poll_interval.as_millis(), "rfid_poller_started");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(_) => self.timing.poll_interval,
                Err(e) => {
                    self.metrics.record_transport_error();
                    warn!(error = %e, "rfid_read_error");
                    self.timing.error_backoff
                }
            };

            if pause(&mut stop_rx, delay).await {
                break;
            }
        }

        self.transport.lock().await.close().await;
        *self.state.lock() = PollerState::Stopped;
        self.status.set(Subsystem::RfidReader, ConnectionState::Disconnected);
        info!("rfid_poller_stopped");
    }

    /// Read at most one tag and gate it
    pub async fn poll_once(&self) -> anyhow::Result<Option<TrackingRecord>> {
        let tag = self.transport.lock().await.read_tag().await?;
        match tag {
            Some(tag) if !tag.trim().is_empty() => Ok(self.handle_tag(tag.trim(), epoch_ms())),
            _ => Ok(None),
        }
    }

    /// Gate one tag read against presence at `now_ms`
    pub fn handle_tag(&self, tag: &str, now_ms: u64) -> Option<TrackingRecord> {
        self.metrics.record_tag_read();

        match self.resolver.evaluate(now_ms) {
            Some(direction) => Some(self.ledger.append(tag, direction)),
            None => {
                self.metrics.record_tag_discarded();
                info!(tag = %tag, "tag_ignored_no_presence");
                None
            }
        }
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        info!("rfid_poller_stop_requested");
    }

    /// Forward a new read power to the reader
    pub async fn configure_power(&self, dbm: u32) -> anyhow::Result<()> {
        self.transport.lock().await.configure_power(dbm).await?;
        self.read_power_dbm.store(dbm, Ordering::Relaxed);
        info!(power_dbm = %dbm, "rfid_power_set");
        Ok(())
    }

    pub fn state(&self) -> PollerState {
        *self.state.lock()
    }

    pub fn read_power(&self) -> u32 {
        self.read_power_dbm.load(Ordering::Relaxed)
    }
}
