//! Lock-free metrics collection and periodic reporting
//!
//! Every counter is an `AtomicU64` updated from the poller tasks and the
//! ledger. Totals are monotonic; the per-report read counter is swapped to
//! zero on each `report()` to derive a read rate.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are
//! statistical counters only and must not drive logic decisions.

use crate::domain::types::{Direction, SensorLocation};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

pub struct Metrics {
    /// Non-empty tag reads from the RFID transport
    tag_reads_total: AtomicU64,
    /// Tag reads since last report (reset on report)
    tag_reads_since_report: AtomicU64,
    /// Reads dropped by the presence gate
    tags_discarded_total: AtomicU64,
    crossings_in_total: AtomicU64,
    crossings_out_total: AtomicU64,
    /// Records added through the API rather than a tag read
    manual_records_total: AtomicU64,
    detections_inside_total: AtomicU64,
    detections_outside_total: AtomicU64,
    /// Transient read/write failures inside poller loops
    transport_errors_total: AtomicU64,
    /// Failed durable mirror writes
    store_failures_total: AtomicU64,
    last_report: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tag_reads_total: AtomicU64::new(0),
            tag_reads_since_report: AtomicU64::new(0),
            tags_discarded_total: AtomicU64::new(0),
            crossings_in_total: AtomicU64::new(0),
            crossings_out_total: AtomicU64::new(0),
            manual_records_total: AtomicU64::new(0),
            detections_inside_total: AtomicU64::new(0),
            detections_outside_total: AtomicU64::new(0),
            transport_errors_total: AtomicU64::new(0),
            store_failures_total: AtomicU64::new(0),
            last_report: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_tag_read(&self) {
        self.tag_reads_total.fetch_add(1, Ordering::Relaxed);
        self.tag_reads_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tag_discarded(&self) {
        self.tags_discarded_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_crossing(&self, direction: Direction) {
        match direction {
            Direction::In => self.crossings_in_total.fetch_add(1, Ordering::Relaxed),
            Direction::Out => self.crossings_out_total.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub fn record_manual_record(&self) {
        self.manual_records_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_detection(&self, location: SensorLocation) {
        match location {
            SensorLocation::Inside => self.detections_inside_total.fetch_add(1, Ordering::Relaxed),
            SensorLocation::Outside => {
                self.detections_outside_total.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    #[inline]
    pub fn record_transport_error(&self) {
        self.transport_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_failure(&self) {
        self.store_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters and reset the per-report read counter
    pub fn report(&self) -> MetricsSummary {
        let elapsed_secs = {
            let mut last = self.last_report.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            elapsed
        };
        let reads_since = self.tag_reads_since_report.swap(0, Ordering::Relaxed);
        let tag_reads_per_min =
            if elapsed_secs > 0.0 { reads_since as f64 * 60.0 / elapsed_secs } else { 0.0 };

        MetricsSummary {
            tag_reads_total: self.tag_reads_total.load(Ordering::Relaxed),
            tag_reads_per_min,
            tags_discarded_total: self.tags_discarded_total.load(Ordering::Relaxed),
            crossings_in_total: self.crossings_in_total.load(Ordering::Relaxed),
            crossings_out_total: self.crossings_out_total.load(Ordering::Relaxed),
            manual_records_total: self.manual_records_total.load(Ordering::Relaxed),
            detections_inside_total: self.detections_inside_total.load(Ordering::Relaxed),
            detections_outside_total: self.detections_outside_total.load(Ordering::Relaxed),
            transport_errors_total: self.transport_errors_total.load(Ordering::Relaxed),
            store_failures_total: self.store_failures_total.load(Ordering::Relaxed),
        }
    }

    /// Snapshot without resetting anything (scrape path)
    pub fn snapshot(&self) -> MetricsSummary {
        MetricsSummary {
            tag_reads_total: self.tag_reads_total.load(Ordering::Relaxed),
            tag_reads_per_min: 0.0,
            tags_discarded_total: self.tags_discarded_total.load(Ordering::Relaxed),
            crossings_in_total: self.crossings_in_total.load(Ordering::Relaxed),
            crossings_out_total: self.crossings_out_total.load(Ordering::Relaxed),
            manual_records_total: self.manual_records_total.load(Ordering::Relaxed),
            detections_inside_total: self.detections_inside_total.load(Ordering::Relaxed),
            detections_outside_total: self.detections_outside_total.load(Ordering::Relaxed),
            transport_errors_total: self.transport_errors_total.load(Ordering::Relaxed),
            store_failures_total: self.store_failures_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub tag_reads_total: u64,
    pub tag_reads_per_min: f64,
    pub tags_discarded_total: u64,
    pub crossings_in_total: u64,
    pub crossings_out_total: u64,
    pub manual_records_total: u64,
    pub detections_inside_total: u64,
    pub detections_outside_total: u64,
    pub transport_errors_total: u64,
    pub store_failures_total: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            tag_reads = %self.tag_reads_total,
            tag_reads_per_min = %format!("{:.1}", self.tag_reads_per_min),
            discarded = %self.tags_discarded_total,
            crossings_in = %self.crossings_in_total,
            crossings_out = %self.crossings_out_total,
            manual = %self.manual_records_total,
            detections_inside = %self.detections_inside_total,
            detections_outside = %self.detections_outside_total,
            transport_errors = %self.transport_errors_total,
            store_failures = %self.store_failures_total,
            "metrics"
        );
    }
}
