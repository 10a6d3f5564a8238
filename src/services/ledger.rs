//! Event ledger - the single source of truth for accepted crossings
//!
//! All mutations and snapshots go through one mutex. The durable mirror is
//! rewritten while that mutex is held so the file always reflects a real
//! ledger state, in mutation order. Mirror failures are logged and counted
//! but never roll back the in-memory ledger.

use crate::domain::record::{
    read_date_now, RecordFilter, Statistics, SystemStatus, TagCount, TrackingRecord,
};
use crate::domain::types::{Direction, ParseDirectionError, Subsystem};
use crate::infra::metrics::Metrics;
use crate::io::store::DurableStore;
use crate::services::status::StatusBoard;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Number of tags reported in `Statistics::top_tags`
pub const TOP_TAGS: usize = 10;

/// Rejections at the ledger boundary; nothing is mutated when one is returned
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("rfid_tag must not be empty")]
    EmptyTag,
    #[error(transparent)]
    InvalidDirection(#[from] ParseDirectionError),
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<TrackingRecord>,
    last_tag_read: Option<TrackingRecord>,
}

pub struct EventLedger {
    state: Mutex<LedgerState>,
    store: Arc<dyn DurableStore>,
    key: String,
    status: Arc<StatusBoard>,
    metrics: Arc<Metrics>,
}

impl EventLedger {
    /// Load the ledger from the durable store; unreadable contents start an empty ledger
    pub fn load(
        store: Arc<dyn DurableStore>,
        key: impl Into<String>,
        status: Arc<StatusBoard>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let key = key.into();
        let records = match serde_json::from_value::<Vec<TrackingRecord>>(store.load(&key)) {
            Ok(records) => records,
            Err(e) => {
                warn!(key = %key, error = %e, "ledger_load_invalid");
                Vec::new()
            }
        };

        info!(key = %key, records = %records.len(), "ledger_loaded");

        Self {
            state: Mutex::new(LedgerState { records, last_tag_read: None }),
            store,
            key,
            status,
            metrics,
        }
    }

    /// Append an accepted crossing stamped with the current time
    pub fn append(&self, rfid_tag: &str, direction: Direction) -> TrackingRecord {
        let mut state = self.state.lock();

        let mut read_date = read_date_now();
        if let Some(last) = state.records.last() {
            if read_date < last.read_date {
                // Wall clock stepped backwards; keep the ledger ordered
                debug!(read_date = %read_date, last = %last.read_date, "ledger_clock_regressed");
                read_date = last.read_date.clone();
            }
        }

        let record = TrackingRecord::new(rfid_tag, direction, read_date);
        state.records.push(record.clone());
        state.last_tag_read = Some(record.clone());
        self.mirror(&state.records);
        drop(state);

        self.metrics.record_crossing(direction);
        info!(
            tag = %record.rfid_tag,
            direction = %record.direction,
            read_date = %record.read_date,
            "crossing_recorded"
        );
        record
    }

    /// Validate and append a record supplied by an operator
    pub fn append_manual(
        &self,
        rfid_tag: &str,
        direction: &str,
    ) -> Result<TrackingRecord, LedgerError> {
        let rfid_tag = rfid_tag.trim();
        if rfid_tag.is_empty() {
            return Err(LedgerError::EmptyTag);
        }
        let direction: Direction = direction.parse()?;

        self.metrics.record_manual_record();
        Ok(self.append(rfid_tag, direction))
    }

    /// Filtered copy of the ledger, newest first, truncated to `filter.limit`
    ///
    /// Records sharing a read date keep their insertion order.
    pub fn query(&self, filter: &RecordFilter) -> Vec<TrackingRecord> {
        let snapshot = self.snapshot();

        let mut filtered: Vec<TrackingRecord> =
            snapshot.into_iter().filter(|r| filter.matches(r)).collect();
        filtered.sort_by(|a, b| b.read_date.cmp(&a.read_date));

        if let Some(limit) = filter.limit {
            filtered.truncate(limit);
        }
        filtered
    }

    /// All records for one tag, newest first
    pub fn tag_records(&self, rfid_tag: &str) -> Vec<TrackingRecord> {
        self.query(&RecordFilter::new().with_tag(rfid_tag))
    }

    /// Drop every record and mirror the empty ledger
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        let cleared = state.records.len();
        state.records.clear();
        state.last_tag_read = None;
        self.mirror(&state.records);
        drop(state);

        info!(cleared = %cleared, "ledger_cleared");
    }

    pub fn statistics(&self) -> Statistics {
        let snapshot = self.snapshot();

        let mut in_count = 0usize;
        let mut out_count = 0usize;
        // Tag order of first appearance, used as the tie-break for equal counts
        let mut tag_index: FxHashMap<&str, usize> = FxHashMap::default();
        let mut tag_counts: Vec<(&str, usize)> = Vec::new();

        for record in &snapshot {
            match record.direction {
                Direction::In => in_count += 1,
                Direction::Out => out_count += 1,
            }
            match tag_index.get(record.rfid_tag.as_str()) {
                Some(&idx) => tag_counts[idx].1 += 1,
                None => {
                    tag_index.insert(record.rfid_tag.as_str(), tag_counts.len());
                    tag_counts.push((record.rfid_tag.as_str(), 1));
                }
            }
        }

        let unique_tags = tag_counts.len();
        // Stable sort keeps first-seen order among equal counts
        tag_counts.sort_by(|a, b| b.1.cmp(&a.1));
        let top_tags = tag_counts
            .into_iter()
            .take(TOP_TAGS)
            .map(|(tag, count)| TagCount { tag: tag.to_string(), count })
            .collect();

        Statistics {
            total_records: snapshot.len(),
            in_count,
            out_count,
            unique_tags,
            current_balance: in_count as i64 - out_count as i64,
            top_tags,
        }
    }

    pub fn status(&self) -> SystemStatus {
        let (last_tag_read, total_records) = {
            let state = self.state.lock();
            (state.last_tag_read.clone(), state.records.len())
        };

        SystemStatus {
            rfid_reader: self.status.get(Subsystem::RfidReader),
            sensor_inside: self.status.get(Subsystem::SensorInside),
            sensor_outside: self.status.get(Subsystem::SensorOutside),
            last_tag_read,
            total_records,
        }
    }

    pub fn last_record(&self) -> Option<TrackingRecord> {
        self.state.lock().last_tag_read.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_board(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    fn snapshot(&self) -> Vec<TrackingRecord> {
        self.state.lock().records.clone()
    }

    /// Rewrite the durable copy; caller holds the state lock
    fn mirror(&self, records: &[TrackingRecord]) {
        let value = match serde_json::to_value(records) {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_store_failure();
                error!(error = %e, "ledger_serialize_failed");
                return;
            }
        };

        if let Err(e) = self.store.save(&self.key, &value) {
            self.metrics.record_store_failure();
            error!(key = %self.key, records = %records.len(), error = %e, "ledger_mirror_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryStore;
    use serde_json::json;

    const KEY: &str = "ledger.json";

    fn ledger_with_store(store: Arc<dyn DurableStore>) -> EventLedger {
        EventLedger::load(store, KEY, Arc::new(StatusBoard::new()), Arc::new(Metrics::new()))
    }

    fn seeded(records: serde_json::Value) -> EventLedger {
        ledger_with_store(Arc::new(MemoryStore::with_document(KEY, records)))
    }

    fn rec(tag: &str, direction: &str, date: &str) -> serde_json::Value {
        json!({"rfid_tag": tag, "direction": direction, "read_date": date})
    }

    #[test]
    fn test_append_order_and_status() {
        let ledger = ledger_with_store(Arc::new(MemoryStore::new()));
        let r1 = ledger.append("R1", Direction::In);
        let r2 = ledger.append("R2", Direction::Out);

        let all = ledger.query(&RecordFilter::new());
        // Newest first; equal timestamps keep insertion order
        assert_eq!(ledger.len(), 2);
        assert!(all.contains(&r1) && all.contains(&r2));
        assert!(r1.read_date <= r2.read_date);

        let status = ledger.status();
        assert_eq!(status.total_records, 2);
        assert_eq!(status.last_tag_read, Some(r2));
    }

    #[test]
    fn test_mirror_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_with_store(store.clone());
        let r1 = ledger.append("R1", Direction::In);
        let r2 = ledger.append("R2", Direction::Out);

        let reloaded = ledger_with_store(store.clone());
        let persisted: Vec<TrackingRecord> =
            serde_json::from_value(store.get(KEY).unwrap()).unwrap();
        assert_eq!(persisted, vec![r1, r2]);
        assert_eq!(reloaded.len(), 2);
        // Last read is process state, not persisted
        assert_eq!(reloaded.status().last_tag_read, None);
    }

    #[test]
    fn test_invalid_document_loads_empty() {
        let ledger = seeded(json!({"unexpected": "shape"}));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_statistics() {
        let ledger = seeded(json!([
            rec("A", "IN", "2024-01-01-10-00-00-000"),
            rec("B", "IN", "2024-01-01-10-00-01-000"),
            rec("A", "OUT", "2024-01-01-10-00-02-000"),
            rec("B", "OUT", "2024-01-01-10-00-03-000"),
            rec("A", "IN", "2024-01-01-10-00-04-000"),
        ]));

        let stats = ledger.statistics();
        assert_eq!(stats.total_records, 5);
        assert_eq!(stats.in_count, 3);
        assert_eq!(stats.out_count, 2);
        assert_eq!(stats.unique_tags, 2);
        assert_eq!(stats.current_balance, 1);
        assert_eq!(
            stats.top_tags,
            vec![
                TagCount { tag: "A".to_string(), count: 3 },
                TagCount { tag: "B".to_string(), count: 2 },
            ]
        );
    }

    #[test]
    fn test_top_tags_ties_keep_first_seen_order() {
        let mut docs = Vec::new();
        for (i, tag) in ["C", "A", "B", "A", "B", "C"].iter().enumerate() {
            docs.push(rec(tag, "IN", &format!("2024-01-01-10-00-{:02}-000", i)));
        }
        let ledger = seeded(serde_json::Value::Array(docs));

        let tags: Vec<String> = ledger.statistics().top_tags.into_iter().map(|t| t.tag).collect();
        assert_eq!(tags, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_top_tags_capped() {
        let docs: Vec<_> = (0..15)
            .map(|i| rec(&format!("T{i}"), "OUT", &format!("2024-01-01-10-00-{:02}-000", i)))
            .collect();
        let ledger = seeded(serde_json::Value::Array(docs));

        let stats = ledger.statistics();
        assert_eq!(stats.unique_tags, 15);
        assert_eq!(stats.top_tags.len(), TOP_TAGS);
        assert_eq!(stats.current_balance, -15);
        assert_eq!(stats.top_tags[0].tag, "T0");
    }

    #[test]
    fn test_query_direction_limit_newest_first() {
        let ledger = seeded(json!([
            rec("A", "IN", "2024-01-01-10-00-01-000"),
            rec("B", "IN", "2024-01-01-10-00-02-000"),
            rec("C", "IN", "2024-01-01-10-00-03-000"),
        ]));

        let result = ledger.query(&RecordFilter::new().with_direction(Direction::In).with_limit(1));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].read_date, "2024-01-01-10-00-03-000");
        assert_eq!(result[0].rfid_tag, "C");
    }

    #[test]
    fn test_query_date_range_and_tag() {
        let ledger = seeded(json!([
            rec("A", "IN", "2024-01-01-10-00-00-000"),
            rec("A", "OUT", "2024-01-02-10-00-00-000"),
            rec("B", "IN", "2024-01-02-11-00-00-000"),
            rec("A", "IN", "2024-01-03-10-00-00-000"),
        ]));

        let filter = RecordFilter::new()
            .with_start("2024-01-02-00-00-00-000")
            .with_end("2024-01-02-23-59-59-999");
        let dates: Vec<String> = ledger.query(&filter).into_iter().map(|r| r.read_date).collect();
        assert_eq!(dates, vec!["2024-01-02-11-00-00-000", "2024-01-02-10-00-00-000"]);

        let a = ledger.tag_records("A");
        assert_eq!(a.len(), 3);
        assert!(a.iter().all(|r| r.rfid_tag == "A"));
        assert_eq!(a[0].read_date, "2024-01-03-10-00-00-000");
    }

    #[test]
    fn test_query_returns_copy() {
        let ledger = seeded(json!([rec("A", "IN", "2024-01-01-10-00-00-000")]));
        let mut result = ledger.query(&RecordFilter::new());
        result.clear();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_clear_all() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_with_store(store.clone());
        ledger.append("A", Direction::In);
        ledger.clear_all();

        assert!(ledger.is_empty());
        let status = ledger.status();
        assert_eq!(status.total_records, 0);
        assert_eq!(status.last_tag_read, None);
        assert_eq!(store.get(KEY), Some(json!([])));
        assert_eq!(ledger.statistics(), Statistics::default());
    }

    #[test]
    fn test_append_manual_validation() {
        let ledger = ledger_with_store(Arc::new(MemoryStore::new()));

        assert_eq!(ledger.append_manual("  ", "IN"), Err(LedgerError::EmptyTag));
        assert!(matches!(
            ledger.append_manual("TAG", "SIDEWAYS"),
            Err(LedgerError::InvalidDirection(_))
        ));
        assert!(ledger.is_empty());

        let record = ledger.append_manual("TAG", "out").unwrap();
        assert_eq!(record.direction, Direction::Out);
        assert_eq!(record.rfid_tag, "TAG");
    }

    #[test]
    fn test_store_failure_keeps_memory_state() {
        let metrics = Arc::new(Metrics::new());
        let ledger = EventLedger::load(
            Arc::new(MemoryStore::failing()),
            KEY,
            Arc::new(StatusBoard::new()),
            metrics.clone(),
        );

        ledger.append("A", Direction::In);
        assert_eq!(ledger.len(), 1);
        assert_eq!(metrics.snapshot().store_failures_total, 1);
    }

    #[test]
    fn test_append_never_goes_backwards() {
        let ledger = seeded(json!([rec("A", "IN", "2999-01-01-00-00-00-000")]));
        let record = ledger.append("B", Direction::Out);
        assert_eq!(record.read_date, "2999-01-01-00-00-00-000");
    }

    #[test]
    fn test_concurrent_appends_are_serialized() {
        let ledger = Arc::new(ledger_with_store(Arc::new(MemoryStore::new())));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        ledger.append(&format!("T{t}-{i}"), Direction::In);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ledger.len(), 100);
        assert_eq!(ledger.statistics().in_count, 100);
    }
}
