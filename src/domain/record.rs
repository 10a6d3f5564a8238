//! Crossing records and the derived views served to API clients

use crate::domain::types::{ConnectionState, Direction};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// `YYYY-MM-DD-HH-MM-SS-mmm`, lexically sortable
pub const READ_DATE_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";

/// Format a timestamp as a record read date
pub fn format_read_date<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(READ_DATE_FORMAT).to_string()
}

/// Current local time as a record read date
pub fn read_date_now() -> String {
    format_read_date(&Local::now())
}

/// Check that a string is a well-formed read date (used for range filters)
pub fn is_valid_read_date(value: &str) -> bool {
    NaiveDateTime::parse_from_str(value, READ_DATE_FORMAT).is_ok()
}

/// One accepted crossing
///
/// Field names are the persisted JSON layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub rfid_tag: String,
    pub direction: Direction,
    pub read_date: String,
}

impl TrackingRecord {
    pub fn new(rfid_tag: impl Into<String>, direction: Direction, read_date: impl Into<String>) -> Self {
        Self { rfid_tag: rfid_tag.into(), direction, read_date: read_date.into() }
    }
}

/// Ledger query filters; every field is optional and they combine with AND
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub direction: Option<Direction>,
    pub rfid_tag: Option<String>,
    /// Inclusive lower bound on `read_date`
    pub start_date: Option<String>,
    /// Inclusive upper bound on `read_date`
    pub end_date: Option<String>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.rfid_tag = Some(tag.into());
        self
    }

    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start_date = Some(start.into());
        self
    }

    pub fn with_end(mut self, end: impl Into<String>) -> Self {
        self.end_date = Some(end.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record passes every filter except the limit
    pub fn matches(&self, record: &TrackingRecord) -> bool {
        if let Some(direction) = self.direction {
            if record.direction != direction {
                return false;
            }
        }
        if let Some(ref tag) = self.rfid_tag {
            if &record.rfid_tag != tag {
                return false;
            }
        }
        if let Some(ref start) = self.start_date {
            if record.read_date.as_str() < start.as_str() {
                return false;
            }
        }
        if let Some(ref end) = self.end_date {
            if record.read_date.as_str() > end.as_str() {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Aggregate counts over the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_records: usize,
    pub in_count: usize,
    pub out_count: usize,
    pub unique_tags: usize,
    /// `in_count - out_count`: assets currently inside, relative to the ledger start
    pub current_balance: i64,
    pub top_tags: Vec<TagCount>,
}

/// Point-in-time view of the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub rfid_reader: ConnectionState,
    pub sensor_inside: ConnectionState,
    pub sensor_outside: ConnectionState,
    pub last_tag_read: Option<TrackingRecord>,
    pub total_records: usize,
}
