//! Domain model types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One biometric ping, immutable once appended to a day record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Absolute instant of the ping (timezone-resolved at ingest)
    pub instant: DateTime<Utc>,
    /// Opaque source device identifier, if the payload carried one
    pub device_id: Option<String>,
    /// Server receipt instant
    pub ingested_at: DateTime<Utc>,
}

/// Lifecycle status of a day record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Processed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Processed => "processed",
        }
    }

    /// Unknown strings map to Active rather than failing the read
    pub fn parse(s: &str) -> Self {
        match s {
            "processed" => RecordStatus::Processed,
            _ => RecordStatus::Active,
        }
    }
}

/// The canonical per-employee, per-day ledger entry.
///
/// Exactly one exists per `(employee_code, day)`; `day` is the canonical
/// local-midnight instant computed once at creation and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayRecord {
    pub employee_code: String,
    /// Display name, first-known-value wins (never overwritten once set)
    pub employee_name: Option<String>,
    /// Canonical day key (local midnight under the organizational offset)
    pub day: DateTime<Utc>,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_out_time: Option<DateTime<Utc>>,
    /// Always equals `raw_events.len()` after any write
    pub total_check_ins: i64,
    /// Accepted (post-dedup) pings, in insertion order
    pub raw_events: Vec<RawEvent>,
    /// Last-known device metadata
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    /// Append-only diagnostic trail; never parsed back
    pub notes: Vec<String>,
    pub status: RecordStatus,
}

impl DayRecord {
    /// Empty record for a key, as created lazily on first accepted event
    pub fn new(employee_code: impl Into<String>, day: DateTime<Utc>) -> Self {
        Self {
            employee_code: employee_code.into(),
            employee_name: None,
            day,
            check_in_time: None,
            check_out_time: None,
            total_check_ins: 0,
            raw_events: Vec::new(),
            device_id: None,
            device_name: None,
            notes: Vec::new(),
            status: RecordStatus::Active,
        }
    }

    /// Check the `check_in <= check_out` and count invariants
    pub fn invariants_hold(&self) -> bool {
        let ordered = match (self.check_in_time, self.check_out_time) {
            (Some(check_in), Some(check_out)) => check_in <= check_out,
            _ => true,
        };
        ordered && self.total_check_ins == self.raw_events.len() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        assert_eq!(RecordStatus::parse("active"), RecordStatus::Active);
        assert_eq!(RecordStatus::parse("processed"), RecordStatus::Processed);
        assert_eq!(RecordStatus::parse("garbage"), RecordStatus::Active);
        assert_eq!(RecordStatus::Processed.as_str(), "processed");
    }

    #[test]
    fn test_new_record_is_empty_and_consistent() {
        let record = DayRecord::new("E1", Utc::now());
        assert_eq!(record.total_check_ins, 0);
        assert!(record.raw_events.is_empty());
        assert_eq!(record.status, RecordStatus::Active);
        assert!(record.invariants_hold());
    }

    #[test]
    fn test_invariants_detect_inverted_boundaries() {
        let mut record = DayRecord::new("E1", Utc::now());
        record.check_in_time = Some(Utc::now() + chrono::Duration::hours(1));
        record.check_out_time = Some(Utc::now());
        assert!(!record.invariants_hold());
    }
}
