//! Repair/backfill: re-derive canonical fields for stored records
//!
//! For each record: deduplicate the raw events (keeping the earliest
//! representative of each duplicate group), recompute min/max boundaries,
//! and write back only if a derived field actually differs. Because the
//! derivation is a pure function of the event set, the whole pass is
//! idempotent; a second run after a completed first run changes nothing,
//! which also makes interrupted batches safe to resume.

use crate::classify::{Boundaries, BoundaryPolicy, MinMax};
use crate::config::ReconConfig;
use crate::db::records::{self, StoredRecord};
use crate::model::RawEvent;
use crate::{dedup, time, Error, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// A record the repair pass rewrote
#[derive(Debug, Clone)]
pub struct ChangedRecord {
    pub employee_code: String,
    pub day: DateTime<Utc>,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub total_check_ins: i64,
}

/// Raw batch result, including per-change detail for event publication
#[derive(Debug, Default)]
pub struct BatchResult {
    pub examined: u64,
    pub changed: Vec<ChangedRecord>,
    pub failed: u64,
}

/// Aggregate counts reported to the operator
#[derive(Debug, Clone, Copy)]
pub struct RepairSummary {
    pub records_examined: u64,
    pub records_changed: u64,
    pub records_failed: u64,
}

/// Derived canonical state for a stored event set
#[derive(Debug, PartialEq, Eq)]
struct Derived {
    dropped_event_ids: Vec<i64>,
    boundaries: Boundaries,
    total_check_ins: i64,
}

/// Pure derivation: dedup the (id, event) pairs and recompute boundaries.
///
/// Pairs are ordered by instant (ties by ingestion instant) before the
/// greedy dedup pass, so the survivor of each duplicate group is the
/// earliest event no matter what order the rows were inserted in.
fn derive(mut events: Vec<(i64, RawEvent)>, window: Duration) -> Derived {
    events.sort_by(|(_, a), (_, b)| {
        a.instant
            .cmp(&b.instant)
            .then(a.ingested_at.cmp(&b.ingested_at))
    });

    let mut kept: Vec<RawEvent> = Vec::with_capacity(events.len());
    let mut dropped_event_ids = Vec::new();
    for (id, event) in events {
        if dedup::is_duplicate(&kept, &event, window) {
            dropped_event_ids.push(id);
        } else {
            kept.push(event);
        }
    }

    Derived {
        dropped_event_ids,
        boundaries: MinMax.recompute(&kept),
        total_check_ins: kept.len() as i64,
    }
}

fn needs_rewrite(stored: &StoredRecord, derived: &Derived) -> bool {
    !derived.dropped_event_ids.is_empty()
        || stored.record.check_in_time != derived.boundaries.check_in
        || stored.record.check_out_time != derived.boundaries.check_out
        || stored.record.total_check_ins != derived.total_check_ins
}

/// Repair one record by storage id.
///
/// Returns the change that was written, or None when the record was already
/// canonical (no write issued). Retries the version-guarded rewrite when a
/// concurrent ingest touches the record mid-repair.
pub async fn repair_record(
    pool: &SqlitePool,
    config: &ReconConfig,
    record_id: i64,
) -> Result<Option<ChangedRecord>> {
    let window = Duration::milliseconds(config.dedup_window_ms);

    for _attempt in 0..config.write_retry_limit {
        let stored = match records::fetch_by_id(pool, record_id).await? {
            Some(stored) => stored,
            // Deleted between listing and repair; nothing to do
            None => return Ok(None),
        };

        let events: Vec<(i64, RawEvent)> = stored
            .event_ids
            .iter()
            .copied()
            .zip(stored.record.raw_events.iter().cloned())
            .collect();
        let derived = derive(events, window);

        if !needs_rewrite(&stored, &derived) {
            return Ok(None);
        }

        let before = stored.record.raw_events.len();
        let after = derived.total_check_ins;
        let note = format!(
            "{} repair: {} -> {} events, boundaries recomputed",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            before,
            after
        );

        let written = records::rewrite(
            pool,
            stored.id,
            stored.version,
            &derived.dropped_event_ids,
            &derived.boundaries,
            derived.total_check_ins,
            &note,
        )
        .await?;

        if written {
            debug!(
                employee = %stored.record.employee_code,
                day = %time::day_key_to_date(stored.record.day, config.offset()),
                before,
                after,
                "record repaired"
            );
            return Ok(Some(ChangedRecord {
                employee_code: stored.record.employee_code,
                day: stored.record.day,
                check_in_time: derived.boundaries.check_in,
                check_out_time: derived.boundaries.check_out,
                total_check_ins: derived.total_check_ins,
            }));
        }
    }

    Err(Error::WriteConflict(format!("record {record_id}")))
}

/// Repair all records, or all records of one employee.
///
/// Per-record failures are logged and counted; they never abort the batch.
pub async fn repair_batch(
    pool: &SqlitePool,
    config: &ReconConfig,
    employee_code: Option<&str>,
) -> Result<BatchResult> {
    let ids = records::record_ids(pool, employee_code).await?;
    let mut result = BatchResult::default();

    for id in ids {
        result.examined += 1;
        match repair_record(pool, config, id).await {
            Ok(Some(changed)) => result.changed.push(changed),
            Ok(None) => {}
            Err(error) => {
                warn!(record_id = id, %error, "repair failed for record");
                result.failed += 1;
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: i64, instant: &str, device: Option<&str>) -> (i64, RawEvent) {
        (
            id,
            RawEvent {
                instant: DateTime::parse_from_rfc3339(instant)
                    .unwrap()
                    .with_timezone(&Utc),
                device_id: device.map(String::from),
                ingested_at: Utc::now(),
            },
        )
    }

    fn window() -> Duration {
        Duration::seconds(30)
    }

    #[test]
    fn test_derive_drops_same_device_near_duplicates() {
        let derived = derive(
            vec![
                event(1, "2025-01-15T01:02:11Z", Some("dev-a")),
                event(2, "2025-01-15T01:02:15Z", Some("dev-a")),
                event(3, "2025-01-15T10:45:00Z", Some("dev-a")),
            ],
            window(),
        );
        assert_eq!(derived.dropped_event_ids, vec![2]);
        assert_eq!(derived.total_check_ins, 2);
        assert_eq!(
            derived.boundaries.check_in.unwrap().to_rfc3339(),
            "2025-01-15T01:02:11+00:00"
        );
        assert_eq!(
            derived.boundaries.check_out.unwrap().to_rfc3339(),
            "2025-01-15T10:45:00+00:00"
        );
    }

    #[test]
    fn test_derive_keeps_earliest_even_when_inserted_last() {
        // The 01:02:11 ping arrived (and was inserted) after its retry;
        // the earlier instant must still be the surviving representative
        let derived = derive(
            vec![
                event(1, "2025-01-15T01:02:15Z", Some("dev-a")),
                event(2, "2025-01-15T01:02:11Z", Some("dev-a")),
            ],
            window(),
        );
        assert_eq!(derived.dropped_event_ids, vec![1]);
        assert_eq!(
            derived.boundaries.check_in.unwrap().to_rfc3339(),
            "2025-01-15T01:02:11+00:00"
        );
    }

    #[test]
    fn test_derive_chain_does_not_bridge_groups() {
        // 0s and 25s are duplicates; 50s is within 30s of the dropped 25s
        // event but 50s from the kept representative, so it survives
        let derived = derive(
            vec![
                event(1, "2025-01-15T08:00:00Z", Some("dev-a")),
                event(2, "2025-01-15T08:00:25Z", Some("dev-a")),
                event(3, "2025-01-15T08:00:50Z", Some("dev-a")),
            ],
            window(),
        );
        assert_eq!(derived.dropped_event_ids, vec![2]);
        assert_eq!(derived.total_check_ins, 2);
    }

    #[test]
    fn test_derive_is_idempotent() {
        let events = vec![
            event(1, "2025-01-15T01:02:11Z", Some("dev-a")),
            event(2, "2025-01-15T01:02:15Z", Some("dev-a")),
            event(3, "2025-01-15T10:45:00Z", Some("dev-b")),
        ];
        let first = derive(events.clone(), window());

        // Second pass over the already-deduplicated survivors
        let survivors: Vec<(i64, RawEvent)> = events
            .into_iter()
            .filter(|(id, _)| !first.dropped_event_ids.contains(id))
            .collect();
        let second = derive(survivors, window());

        assert!(second.dropped_event_ids.is_empty());
        assert_eq!(second.boundaries, first.boundaries);
        assert_eq!(second.total_check_ins, first.total_check_ins);
    }

    #[test]
    fn test_derive_empty_event_set() {
        let derived = derive(Vec::new(), window());
        assert!(derived.dropped_event_ids.is_empty());
        assert_eq!(derived.total_check_ins, 0);
        assert_eq!(derived.boundaries, Boundaries::default());
    }
}
