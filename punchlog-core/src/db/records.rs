//! Day-record and raw-event queries
//!
//! Concurrency contract: the get-or-create is a single atomic
//! `INSERT OR IGNORE` against the unique key, and every mutation is a
//! conditional UPDATE on the record's `version` column. A lost race shows
//! up as zero affected rows; callers reload and retry, so two writers can
//! never both commit boundaries derived from the same stale event list.

use crate::classify::Boundaries;
use crate::model::{DayRecord, RawEvent, RecordStatus};
use crate::time;
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// A day record together with its storage identity and version
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: i64,
    pub version: i64,
    pub record: DayRecord,
    /// Raw-event row ids, parallel to `record.raw_events`
    pub event_ids: Vec<i64>,
}

#[derive(sqlx::FromRow)]
struct DayRecordRow {
    id: i64,
    employee_code: String,
    employee_name: Option<String>,
    day_ms: i64,
    check_in_ms: Option<i64>,
    check_out_ms: Option<i64>,
    total_check_ins: i64,
    device_id: Option<String>,
    device_name: Option<String>,
    notes: String,
    status: String,
    version: i64,
}

const RECORD_COLUMNS: &str = "id, employee_code, employee_name, day_ms, check_in_ms, \
     check_out_ms, total_check_ins, device_id, device_name, notes, status, version";

impl DayRecordRow {
    fn into_stored(self, events: Vec<(i64, RawEvent)>) -> StoredRecord {
        let (event_ids, raw_events): (Vec<i64>, Vec<RawEvent>) = events.into_iter().unzip();
        StoredRecord {
            id: self.id,
            version: self.version,
            record: DayRecord {
                employee_code: self.employee_code,
                employee_name: self.employee_name,
                day: time::from_millis(self.day_ms),
                check_in_time: self.check_in_ms.map(time::from_millis),
                check_out_time: self.check_out_ms.map(time::from_millis),
                total_check_ins: self.total_check_ins,
                raw_events,
                device_id: self.device_id,
                device_name: self.device_name,
                notes: self
                    .notes
                    .lines()
                    .filter(|line| !line.is_empty())
                    .map(String::from)
                    .collect(),
                status: RecordStatus::parse(&self.status),
            },
            event_ids,
        }
    }
}

/// Atomic get-or-create for a `(employee_code, day)` key.
///
/// Descriptive metadata is first-write-wins: names are only filled where
/// currently NULL, never overwritten.
pub async fn get_or_create(
    pool: &SqlitePool,
    employee_code: &str,
    day: DateTime<Utc>,
    employee_name: Option<&str>,
    device_id: Option<&str>,
    device_name: Option<&str>,
) -> Result<StoredRecord> {
    let day_ms = time::to_millis(day);

    // Insert-if-absent against the unique key; racing callers all land on
    // the same row
    sqlx::query(
        "INSERT OR IGNORE INTO day_records
         (employee_code, day_ms, employee_name, device_id, device_name)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(employee_code)
    .bind(day_ms)
    .bind(employee_name)
    .bind(device_id)
    .bind(device_name)
    .execute(pool)
    .await?;

    if employee_name.is_some() || device_name.is_some() {
        sqlx::query(
            "UPDATE day_records
             SET employee_name = COALESCE(employee_name, ?),
                 device_name = COALESCE(device_name, ?)
             WHERE employee_code = ? AND day_ms = ?",
        )
        .bind(employee_name)
        .bind(device_name)
        .bind(employee_code)
        .bind(day_ms)
        .execute(pool)
        .await?;
    }

    let query = format!(
        "SELECT {RECORD_COLUMNS} FROM day_records WHERE employee_code = ? AND day_ms = ?"
    );
    let row = sqlx::query_as::<_, DayRecordRow>(&query)
        .bind(employee_code)
        .bind(day_ms)
        .fetch_one(pool)
        .await?;

    let events = fetch_events(pool, row.id).await?;
    Ok(row.into_stored(events))
}

/// Fetch one record by key, or None
pub async fn fetch(
    pool: &SqlitePool,
    employee_code: &str,
    day: DateTime<Utc>,
) -> Result<Option<StoredRecord>> {
    let query = format!(
        "SELECT {RECORD_COLUMNS} FROM day_records WHERE employee_code = ? AND day_ms = ?"
    );
    let row = sqlx::query_as::<_, DayRecordRow>(&query)
        .bind(employee_code)
        .bind(time::to_millis(day))
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let events = fetch_events(pool, row.id).await?;
            Ok(Some(row.into_stored(events)))
        }
        None => Ok(None),
    }
}

/// Fetch one record by storage id, or None
pub async fn fetch_by_id(pool: &SqlitePool, id: i64) -> Result<Option<StoredRecord>> {
    let query = format!("SELECT {RECORD_COLUMNS} FROM day_records WHERE id = ?");
    let row = sqlx::query_as::<_, DayRecordRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let events = fetch_events(pool, row.id).await?;
            Ok(Some(row.into_stored(events)))
        }
        None => Ok(None),
    }
}

/// Raw events for a record, in insertion order, with their row ids
async fn fetch_events(pool: &SqlitePool, record_id: i64) -> Result<Vec<(i64, RawEvent)>> {
    let rows = sqlx::query_as::<_, (i64, i64, Option<String>, i64)>(
        "SELECT id, instant_ms, device_id, ingested_at_ms
         FROM raw_events WHERE record_id = ? ORDER BY id",
    )
    .bind(record_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, instant_ms, device_id, ingested_at_ms)| {
            (
                id,
                RawEvent {
                    instant: time::from_millis(instant_ms),
                    device_id,
                    ingested_at: time::from_millis(ingested_at_ms),
                },
            )
        })
        .collect())
}

/// Append an accepted event and write the recomputed boundaries, guarded by
/// the record version.
///
/// Returns false (nothing written) if another writer got there first; the
/// caller reloads and retries. The boundary update and the event append
/// commit together or not at all.
pub async fn append_event(
    pool: &SqlitePool,
    record_id: i64,
    expected_version: i64,
    event: &RawEvent,
    boundaries: &Boundaries,
    total_check_ins: i64,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE day_records
         SET check_in_ms = ?, check_out_ms = ?, total_check_ins = ?,
             device_id = COALESCE(?, device_id),
             version = version + 1, updated_at = CURRENT_TIMESTAMP
         WHERE id = ? AND version = ?",
    )
    .bind(boundaries.check_in.map(time::to_millis))
    .bind(boundaries.check_out.map(time::to_millis))
    .bind(total_check_ins)
    .bind(event.device_id.as_deref())
    .bind(record_id)
    .bind(expected_version)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO raw_events (record_id, instant_ms, device_id, ingested_at_ms)
         VALUES (?, ?, ?, ?)",
    )
    .bind(record_id)
    .bind(time::to_millis(event.instant))
    .bind(event.device_id.as_deref())
    .bind(time::to_millis(event.ingested_at))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Rewrite a record's derived fields after repair, dropping duplicate event
/// rows, guarded by the record version.
///
/// Returns false if another writer got there first.
pub async fn rewrite(
    pool: &SqlitePool,
    record_id: i64,
    expected_version: i64,
    dropped_event_ids: &[i64],
    boundaries: &Boundaries,
    total_check_ins: i64,
    note: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE day_records
         SET check_in_ms = ?, check_out_ms = ?, total_check_ins = ?,
             notes = CASE WHEN notes = '' THEN ? ELSE notes || char(10) || ? END,
             version = version + 1, updated_at = CURRENT_TIMESTAMP
         WHERE id = ? AND version = ?",
    )
    .bind(boundaries.check_in.map(time::to_millis))
    .bind(boundaries.check_out.map(time::to_millis))
    .bind(total_check_ins)
    .bind(note)
    .bind(note)
    .bind(record_id)
    .bind(expected_version)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    for event_id in dropped_event_ids {
        sqlx::query("DELETE FROM raw_events WHERE id = ?")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Records for an employee across an inclusive day-key range, paginated
pub async fn fetch_range(
    pool: &SqlitePool,
    employee_code: &str,
    from_day: DateTime<Utc>,
    to_day: DateTime<Utc>,
    limit: i64,
    offset: i64,
) -> Result<Vec<StoredRecord>> {
    let query = format!(
        "SELECT {RECORD_COLUMNS} FROM day_records
         WHERE employee_code = ? AND day_ms >= ? AND day_ms <= ?
         ORDER BY day_ms LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query_as::<_, DayRecordRow>(&query)
        .bind(employee_code)
        .bind(time::to_millis(from_day))
        .bind(time::to_millis(to_day))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let events = fetch_events(pool, row.id).await?;
        result.push(row.into_stored(events));
    }
    Ok(result)
}

/// Count of records for an employee across an inclusive day-key range
pub async fn count_range(
    pool: &SqlitePool,
    employee_code: &str,
    from_day: DateTime<Utc>,
    to_day: DateTime<Utc>,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM day_records
         WHERE employee_code = ? AND day_ms >= ? AND day_ms <= ?",
    )
    .bind(employee_code)
    .bind(time::to_millis(from_day))
    .bind(time::to_millis(to_day))
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Storage ids of all records, optionally restricted to one employee.
///
/// The repair batch walks these one at a time so a failure on one record
/// cannot poison the rest.
pub async fn record_ids(pool: &SqlitePool, employee_code: Option<&str>) -> Result<Vec<i64>> {
    let ids = match employee_code {
        Some(code) => {
            sqlx::query_scalar("SELECT id FROM day_records WHERE employee_code = ? ORDER BY id")
                .bind(code)
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT id FROM day_records ORDER BY id")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(ids)
}

/// Transition a record from active to processed.
///
/// Returns false if no active record exists for the key.
pub async fn mark_processed(
    pool: &SqlitePool,
    employee_code: &str,
    day: DateTime<Utc>,
) -> Result<bool> {
    let updated = sqlx::query(
        "UPDATE day_records
         SET status = 'processed', version = version + 1, updated_at = CURRENT_TIMESTAMP
         WHERE employee_code = ? AND day_ms = ? AND status = 'active'",
    )
    .bind(employee_code)
    .bind(time::to_millis(day))
    .execute(pool)
    .await?;
    Ok(updated.rows_affected() > 0)
}

/// Administrative bulk delete of all records (and their raw events) for one
/// employee. Only reachable through the operator tool's confirmed path.
pub async fn delete_for_employee(pool: &SqlitePool, employee_code: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;

    // Explicit child delete: foreign_keys pragma is per-connection, so the
    // cascade cannot be relied on across every pooled connection
    sqlx::query(
        "DELETE FROM raw_events WHERE record_id IN
         (SELECT id FROM day_records WHERE employee_code = ?)",
    )
    .bind(employee_code)
    .execute(&mut *tx)
    .await?;

    let deleted = sqlx::query("DELETE FROM day_records WHERE employee_code = ?")
        .bind(employee_code)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(deleted.rows_affected())
}
