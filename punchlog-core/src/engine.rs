//! The reconciliation engine: ingest and query operations
//!
//! Control flow for one ping: normalize timestamp, bucket to a day key,
//! get-or-create the day record, dedup against its accepted events, append
//! plus reclassify in one version-guarded write, then invalidate the cache
//! hook and publish. The publish is best effort; the cache invalidation is
//! synchronous so a subsequent read never sees a stale cached record.

use crate::classify::{BoundaryPolicy, MinMax};
use crate::config::ReconConfig;
use crate::events::{EventBus, ReconEvent};
use crate::model::{DayRecord, RawEvent};
use crate::repair::{self, RepairSummary};
use crate::{db, dedup, time, Error, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One ping with its required fields already extracted by the collaborator
/// (webhook/batch) layer
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub employee_code: String,
    /// Raw timestamp string as received from the device
    pub raw_timestamp: String,
    pub device_id: Option<String>,
    pub employee_name: Option<String>,
    pub device_name: Option<String>,
}

/// One item of a vendor batch, before required-field validation.
///
/// Items missing an employee code or timestamp are device heartbeats, not
/// attendance signals; they are skipped silently.
#[derive(Debug, Clone, Default)]
pub struct BatchItem {
    pub employee_code: Option<String>,
    pub raw_timestamp: Option<String>,
    pub device_id: Option<String>,
    pub employee_name: Option<String>,
    pub device_name: Option<String>,
}

/// Result of a single ingest call
#[derive(Debug)]
pub enum IngestOutcome {
    /// Event accepted; snapshot of the record after the write
    Accepted(DayRecord),
    /// Near-duplicate of an already-accepted ping; nothing written
    Duplicate(DayRecord),
    /// Instant predates the configured stale threshold; nothing written
    Stale,
}

impl IngestOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted(_))
    }

    pub fn record(&self) -> Option<&DayRecord> {
        match self {
            IngestOutcome::Accepted(record) | IngestOutcome::Duplicate(record) => Some(record),
            IngestOutcome::Stale => None,
        }
    }
}

/// Per-item error inside a batch; never aborts sibling items
#[derive(Debug)]
pub struct BatchError {
    pub index: usize,
    pub message: String,
}

/// Aggregate result of a batch ingest
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub accepted: usize,
    pub duplicates: usize,
    /// Heartbeats (missing fields) and stale events
    pub skipped: usize,
    pub errors: Vec<BatchError>,
}

/// One page of reconciled day records
#[derive(Debug)]
pub struct QueryPage {
    pub records: Vec<DayRecord>,
    pub page: i64,
    pub total_pages: i64,
    pub total_records: i64,
}

/// Synchronous cache-invalidation hook, called after every successful write
/// and before the write call returns
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, employee_code: &str, day: DateTime<Utc>);
}

/// Default hook for deployments without a read-through cache
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _employee_code: &str, _day: DateTime<Utc>) {}
}

/// Engine state shared across callers
pub struct ReconEngine {
    pool: SqlitePool,
    config: ReconConfig,
    bus: Arc<EventBus>,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl ReconEngine {
    /// Construct an engine over an initialized pool.
    ///
    /// Validates the config up front so no later operation trips over an
    /// out-of-range offset or page size mid-write.
    pub fn new(pool: SqlitePool, config: ReconConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool,
            config,
            bus: Arc::new(EventBus::default()),
            invalidator: Arc::new(NoopInvalidator),
        })
    }

    /// Install a cache-invalidation hook
    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = invalidator;
        self
    }

    /// Event bus handle for downstream subscribers
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    /// Ingest one ping.
    ///
    /// Retries the version-guarded write a bounded number of times when
    /// racing writers touch the same `(employee_code, day)` key; each retry
    /// reloads the event list, so the dedup decision and the recomputed
    /// boundaries always reflect what actually committed before us.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestOutcome> {
        let instant = time::parse_timestamp(&request.raw_timestamp, self.config.naive_policy)?;

        if let Some(threshold) = self.config.ignore_before {
            if instant < threshold {
                debug!(
                    employee = %request.employee_code,
                    %instant,
                    "skipping stale event before configured threshold"
                );
                return Ok(IngestOutcome::Stale);
            }
        }

        let day = time::day_key(instant, self.config.offset());
        let event = RawEvent {
            instant,
            device_id: request.device_id.clone(),
            ingested_at: Utc::now(),
        };
        let window = Duration::milliseconds(self.config.dedup_window_ms);

        for attempt in 0..self.config.write_retry_limit {
            if attempt > 0 {
                debug!(employee = %request.employee_code, attempt, "retrying after write conflict");
            }

            let stored = db::records::get_or_create(
                &self.pool,
                &request.employee_code,
                day,
                request.employee_name.as_deref(),
                request.device_id.as_deref(),
                request.device_name.as_deref(),
            )
            .await?;

            if dedup::is_duplicate(&stored.record.raw_events, &event, window) {
                debug!(
                    employee = %request.employee_code,
                    device = ?event.device_id,
                    "near-duplicate ping suppressed"
                );
                return Ok(IngestOutcome::Duplicate(stored.record));
            }

            let mut events = stored.record.raw_events.clone();
            events.push(event.clone());
            let boundaries = MinMax.recompute(&events);
            let total_check_ins = events.len() as i64;

            let written = db::records::append_event(
                &self.pool,
                stored.id,
                stored.version,
                &event,
                &boundaries,
                total_check_ins,
            )
            .await?;

            if written {
                let mut record = stored.record;
                record.raw_events = events;
                record.check_in_time = boundaries.check_in;
                record.check_out_time = boundaries.check_out;
                record.total_check_ins = total_check_ins;
                if event.device_id.is_some() {
                    record.device_id = event.device_id.clone();
                }

                self.invalidator.invalidate(&record.employee_code, day);
                self.bus.emit(ReconEvent::DayReconciled {
                    employee_code: record.employee_code.clone(),
                    day,
                    check_in_time: record.check_in_time,
                    check_out_time: record.check_out_time,
                    total_check_ins,
                    timestamp: Utc::now(),
                });
                return Ok(IngestOutcome::Accepted(record));
            }
        }

        Err(Error::WriteConflict(format!(
            "{} / {}",
            request.employee_code,
            time::day_key_to_date(day, self.config.offset())
        )))
    }

    /// Ingest a vendor batch.
    ///
    /// Per-item outcomes: items without employee code or timestamp are
    /// heartbeats and skip silently; parse and storage errors are recorded
    /// against their item index and never abort the siblings.
    pub async fn ingest_batch(&self, items: &[BatchItem]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (index, item) in items.iter().enumerate() {
            let (employee_code, raw_timestamp) = match (&item.employee_code, &item.raw_timestamp)
            {
                (Some(code), Some(timestamp)) if !code.trim().is_empty() => {
                    (code.clone(), timestamp.clone())
                }
                _ => {
                    outcome.skipped += 1;
                    continue;
                }
            };

            let request = IngestRequest {
                employee_code,
                raw_timestamp,
                device_id: item.device_id.clone(),
                employee_name: item.employee_name.clone(),
                device_name: item.device_name.clone(),
            };

            match self.ingest(&request).await {
                Ok(IngestOutcome::Accepted(_)) => outcome.accepted += 1,
                Ok(IngestOutcome::Duplicate(_)) => outcome.duplicates += 1,
                Ok(IngestOutcome::Stale) => outcome.skipped += 1,
                Err(error) => {
                    warn!(index, %error, "batch item failed");
                    outcome.errors.push(BatchError {
                        index,
                        message: error.to_string(),
                    });
                }
            }
        }

        info!(
            accepted = outcome.accepted,
            duplicates = outcome.duplicates,
            skipped = outcome.skipped,
            errors = outcome.errors.len(),
            "batch ingest complete"
        );
        outcome
    }

    /// Query day records for an employee across a calendar-date range.
    ///
    /// `from_date`/`to_date` are `YYYY-MM-DD` strings in the organizational
    /// timezone; a missing `to_date` queries the single day. Boundaries and
    /// counts are re-derived from the raw events at read time, so records
    /// whose stored fields predate the canonical policy still come back
    /// consistent.
    pub async fn query(
        &self,
        employee_code: &str,
        from_date: &str,
        to_date: Option<&str>,
        page: i64,
    ) -> Result<QueryPage> {
        let offset = self.config.offset();
        let from_key = time::date_to_day_key(from_date, offset)?;
        let to_key = match to_date {
            Some(date) => time::date_to_day_key(date, offset)?,
            None => from_key,
        };
        let (from_key, to_key) = if from_key <= to_key {
            (from_key, to_key)
        } else {
            (to_key, from_key)
        };

        let total_records =
            db::records::count_range(&self.pool, employee_code, from_key, to_key).await?;

        // Clamp the requested page into [1, total_pages] and turn it into a
        // LIMIT/OFFSET window
        let page_size = self.config.query_page_size;
        let total_pages = (total_records + page_size - 1) / page_size;
        let page = page.clamp(1, total_pages.max(1));
        let row_offset = (page - 1) * page_size;

        let stored = db::records::fetch_range(
            &self.pool,
            employee_code,
            from_key,
            to_key,
            page_size,
            row_offset,
        )
        .await?;

        let records = stored
            .into_iter()
            .map(|stored| {
                let mut record = stored.record;
                let boundaries = MinMax.recompute(&record.raw_events);
                record.check_in_time = boundaries.check_in;
                record.check_out_time = boundaries.check_out;
                record.total_check_ins = record.raw_events.len() as i64;
                record
            })
            .collect();

        Ok(QueryPage {
            records,
            page,
            total_pages,
            total_records,
        })
    }

    /// Re-derive canonical boundaries for stored records (one employee or
    /// all), per-record failures isolated. See [`crate::repair`].
    pub async fn repair(&self, employee_code: Option<&str>) -> Result<RepairSummary> {
        let outcome = repair::repair_batch(&self.pool, &self.config, employee_code).await?;

        for changed in &outcome.changed {
            self.invalidator
                .invalidate(&changed.employee_code, changed.day);
            self.bus.emit(ReconEvent::DayReconciled {
                employee_code: changed.employee_code.clone(),
                day: changed.day,
                check_in_time: changed.check_in_time,
                check_out_time: changed.check_out_time,
                total_check_ins: changed.total_check_ins,
                timestamp: Utc::now(),
            });
        }

        let summary = RepairSummary {
            records_examined: outcome.examined,
            records_changed: outcome.changed.len() as u64,
            records_failed: outcome.failed,
        };

        self.bus.emit(ReconEvent::RepairCompleted {
            employee_code: employee_code.map(String::from),
            records_examined: summary.records_examined,
            records_changed: summary.records_changed,
            timestamp: Utc::now(),
        });

        info!(
            examined = summary.records_examined,
            changed = summary.records_changed,
            failed = summary.records_failed,
            "repair complete"
        );
        Ok(summary)
    }

    /// Transition a record from active to processed.
    ///
    /// Returns false if no active record exists for the key.
    pub async fn mark_processed(&self, employee_code: &str, date: &str) -> Result<bool> {
        let day = time::date_to_day_key(date, self.config.offset())?;
        let updated = db::records::mark_processed(&self.pool, employee_code, day).await?;
        if updated {
            self.invalidator.invalidate(employee_code, day);
        }
        Ok(updated)
    }

    /// Confirmed administrative bulk delete of one employee's records
    pub async fn purge_employee(&self, employee_code: &str) -> Result<u64> {
        let deleted = db::records::delete_for_employee(&self.pool, employee_code).await?;
        info!(employee = employee_code, deleted, "purged day records");
        Ok(deleted)
    }
}
