//! # punchlog core
//!
//! Attendance event reconciliation engine: turns duplicate-prone,
//! out-of-order biometric check-in/out pings into one canonical record per
//! employee per attendance day.
//!
//! - Timestamp normalization and fixed-offset day bucketing ([`time`])
//! - Near-duplicate suppression for device retries ([`dedup`])
//! - Check-in/out boundary classification ([`classify`])
//! - SQLite-backed day-record storage with atomic upserts ([`db`])
//! - Ingest/query operations ([`engine`])
//! - Idempotent repair/backfill ([`repair`])

pub mod classify;
pub mod config;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod repair;
pub mod time;

pub use config::{NaivePolicy, ReconConfig};
pub use engine::ReconEngine;
pub use error::{Error, Result};
pub use model::{DayRecord, RawEvent, RecordStatus};
