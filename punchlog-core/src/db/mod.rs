//! Database layer: pool initialization and day-record storage
//!
//! SQLite via sqlx, WAL journal mode for concurrent ingest calls, idempotent
//! schema creation at startup. All writes that can race on a
//! `(employee_code, day)` key are version-guarded; see [`records`].

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub mod records;

pub use records::StoredRecord;

/// Initialize database connection and create tables if needed.
///
/// Safe to call on every startup: schema creation is `IF NOT EXISTS`.
pub async fn init_database(db_path: &Path, busy_timeout_ms: i64) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL mode: concurrent readers with one writer, needed because ingest
    // calls from many devices overlap with query traffic
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Bounded wait on the write lock so a contended ingest surfaces an
    // error instead of hanging the caller
    let pragma_sql = format!("PRAGMA busy_timeout = {}", busy_timeout_ms);
    sqlx::query(&pragma_sql).execute(&pool).await?;

    create_day_records_table(&pool).await?;
    create_raw_events_table(&pool).await?;

    Ok(pool)
}

async fn create_day_records_table(pool: &SqlitePool) -> Result<()> {
    // UNIQUE(employee_code, day_ms) is the one-record-per-key invariant;
    // version is the optimistic concurrency guard for all mutations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS day_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_code TEXT NOT NULL,
            employee_name TEXT,
            day_ms INTEGER NOT NULL,
            check_in_ms INTEGER,
            check_out_ms INTEGER,
            total_check_ins INTEGER NOT NULL DEFAULT 0,
            device_id TEXT,
            device_name TEXT,
            notes TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            version INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(employee_code, day_ms)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_raw_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id INTEGER NOT NULL REFERENCES day_records(id) ON DELETE CASCADE,
            instant_ms INTEGER NOT NULL,
            device_id TEXT,
            ingested_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_raw_events_record ON raw_events(record_id)")
        .execute(pool)
        .await?;

    Ok(())
}
