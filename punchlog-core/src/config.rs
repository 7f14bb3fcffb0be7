//! Reconciliation configuration and database path resolution
//!
//! All policy knobs of the engine live here as explicit, injected values.
//! Nothing in this crate reads process-global mutable state; an operator
//! "reset the stale threshold" action is an update to the config value a new
//! engine is constructed with.

use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use std::path::PathBuf;

/// How to interpret a timestamp string that carries no offset or zone marker.
///
/// Two incompatible conventions exist in historical attendance data; rather
/// than guess, the convention is an explicit configuration choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaivePolicy {
    /// Treat the naive string as already denoting a UTC instant (historical
    /// convention; keeps old batch backfills ingestible).
    TreatAsUtc,
    /// Reject naive strings outright. Recommended for new deployments:
    /// require the collaborator layer to attach explicit offsets.
    Reject,
}

/// Engine configuration.
///
/// `utc_offset_minutes` is the organizational offset that defines attendance
/// day boundaries. It is a fixed constant per deployment and deliberately
/// independent of the host timezone.
#[derive(Debug, Clone)]
pub struct ReconConfig {
    /// Organizational UTC offset in minutes (default +420 = UTC+7)
    pub utc_offset_minutes: i32,
    /// Two same-device pings closer than this are one attendance event
    pub dedup_window_ms: i64,
    /// Interpretation of offset-less timestamp strings
    pub naive_policy: NaivePolicy,
    /// Events with instants before this are skipped at ingest (stale data
    /// from devices flushing old queues). None disables the check.
    pub ignore_before: Option<DateTime<Utc>>,
    /// Bound on version-guard retries before surfacing WriteConflict
    pub write_retry_limit: u32,
    /// Day records per query page
    pub query_page_size: i64,
    /// SQLite busy_timeout pragma value
    pub db_busy_timeout_ms: i64,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 7 * 60,
            dedup_window_ms: 30_000,
            naive_policy: NaivePolicy::TreatAsUtc,
            ignore_before: None,
            write_retry_limit: 10,
            query_page_size: 100,
            db_busy_timeout_ms: 5_000,
        }
    }
}

/// Optional keys recognized in the TOML config file
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    utc_offset_minutes: Option<i32>,
    dedup_window_ms: Option<i64>,
    naive_policy: Option<NaivePolicy>,
    ignore_before: Option<DateTime<Utc>>,
    database_path: Option<PathBuf>,
}

impl ReconConfig {
    /// Fixed organizational offset as a chrono [`FixedOffset`].
    ///
    /// The offset range is checked by [`ReconConfig::validate`], which both
    /// [`ReconConfig::load`] and engine construction run before any call
    /// lands here.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .expect("utc_offset_minutes validated at construction")
    }

    /// Validate ranges that would otherwise panic deep inside chrono
    pub fn validate(&self) -> Result<()> {
        // chrono rejects offsets of a full day or more
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(Error::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        if self.dedup_window_ms < 0 {
            return Err(Error::Config(format!(
                "dedup_window_ms must be non-negative: {}",
                self.dedup_window_ms
            )));
        }
        if self.query_page_size < 1 {
            return Err(Error::Config(format!(
                "query_page_size must be positive: {}",
                self.query_page_size
            )));
        }
        Ok(())
    }

    /// Load configuration with the standard priority order:
    /// 1. Environment variables (`PUNCHLOG_UTC_OFFSET_MINUTES`,
    ///    `PUNCHLOG_NAIVE_POLICY`)
    /// 2. TOML config file (`~/.config/punchlog/config.toml`)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(file) = read_config_file()? {
            if let Some(v) = file.utc_offset_minutes {
                config.utc_offset_minutes = v;
            }
            if let Some(v) = file.dedup_window_ms {
                config.dedup_window_ms = v;
            }
            if let Some(v) = file.naive_policy {
                config.naive_policy = v;
            }
            if let Some(v) = file.ignore_before {
                config.ignore_before = Some(v);
            }
        }

        if let Ok(v) = std::env::var("PUNCHLOG_UTC_OFFSET_MINUTES") {
            config.utc_offset_minutes = v
                .parse()
                .map_err(|_| Error::Config(format!("bad PUNCHLOG_UTC_OFFSET_MINUTES: {v}")))?;
        }
        if let Ok(v) = std::env::var("PUNCHLOG_NAIVE_POLICY") {
            config.naive_policy = match v.as_str() {
                "treat_as_utc" => NaivePolicy::TreatAsUtc,
                "reject" => NaivePolicy::Reject,
                _ => return Err(Error::Config(format!("bad PUNCHLOG_NAIVE_POLICY: {v}"))),
            };
        }

        config.validate()?;
        Ok(config)
    }
}

/// Resolve the database path with the standard priority order:
/// 1. Command-line argument (highest priority)
/// 2. `PUNCHLOG_DB` environment variable
/// 3. `database_path` key in the TOML config file
/// 4. OS-dependent default data directory
pub fn resolve_database_path(cli_arg: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var("PUNCHLOG_DB") {
        return Ok(PathBuf::from(path));
    }

    if let Some(file) = read_config_file()? {
        if let Some(path) = file.database_path {
            return Ok(path);
        }
    }

    Ok(dirs::data_local_dir()
        .map(|d| d.join("punchlog"))
        .unwrap_or_else(|| PathBuf::from("./punchlog_data"))
        .join("punchlog.db"))
}

fn read_config_file() -> Result<Option<FileConfig>> {
    let path = match dirs::config_dir().map(|d| d.join("punchlog").join("config.toml")) {
        Some(p) if p.exists() => p,
        _ => return Ok(None),
    };

    let content = std::fs::read_to_string(&path)?;
    let parsed: FileConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(parsed))
}
