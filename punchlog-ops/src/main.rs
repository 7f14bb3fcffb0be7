//! punchlog-ops - operator tool for the attendance reconciliation engine
//!
//! Administrative surface only: batch repair/backfill, confirmed bulk
//! delete, day-range inspection, and the active->processed transition.
//! Ingestion runs elsewhere; this binary never accepts device payloads.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use punchlog_core::{config, db, time, ReconConfig, ReconEngine};
use tracing::info;

#[derive(Parser)]
#[command(name = "punchlog-ops", version, about = "Attendance day-record administration")]
struct Cli {
    /// Database path (overrides PUNCHLOG_DB and the config file)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-derive canonical boundaries for stored records
    Repair {
        /// Restrict to one employee; omit to repair every record
        #[arg(long)]
        employee: Option<String>,
        /// Repair rewrites records; require explicit confirmation
        #[arg(long)]
        confirm: bool,
    },
    /// Delete all day records for one employee
    Purge {
        #[arg(long)]
        employee: String,
        /// Purge is irreversible; require explicit confirmation
        #[arg(long)]
        confirm: bool,
    },
    /// Print reconciled day records for an employee
    Show {
        employee: String,
        /// First day, YYYY-MM-DD in the organizational timezone
        #[arg(long)]
        from: String,
        /// Last day; omit for a single-day query
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: i64,
    },
    /// Transition a day record from active to processed
    MarkProcessed {
        employee: String,
        /// Day, YYYY-MM-DD in the organizational timezone
        #[arg(long)]
        day: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting punchlog-ops v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    let recon_config = ReconConfig::load()?;
    let db_path = config::resolve_database_path(cli.db.as_deref())?;
    info!("Database path: {}", db_path.display());

    let pool = db::init_database(&db_path, recon_config.db_busy_timeout_ms).await?;
    let engine = ReconEngine::new(pool, recon_config)?;

    match cli.command {
        Command::Repair { employee, confirm } => {
            if !confirm {
                bail!("repair rewrites stored records; re-run with --confirm");
            }
            let summary = engine.repair(employee.as_deref()).await?;
            println!(
                "examined: {}  changed: {}  failed: {}",
                summary.records_examined, summary.records_changed, summary.records_failed
            );
        }
        Command::Purge { employee, confirm } => {
            if !confirm {
                bail!("purge is irreversible; re-run with --confirm");
            }
            let deleted = engine.purge_employee(&employee).await?;
            println!("deleted {deleted} day records for {employee}");
        }
        Command::Show {
            employee,
            from,
            to,
            page,
        } => {
            let result = engine.query(&employee, &from, to.as_deref(), page).await?;
            let offset = engine.config().offset();
            println!(
                "{} records (page {}/{})",
                result.total_records,
                result.page,
                result.total_pages.max(1)
            );
            for record in &result.records {
                let format_local = |instant: Option<chrono::DateTime<chrono::Utc>>| {
                    instant
                        .map(|i| i.with_timezone(&offset).format("%H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string())
                };
                println!(
                    "{}  in: {}  out: {}  pings: {}  status: {}",
                    time::day_key_to_date(record.day, offset),
                    format_local(record.check_in_time),
                    format_local(record.check_out_time),
                    record.total_check_ins,
                    record.status.as_str()
                );
            }
        }
        Command::MarkProcessed { employee, day } => {
            if engine.mark_processed(&employee, &day).await? {
                println!("{employee} {day} marked processed");
            } else {
                println!("no active record for {employee} {day}");
            }
        }
    }

    Ok(())
}
