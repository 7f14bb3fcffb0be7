//! Common error types for punchlog

use thiserror::Error;

/// Common result type for punchlog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the reconciliation engine.
///
/// Duplicate pings and missing-field heartbeats are deliberately NOT errors;
/// they are normal outcomes counted in [`crate::engine::BatchOutcome`].
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timestamp string cannot be parsed into a valid calendar date/time
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Timestamp carried no offset and the configured policy rejects naive input
    #[error("Naive timestamp rejected (no UTC offset): {0}")]
    NaiveTimestampRejected(String),

    /// Caller-supplied calendar date string is not YYYY-MM-DD
    #[error("Invalid calendar date: {0}")]
    InvalidDate(String),

    /// Version-guarded write lost the race too many times
    #[error("Concurrent write conflict: {0}")]
    WriteConflict(String),
}
