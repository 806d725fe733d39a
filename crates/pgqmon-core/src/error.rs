//! Error type shared by every stage of the monitoring pipeline.

use thiserror::Error;

/// Errors produced by the query-performance monitoring pipeline.
///
/// "Not eligible" is deliberately absent: eligibility checks return
/// `Ok(false)` and the stage is skipped silently.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QpmError {
    /// Server major version is outside every known query bracket.
    #[error("unsupported PostgreSQL version {0}")]
    UnsupportedVersion(u32),
    /// Opaque infrastructure failure (e.g. the random source failed).
    #[error("unexpected error")]
    UnexpectedError,
    /// A record type does not describe a usable set of telemetry fields.
    #[error("invalid model type: {0}")]
    InvalidModelType(&'static str),
    /// Environment variable not set.
    #[error("PostgreSQL: {0} not set")]
    EnvNotSet(String),
    /// Connection failed.
    #[error("PostgreSQL: {0}")]
    Connection(String),
    /// Query execution failed.
    #[error("PostgreSQL query error: {0}")]
    Query(String),
    /// A column could not be decoded into the requested type.
    #[error("cannot decode column {column}: {message}")]
    Decode { column: String, message: String },
    /// Telemetry sink failed to publish buffered metric sets.
    #[error("publish failed: {0}")]
    Publish(String),
    /// The active deadline expired before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The active context was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}
