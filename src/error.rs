// ABOUTME: Error type for the fallible edges of the gate — persistence and export.
// ABOUTME: Expected decisions (deny, block, unknown id) are values, never errors.

use thiserror::Error;

/// Errors raised by clawgate storage and serialization paths.
#[derive(Debug, Error)]
pub enum GateError {
    /// A `blocked` operation was offered to the approval queue.
    #[error("blocked operations cannot be queued for approval")]
    BlockedNotQueueable,

    #[error("unknown audit export format: {0}")]
    UnknownExportFormat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("csv output was not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
