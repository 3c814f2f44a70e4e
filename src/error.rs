//! Engine error types.

use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// Input problems in raw rows are never reported here; they are skipped and
/// counted in the operation's report instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Refused or invalid operation settings. Raised before any write.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored row could not be decoded back into a record.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
