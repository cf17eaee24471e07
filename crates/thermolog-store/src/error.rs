//! Error types for thermolog-store.

use std::path::PathBuf;

/// Result type for thermolog-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in thermolog-store.
///
/// Only the write path and partition location surface errors. Failures
/// while reading a partition are logged and degrade to an empty partition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to create a partition directory.
    #[error("Failed to create partition directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a partition file.
    #[error("Failed to write partition {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while interpreting query parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// A filter criterion was given without a value.
    #[error("Missing value for filter '{0}'")]
    MissingValue(&'static str),

    /// A value could not be parsed as a date.
    #[error("Invalid date '{0}': expected YYYY-MM-DD, an RFC 3339 timestamp, or epoch milliseconds")]
    InvalidDate(String),

    /// A value could not be parsed as the expected number.
    #[error("Invalid {field} '{value}': {reason}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}
