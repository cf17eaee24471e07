//! Error types for data parsing in thermolog-types.

use thiserror::Error;

/// Errors that can occur when interpreting thermolog data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A reading timestamp cannot be represented as a date-time.
    #[error("Timestamp out of range: {0} ms")]
    TimestampOutOfRange(i64),

    /// A month name was not recognized.
    #[error("Unknown month name: {0}")]
    UnknownMonth(String),

    /// A partition file name did not have the expected shape.
    #[error("Invalid partition name: {0}")]
    InvalidPartition(String),
}

/// Result type alias using thermolog-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
