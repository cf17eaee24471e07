//! Month-partitioned storage and queries for thermolog readings.
//!
//! Readings are kept as one JSON array file per calendar month, grouped in
//! one directory per year:
//!
//! ```text
//! <root>/
//! ├── 2023/
//! │   └── December.json
//! └── 2024/
//!     ├── January.json
//!     └── February.json
//! ```
//!
//! # Features
//!
//! - Resolve the partition for a moment and locate (create) its directory
//! - Load a partition, creating it empty on first access
//! - Replace a partition atomically
//! - Filter readings by day, month, year, hour or exact timestamp
//! - Min/max temperature aggregation
//!
//! # Example
//!
//! ```no_run
//! use thermolog_store::{PartitionStore, ReadingFilter, filter_readings};
//! use thermolog_types::PartitionKey;
//! use time::{OffsetDateTime, UtcOffset};
//!
//! let store = PartitionStore::open_default();
//! let now = OffsetDateTime::now_utc();
//! let readings = store.load_partition(&PartitionKey::from_datetime(now))?;
//!
//! let filter = ReadingFilter::parse(Some("hour"), Some("3"), UtcOffset::UTC)?;
//! let at_three = filter_readings(&readings, &filter, UtcOffset::UTC);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
mod queries;
mod store;

pub use error::{Error, QueryError, Result};
pub use queries::{DayQuery, ReadingFilter, TemperatureRange, filter_readings};
pub use store::PartitionStore;

/// Default data directory following platform conventions.
///
/// - Linux: `~/.local/share/thermolog`
/// - macOS: `~/Library/Application Support/thermolog`
/// - Windows: `C:\Users\<user>\AppData\Local\thermolog`
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("thermolog")
}
