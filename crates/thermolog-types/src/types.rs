//! Core types for thermolog sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Month, OffsetDateTime, UtcOffset};

use crate::error::{ParseError, ParseResult};

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Convert a date-time to epoch milliseconds.
///
/// Sub-millisecond precision is truncated toward zero.
#[must_use]
pub fn to_epoch_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / NANOS_PER_MILLI) as i64
}

/// Convert epoch milliseconds to a UTC date-time.
pub fn from_epoch_millis(millis: i64) -> ParseResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI)
        .map_err(|_| ParseError::TimestampOutOfRange(millis))
}

/// A raw sample as reported by the sensor endpoint.
///
/// Only `temperature` and `humidity` are read from the sensor payload;
/// any other fields are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorSample {
    /// Temperature as reported by the sensor.
    pub temperature: f64,
    /// Relative humidity as reported by the sensor.
    pub humidity: f64,
}

/// A timestamped temperature/humidity reading.
///
/// Readings are immutable once stored. The timestamp is assigned at
/// ingestion time in epoch milliseconds.
///
/// # Example
///
/// ```
/// use thermolog_types::{Reading, SensorSample};
/// use time::macros::datetime;
///
/// let sample = SensorSample { temperature: 21.5, humidity: 40.0 };
/// let reading = Reading::stamp(sample, datetime!(2024-01-05 03:00 UTC));
/// assert_eq!(reading.timestamp, 1_704_423_600_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Temperature (no enforced range or unit).
    pub temperature: f64,
    /// Relative humidity.
    pub humidity: f64,
    /// Capture time in epoch milliseconds.
    pub timestamp: i64,
}

impl Reading {
    /// Stamp a sensor sample with the given capture time.
    #[must_use]
    pub fn stamp(sample: SensorSample, at: OffsetDateTime) -> Self {
        Self {
            temperature: sample.temperature,
            humidity: sample.humidity,
            timestamp: to_epoch_millis(at),
        }
    }

    /// The capture time in UTC.
    pub fn captured_at(&self) -> ParseResult<OffsetDateTime> {
        from_epoch_millis(self.timestamp)
    }

    /// The capture time expressed in the given local offset.
    ///
    /// Returns `None` when the timestamp cannot be represented.
    #[must_use]
    pub fn local_time(&self, offset: UtcOffset) -> Option<OffsetDateTime> {
        self.captured_at().ok().map(|at| at.to_offset(offset))
    }
}

/// Identifies one storage partition: a calendar month of a given year.
///
/// Partitions are resolved from the local wall-clock time, so the caller
/// is responsible for converting `now` into the local offset first.
///
/// ```
/// use thermolog_types::PartitionKey;
/// use time::Month;
/// use time::macros::datetime;
///
/// let key = PartitionKey::from_datetime(datetime!(2024-02-29 23:59 +01:00));
/// assert_eq!(key, PartitionKey::new(2024, Month::February));
/// assert_eq!(key.to_string(), "2024/February");
/// assert_eq!(key.file_name(), "February.json");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    /// Calendar year.
    pub year: i32,
    /// Calendar month.
    pub month: Month,
}

impl PartitionKey {
    /// File extension used for partition files.
    pub const EXTENSION: &'static str = "json";

    /// Create a key from its parts.
    #[must_use]
    pub const fn new(year: i32, month: Month) -> Self {
        Self { year, month }
    }

    /// Resolve the partition that contains the given moment.
    #[must_use]
    pub fn from_datetime(at: OffsetDateTime) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// Name of the file holding this partition inside its year directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.month, Self::EXTENSION)
    }

    /// Rebuild a key from a year directory name and a partition file name.
    pub fn from_parts(year_dir: &str, file_name: &str) -> ParseResult<Self> {
        let year = year_dir
            .parse::<i32>()
            .map_err(|_| ParseError::InvalidPartition(format!("{year_dir}/{file_name}")))?;
        let stem = file_name
            .strip_suffix(Self::EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(|| ParseError::InvalidPartition(format!("{year_dir}/{file_name}")))?;
        let month = parse_month_name(stem)?;
        Ok(Self { year, month })
    }
}

impl Ord for PartitionKey {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.year, u8::from(self.month)).cmp(&(other.year, u8::from(other.month)))
    }
}

impl PartialOrd for PartitionKey {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.year, self.month)
    }
}

impl FromStr for PartitionKey {
    type Err = ParseError;

    /// Parse the `"<year>/<MonthName>"` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('/')
            .ok_or_else(|| ParseError::InvalidPartition(s.to_string()))?;
        let year = year
            .parse::<i32>()
            .map_err(|_| ParseError::InvalidPartition(s.to_string()))?;
        Ok(Self {
            year,
            month: parse_month_name(month)?,
        })
    }
}

#[cfg(feature = "serde")]
impl Serialize for PartitionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for PartitionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse an English month name, ignoring ASCII case.
pub fn parse_month_name(name: &str) -> ParseResult<Month> {
    (1..=12u8)
        .filter_map(|n| Month::try_from(n).ok())
        .find(|m| m.to_string().eq_ignore_ascii_case(name))
        .ok_or_else(|| ParseError::UnknownMonth(name.to_string()))
}
