//! Filters and aggregation over stored readings.
//!
//! All calendar fields (day, month, year, hour) are derived from a
//! reading's timestamp in the caller's local offset, the same offset that
//! was used to resolve partitions at ingestion time.
//!
//! # Example
//!
//! ```
//! use thermolog_store::{ReadingFilter, TemperatureRange, filter_readings};
//! use thermolog_types::Reading;
//! use time::UtcOffset;
//!
//! let readings = vec![
//!     Reading { temperature: 10.0, humidity: 50.0, timestamp: 1_704_423_600_000 }, // 03:00
//!     Reading { temperature: 22.0, humidity: 45.0, timestamp: 1_704_463_200_000 }, // 14:00
//! ];
//!
//! let filter = ReadingFilter::parse(Some("hour"), Some("14"), UtcOffset::UTC)?;
//! let afternoon = filter_readings(&readings, &filter, UtcOffset::UTC);
//! assert_eq!(afternoon.len(), 1);
//!
//! let range = TemperatureRange::from_readings(&readings);
//! assert_eq!(range.highest, Some(22.0));
//! assert_eq!(range.lowest, Some(10.0));
//! # Ok::<(), thermolog_store::QueryError>(())
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, UtcOffset};

use thermolog_types::{Reading, from_epoch_millis};

use crate::error::QueryError;

/// A single-criterion filter over readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadingFilter {
    /// No filtering.
    #[default]
    All,
    /// Readings taken on this local calendar date.
    Day(Date),
    /// Readings taken in this calendar month (of any year).
    Month(Month),
    /// Readings taken in this calendar year.
    Year(i32),
    /// Readings taken during this local hour of day (0-23).
    Hour(u8),
    /// Readings with exactly this timestamp (epoch milliseconds).
    Timestamp(i64),
}

impl ReadingFilter {
    /// Build a filter from a criterion name and its raw value.
    ///
    /// Criteria are `day`, `month`, `year`, `hour` and `timestamp`
    /// (case-insensitive). An absent, `none` or unrecognized criterion
    /// yields [`ReadingFilter::All`] and ignores the value.
    ///
    /// Date-valued criteria accept `YYYY-MM-DD`, an RFC 3339 timestamp
    /// (converted into `offset`) or epoch milliseconds. `month` also accepts
    /// a month number (1-12) and `year` a bare year.
    pub fn parse(
        criterion: Option<&str>,
        value: Option<&str>,
        offset: UtcOffset,
    ) -> Result<Self, QueryError> {
        let Some(criterion) = criterion.map(str::trim) else {
            return Ok(Self::All);
        };
        let value = non_empty(value);

        match criterion.to_ascii_lowercase().as_str() {
            "day" => {
                let value = value.ok_or(QueryError::MissingValue("day"))?;
                Ok(Self::Day(parse_date(value, offset)?))
            }
            "month" => {
                let value = value.ok_or(QueryError::MissingValue("month"))?;
                let month = match value.parse::<u8>() {
                    Ok(n) => month_from_number(n, value)?,
                    Err(_) => parse_date(value, offset)?.month(),
                };
                Ok(Self::Month(month))
            }
            "year" => {
                let value = value.ok_or(QueryError::MissingValue("year"))?;
                let year = if value.len() <= 4 && value.bytes().all(|b| b.is_ascii_digit()) {
                    parse_year(value)?
                } else {
                    parse_date(value, offset)?.year()
                };
                Ok(Self::Year(year))
            }
            "hour" => {
                let value = value.ok_or(QueryError::MissingValue("hour"))?;
                Ok(Self::Hour(parse_hour(value)?))
            }
            "timestamp" => {
                let value = value.ok_or(QueryError::MissingValue("timestamp"))?;
                let timestamp = value.parse::<i64>().map_err(|_| QueryError::InvalidNumber {
                    field: "timestamp",
                    value: value.to_string(),
                    reason: "must be an integer number of milliseconds",
                })?;
                Ok(Self::Timestamp(timestamp))
            }
            _ => Ok(Self::All),
        }
    }

    /// Whether a reading passes this filter.
    ///
    /// Readings whose timestamp cannot be represented never match a
    /// calendar criterion.
    pub fn matches(&self, reading: &Reading, offset: UtcOffset) -> bool {
        let local = || reading.local_time(offset);
        match *self {
            Self::All => true,
            Self::Timestamp(ts) => reading.timestamp == ts,
            Self::Day(date) => local().is_some_and(|t| t.date() == date),
            Self::Month(month) => local().is_some_and(|t| t.month() == month),
            Self::Year(year) => local().is_some_and(|t| t.year() == year),
            Self::Hour(hour) => local().is_some_and(|t| t.hour() == hour),
        }
    }
}

/// Keep the readings that pass `filter`, preserving order.
pub fn filter_readings(
    readings: &[Reading],
    filter: &ReadingFilter,
    offset: UtcOffset,
) -> Vec<Reading> {
    readings
        .iter()
        .filter(|r| filter.matches(r, offset))
        .copied()
        .collect()
}

/// Highest and lowest temperature over a set of readings.
///
/// Both values are `None` (serialized as `null`) when there are no readings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureRange {
    /// Highest temperature.
    pub highest: Option<f64>,
    /// Lowest temperature.
    pub lowest: Option<f64>,
}

impl TemperatureRange {
    /// Aggregate the temperatures of `readings`.
    pub fn from_readings(readings: &[Reading]) -> Self {
        readings.iter().fold(Self::default(), |range, r| Self {
            highest: Some(range.highest.map_or(r.temperature, |h| h.max(r.temperature))),
            lowest: Some(range.lowest.map_or(r.temperature, |l| l.min(r.temperature))),
        })
    }

    /// Whether the range was computed over no readings.
    pub fn is_empty(&self) -> bool {
        self.highest.is_none() && self.lowest.is_none()
    }
}

/// A calendar day selected by year, month and day-of-month together.
///
/// The parts are kept separately, so a combination that is not a real
/// date (such as February 30) is representable and simply matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayQuery {
    /// Calendar year.
    pub year: i32,
    /// Calendar month.
    pub month: Month,
    /// Day of month.
    pub day: u8,
}

impl DayQuery {
    /// Select the given date.
    pub fn for_date(date: Date) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }

    /// Resolve the day from optional request parameters.
    ///
    /// `date` supplies the base date (defaulting to `today`); `month`
    /// (1-12) and `year` then override the corresponding part.
    pub fn resolve(
        date: Option<&str>,
        month: Option<&str>,
        year: Option<&str>,
        today: Date,
        offset: UtcOffset,
    ) -> Result<Self, QueryError> {
        let base = match non_empty(date) {
            Some(value) => parse_date(value, offset)?,
            None => today,
        };

        let mut query = Self::for_date(base);
        if let Some(value) = non_empty(month) {
            let n = value.parse::<u8>().map_err(|_| QueryError::InvalidNumber {
                field: "month",
                value: value.to_string(),
                reason: "must be between 1 and 12",
            })?;
            query.month = month_from_number(n, value)?;
        }
        if let Some(value) = non_empty(year) {
            query.year = parse_year(value)?;
        }
        Ok(query)
    }

    /// Whether a reading was taken on this day in the local offset.
    pub fn matches(&self, reading: &Reading, offset: UtcOffset) -> bool {
        reading.local_time(offset).is_some_and(|t| {
            t.year() == self.year && t.month() == self.month && t.day() == self.day
        })
    }

    /// Keep the readings taken on this day, preserving order.
    pub fn select(&self, readings: &[Reading], offset: UtcOffset) -> Vec<Reading> {
        readings
            .iter()
            .filter(|r| self.matches(r, offset))
            .copied()
            .collect()
    }
}

impl fmt::Display for DayQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.year,
            u8::from(self.month),
            self.day
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a date given as `YYYY-MM-DD`, RFC 3339, or epoch milliseconds.
fn parse_date(value: &str, offset: UtcOffset) -> Result<Date, QueryError> {
    if let Some(date) = parse_calendar_date(value) {
        return Ok(date);
    }
    if let Ok(at) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(at.to_offset(offset).date());
    }
    if let Ok(millis) = value.parse::<i64>()
        && let Ok(at) = from_epoch_millis(millis)
    {
        return Ok(at.to_offset(offset).date());
    }
    Err(QueryError::InvalidDate(value.to_string()))
}

fn parse_calendar_date(value: &str) -> Option<Date> {
    Date::parse(
        value,
        format_description!("[year]-[month padding:none]-[day padding:none]"),
    )
    .ok()
}

fn month_from_number(n: u8, raw: &str) -> Result<Month, QueryError> {
    Month::try_from(n).map_err(|_| QueryError::InvalidNumber {
        field: "month",
        value: raw.to_string(),
        reason: "must be between 1 and 12",
    })
}

fn parse_year(value: &str) -> Result<i32, QueryError> {
    value.parse::<i32>().map_err(|_| QueryError::InvalidNumber {
        field: "year",
        value: value.to_string(),
        reason: "must be an integer year",
    })
}

fn parse_hour(value: &str) -> Result<u8, QueryError> {
    value
        .parse::<u8>()
        .ok()
        .filter(|h| *h < 24)
        .ok_or_else(|| QueryError::InvalidNumber {
            field: "hour",
            value: value.to_string(),
            reason: "must be between 0 and 23",
        })
}
