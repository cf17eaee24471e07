//! Core types for thermolog temperature and humidity readings.
//!
//! This crate provides the data model shared by the storage engine
//! (thermolog-store) and the collector/HTTP service (thermolog-service).
//!
//! # Features
//!
//! - [`Reading`]: one timestamped temperature/humidity sample
//! - [`SensorSample`]: the raw payload returned by the sensor endpoint
//! - [`PartitionKey`]: the (year, month) pair a reading is stored under
//! - Epoch-millisecond conversion helpers
//!
//! # Example
//!
//! ```
//! use thermolog_types::{PartitionKey, Reading, SensorSample};
//! use time::macros::datetime;
//!
//! let now = datetime!(2024-01-05 14:00 +01:00);
//! let reading = Reading::stamp(SensorSample { temperature: 4.5, humidity: 80.0 }, now);
//! let key = PartitionKey::from_datetime(now);
//! assert_eq!(key.to_string(), "2024/January");
//! assert_eq!(reading.local_time(now.offset()).unwrap().hour(), 14);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    PartitionKey, Reading, SensorSample, from_epoch_millis, parse_month_name, to_epoch_millis,
};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::{OffsetDateTime, UtcOffset};

    proptest! {
        /// A stamped reading lands in the same partition and hour that the
        /// stamping time resolves to, whatever the local offset.
        #[test]
        fn prop_stamped_reading_matches_partition(
            secs in 0i64..4_102_444_800,
            offset_minutes in -(14 * 60i32)..=(14 * 60),
        ) {
            let offset = UtcOffset::from_whole_seconds(offset_minutes * 60).unwrap();
            let now = OffsetDateTime::from_unix_timestamp(secs).unwrap().to_offset(offset);
            let reading = Reading::stamp(SensorSample { temperature: 0.0, humidity: 0.0 }, now);

            let local = reading.local_time(offset).unwrap();
            prop_assert_eq!(PartitionKey::from_datetime(local), PartitionKey::from_datetime(now));
            prop_assert_eq!(local.hour(), now.hour());
        }
    }
}
