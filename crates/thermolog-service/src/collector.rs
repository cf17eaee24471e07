//! Background data collector.
//!
//! One ingestion run fetches a single sample from the sensor, stamps it
//! with the run time and appends it to the current monthly partition,
//! unless that partition already holds a reading for the same hour.
//!
//! The scheduler runs one ingestion at startup and then one per
//! `collector.interval_secs`, aligned to multiples of the interval in local
//! time (on the hour for the default one-hour interval). A failed run is
//! not retried; the next tick is the retry.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use thermolog_types::{PartitionKey, Reading};

use crate::config::DedupScope;
use crate::sensor::SensorError;
use crate::state::AppState;

/// Result of a successful ingestion run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// The reading was appended to its partition.
    Stored(Reading),
    /// The partition already had a reading for this hour; nothing was written.
    AlreadyRecorded {
        /// Local hour of day of the run.
        hour: u8,
    },
}

/// Collector errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to fetch reading: {0}")]
    Fetch(#[from] SensorError),
    #[error("Failed to store reading: {0}")]
    Store(#[from] thermolog_store::Error),
}

/// Background collector that polls the sensor on a fixed schedule.
#[derive(Clone)]
pub struct Collector {
    state: Arc<AppState>,
}

impl Collector {
    /// Create a new collector.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Run one ingestion as of `now`.
    ///
    /// At most one sensor fetch and one partition write happen per call.
    /// The outcome is recorded in the collector statistics.
    pub async fn ingest(&self, now: OffsetDateTime) -> Result<IngestOutcome, IngestError> {
        let now = now.to_offset(self.state.offset);
        let result = self.ingest_at(now).await;

        let mut stats = self.state.collector.stats.write().await;
        match &result {
            Ok(IngestOutcome::Stored(_)) => stats.record_stored(now),
            Ok(IngestOutcome::AlreadyRecorded { .. }) => stats.record_skipped(now),
            Err(IngestError::Fetch(e)) => stats.record_fetch_failure(now, &e.to_string()),
            Err(IngestError::Store(e)) => stats.record_store_failure(now, &e.to_string()),
        }

        result
    }

    async fn ingest_at(&self, now: OffsetDateTime) -> Result<IngestOutcome, IngestError> {
        let sample = self.state.sensor.fetch().await?;
        let reading = Reading::stamp(sample, now);
        let key = PartitionKey::from_datetime(now);
        let scope = self.state.config.collector.dedup_scope;
        let offset = self.state.offset;

        let _guard = self.state.ingest_lock.lock().await;
        let mut readings = self.state.store.load_partition(&key)?;

        let hour = now.hour();
        let already_recorded = readings.iter().any(|r| {
            r.local_time(offset).is_some_and(|t| match scope {
                DedupScope::HourOfDay => t.hour() == hour,
                DedupScope::CalendarHour => t.date() == now.date() && t.hour() == hour,
            })
        });
        if already_recorded {
            debug!("Partition {} already has a reading for hour {}", key, hour);
            return Ok(IngestOutcome::AlreadyRecorded { hour });
        }

        readings.push(reading);
        self.state.store.save_partition(&key, &readings)?;

        info!(
            "Stored reading in {}: temperature={} humidity={}",
            key, reading.temperature, reading.humidity
        );
        Ok(IngestOutcome::Stored(reading))
    }

    /// Start the scheduler in the background.
    ///
    /// Returns `None` if the scheduler is already running or disabled in
    /// the configuration.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if !self.state.config.collector.enabled {
            info!("Collector disabled in configuration");
            return None;
        }
        if !self.state.collector.try_start() {
            warn!("Collector already running");
            return None;
        }

        self.state.collector.reset_stop();
        let stop_rx = self.state.collector.subscribe_stop();

        let collector = self.clone();
        Some(tokio::spawn(async move {
            collector.run_schedule(stop_rx).await;
            collector.state.collector.mark_stopped();
            info!("Collector stopped");
        }))
    }

    /// Signal the scheduler to stop after the current run.
    pub fn stop(&self) {
        self.state.collector.signal_stop();
    }

    async fn run_schedule(&self, mut stop_rx: watch::Receiver<bool>) {
        let config = &self.state.config.collector;
        let period = Duration::from_secs(config.interval_secs.max(1));

        info!(
            "Starting collector for {} (interval: {}s, offset: {})",
            self.state.config.sensor.url, config.interval_secs, self.state.offset
        );

        if *stop_rx.borrow() {
            return;
        }
        if config.run_on_start {
            self.run_once().await;
            if *stop_rx.borrow() {
                return;
            }
        }

        let delay = delay_until_next_tick(self.state.now(), period);
        debug!("Next collection in {}s", delay.as_secs());
        let mut timer = interval_at(Instant::now() + delay, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => self.run_once().await,
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow_and_update() {
                        break;
                    }
                }
            }
        }
    }

    async fn run_once(&self) {
        match self.ingest(self.state.now()).await {
            Ok(IngestOutcome::Stored(reading)) => {
                debug!("Collected reading at {}", reading.timestamp);
            }
            Ok(IngestOutcome::AlreadyRecorded { hour }) => {
                debug!("Skipped collection, hour {} already recorded", hour);
            }
            Err(IngestError::Fetch(e)) => {
                let failures = self.state.collector.stats.read().await.consecutive_fetch_failures;
                if failures <= 3 {
                    warn!("Failed to fetch sensor reading: {} (attempt {})", e, failures);
                } else if failures == 4 {
                    error!(
                        "Failed to fetch sensor reading after {} attempts, will continue trying silently",
                        failures
                    );
                }
            }
            Err(IngestError::Store(e)) => {
                error!("Failed to store sensor reading: {}", e);
            }
        }
    }
}

/// Time from `now` until the next multiple of `period` in `now`'s offset.
///
/// A `now` exactly on a boundary waits a full period.
pub fn delay_until_next_tick(now: OffsetDateTime, period: Duration) -> Duration {
    let period_secs = period.as_secs().max(1) as i64;
    let local_secs = now.unix_timestamp() + i64::from(now.offset().whole_seconds());
    let into_period = Duration::from_secs(local_secs.rem_euclid(period_secs) as u64)
        + Duration::from_nanos(u64::from(now.nanosecond()));
    Duration::from_secs(period_secs as u64).saturating_sub(into_period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sensor::MockSensor;
    use thermolog_store::PartitionStore;
    use thermolog_types::SensorSample;
    use time::Month;
    use time::macros::{datetime, offset};

    fn create_test_state(dir: &std::path::Path, sensor: Arc<MockSensor>) -> Arc<AppState> {
        create_state_with_config(dir, sensor, Config::default())
    }

    fn create_state_with_config(
        dir: &std::path::Path,
        sensor: Arc<MockSensor>,
        config: Config,
    ) -> Arc<AppState> {
        AppState::new(PartitionStore::open(dir), config, sensor, time::UtcOffset::UTC)
    }

    #[tokio::test]
    async fn test_ingest_stores_reading() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let state = create_test_state(dir.path(), sensor.clone());
        let collector = Collector::new(state.clone());

        let now = datetime!(2024-01-05 03:15 UTC);
        let outcome = collector.ingest(now).await.unwrap();

        let expected = Reading {
            temperature: 21.5,
            humidity: 40.0,
            timestamp: 1_704_424_500_000,
        };
        assert_eq!(outcome, IngestOutcome::Stored(expected));

        let key = PartitionKey::new(2024, Month::January);
        assert_eq!(state.store.load_partition(&key).unwrap(), vec![expected]);
        assert!(dir.path().join("2024").join("January.json").is_file());
        assert_eq!(sensor.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_ingest_twice_in_same_hour_stores_once() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let state = create_test_state(dir.path(), sensor.clone());
        let collector = Collector::new(state.clone());

        collector.ingest(datetime!(2024-01-05 03:00 UTC)).await.unwrap();
        let second = collector.ingest(datetime!(2024-01-05 03:59 UTC)).await.unwrap();
        assert_eq!(second, IngestOutcome::AlreadyRecorded { hour: 3 });

        let key = PartitionKey::new(2024, Month::January);
        assert_eq!(state.store.load_partition(&key).unwrap().len(), 1);

        let stats = state.collector.stats.read().await;
        assert_eq!(stats.stored_count, 1);
        assert_eq!(stats.skipped_count, 1);
    }

    #[tokio::test]
    async fn test_hour_of_day_dedup_spans_the_partition() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let state = create_test_state(dir.path(), sensor);
        let collector = Collector::new(state.clone());

        collector.ingest(datetime!(2024-01-05 03:00 UTC)).await.unwrap();
        let outcome = collector.ingest(datetime!(2024-01-06 03:30 UTC)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::AlreadyRecorded { hour: 3 });

        let outcome = collector.ingest(datetime!(2024-01-06 04:00 UTC)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));
    }

    #[tokio::test]
    async fn test_calendar_hour_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let mut config = Config::default();
        config.collector.dedup_scope = DedupScope::CalendarHour;
        let state = create_state_with_config(dir.path(), sensor, config);
        let collector = Collector::new(state.clone());

        collector.ingest(datetime!(2024-01-05 03:00 UTC)).await.unwrap();
        let outcome = collector.ingest(datetime!(2024-01-06 03:30 UTC)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));
        let outcome = collector.ingest(datetime!(2024-01-06 03:45 UTC)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::AlreadyRecorded { hour: 3 });
    }

    #[tokio::test]
    async fn test_ingest_new_month_uses_new_partition() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let state = create_test_state(dir.path(), sensor);
        let collector = Collector::new(state.clone());

        collector.ingest(datetime!(2024-01-31 03:00 UTC)).await.unwrap();
        let outcome = collector.ingest(datetime!(2024-02-01 03:00 UTC)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));

        let keys = state.store.list_partitions().unwrap();
        assert_eq!(
            keys,
            vec![
                PartitionKey::new(2024, Month::January),
                PartitionKey::new(2024, Month::February),
            ]
        );
    }

    #[tokio::test]
    async fn test_ingest_resolves_partition_in_local_offset() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let state = AppState::new(
            PartitionStore::open(dir.path()),
            Config::default(),
            sensor,
            offset!(+02:00),
        );
        let collector = Collector::new(state.clone());

        // 23:30 UTC on Jan 31 is 01:30 on Feb 1 at +02:00
        collector.ingest(datetime!(2024-01-31 23:30 UTC)).await.unwrap();

        let key = PartitionKey::new(2024, Month::February);
        let readings = state.store.load_partition(&key).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].local_time(offset!(+02:00)).unwrap().hour(), 1);
    }

    #[tokio::test]
    async fn test_ingest_fetch_failure_leaves_storage_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        sensor.push_failure("connection refused");
        let state = create_test_state(dir.path(), sensor);
        let collector = Collector::new(state.clone());

        let result = collector.ingest(datetime!(2024-01-05 03:00 UTC)).await;
        assert!(matches!(result, Err(IngestError::Fetch(_))));
        assert!(!dir.path().join("2024").exists());

        let stats = state.collector.stats.read().await;
        assert_eq!(stats.failure_count, 1);
        assert!(stats.last_error.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_ingest_store_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the year directory should go
        std::fs::write(dir.path().join("2024"), b"").unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let state = create_test_state(dir.path(), sensor);
        let collector = Collector::new(state);

        let result = collector.ingest(datetime!(2024-01-05 03:00 UTC)).await;
        assert!(matches!(result, Err(IngestError::Store(_))));
    }

    #[tokio::test]
    async fn test_ingest_over_corrupt_partition_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let state = create_test_state(dir.path(), sensor);
        let key = PartitionKey::new(2024, Month::January);
        let path = state.store.locate(&key).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        let collector = Collector::new(state.clone());
        let outcome = collector.ingest(datetime!(2024-01-05 03:00 UTC)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));
        assert_eq!(state.store.load_partition(&key).unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest_records_hour_once() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::new(SensorSample {
            temperature: 18.0,
            humidity: 60.0,
        }));
        let state = create_test_state(dir.path(), sensor);
        let collector = Collector::new(state.clone());
        let now = datetime!(2024-01-05 03:00 UTC);

        let runs = (0..8).map(|_| {
            let collector = collector.clone();
            tokio::spawn(async move { collector.ingest(now).await })
        });
        let results = futures::future::join_all(runs).await;

        let stored = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .filter(|o| matches!(o, IngestOutcome::Stored(_)))
            .count();
        assert_eq!(stored, 1);

        let key = PartitionKey::new(2024, Month::January);
        assert_eq!(state.store.load_partition(&key).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_on_start_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let state = create_test_state(dir.path(), sensor.clone());
        let collector = Collector::new(state.clone());

        let handle = collector.start().unwrap();
        assert!(state.collector.is_running());
        assert!(collector.start().is_none());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sensor.fetch_count(), 1);

        collector.stop();
        handle.await.unwrap();
        assert!(!state.collector.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_right_after_start_ends_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let state = create_test_state(dir.path(), sensor.clone());
        let collector = Collector::new(state.clone());

        let handle = collector.start().unwrap();
        collector.stop();
        // Still running until the task has exited
        assert!(collector.start().is_none());

        tokio::time::timeout(Duration::from_secs(3 * 3600), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert!(!state.collector.is_running());
        assert_eq!(sensor.fetch_count(), 0);

        // A fresh start runs a single scheduler again
        let handle = collector.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sensor.fetch_count(), 1);
        collector.stop();
        handle.await.unwrap();
        assert!(!state.collector.is_running());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_count_as_fetch_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2024"), b"").unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        sensor.push_failure("offline");
        sensor.push_failure("offline");
        let state = create_test_state(dir.path(), sensor);
        let collector = Collector::new(state.clone());
        let now = datetime!(2024-01-05 03:00 UTC);

        assert!(matches!(collector.ingest(now).await, Err(IngestError::Fetch(_))));
        assert!(matches!(collector.ingest(now).await, Err(IngestError::Fetch(_))));
        assert_eq!(state.collector.stats.read().await.consecutive_fetch_failures, 2);

        assert!(matches!(collector.ingest(now).await, Err(IngestError::Store(_))));
        let stats = state.collector.stats.read().await;
        assert_eq!(stats.consecutive_fetch_failures, 0);
        assert_eq!(stats.failure_count, 3);
    }

    #[tokio::test]
    async fn test_scheduler_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Arc::new(MockSensor::with_values(21.5, 40.0));
        let mut config = Config::default();
        config.collector.enabled = false;
        let state = create_state_with_config(dir.path(), sensor, config);

        assert!(Collector::new(state.clone()).start().is_none());
        assert!(!state.collector.is_running());
    }

    #[test]
    fn test_delay_until_next_tick() {
        let hour = Duration::from_secs(3600);

        assert_eq!(
            delay_until_next_tick(datetime!(2024-01-05 10:59:30 UTC), hour),
            Duration::from_secs(30)
        );
        assert_eq!(
            delay_until_next_tick(datetime!(2024-01-05 10:00:00 UTC), hour),
            hour
        );
        assert_eq!(
            delay_until_next_tick(datetime!(2024-01-05 10:00:00.250 UTC), hour),
            Duration::from_millis(3600 * 1000 - 250)
        );
    }

    #[test]
    fn test_delay_until_next_tick_aligns_to_local_offset() {
        // 10:10 local at +05:30; the next local hour is 50 minutes away
        let now = datetime!(2024-01-05 10:10 +05:30);
        assert_eq!(
            delay_until_next_tick(now, Duration::from_secs(3600)),
            Duration::from_secs(50 * 60)
        );

        // Six-hour period: next boundary is 12:00 local
        assert_eq!(
            delay_until_next_tick(now, Duration::from_secs(6 * 3600)),
            Duration::from_secs(110 * 60)
        );
    }
}
