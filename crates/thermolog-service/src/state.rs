//! Application state shared across handlers and the collector.
//!
//! # Local time
//!
//! All calendar decisions (which partition is current, which hour a reading
//! belongs to, what "today" is) use [`AppState::offset`]. The clock is only
//! read through [`AppState::now`]; everything below the HTTP handlers and the
//! scheduler receives `now` as a parameter.
//!
//! # Ingestion lock
//!
//! `ingest_lock` serializes the load-dedup-append-save cycle so that two
//! overlapping collections (the scheduled tick and `POST /api/collect`)
//! cannot both record a reading for the same hour.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use thermolog_store::PartitionStore;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::{Mutex, RwLock, watch};

use crate::config::Config;
use crate::sensor::SensorSource;

/// Shared application state.
pub struct AppState {
    /// Partition storage.
    pub store: PartitionStore,
    /// Configuration the service was started with.
    pub config: Config,
    /// Where readings come from.
    pub sensor: Arc<dyn SensorSource>,
    /// Local offset for partitioning and calendar queries.
    pub offset: UtcOffset,
    /// Guards the read-modify-write cycle on the current partition.
    pub ingest_lock: Mutex<()>,
    /// Collector control state.
    pub collector: CollectorState,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        store: PartitionStore,
        config: Config,
        sensor: Arc<dyn SensorSource>,
        offset: UtcOffset,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            sensor,
            offset,
            ingest_lock: Mutex::new(()),
            collector: CollectorState::new(),
        })
    }

    /// The current time in the local offset.
    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// State for tracking and controlling the collector.
pub struct CollectorState {
    /// Whether the scheduler is currently running.
    running: AtomicBool,
    /// When the scheduler was started (Unix timestamp).
    started_at: AtomicU64,
    /// Channel to signal the scheduler to stop.
    stop_tx: watch::Sender<bool>,
    /// Receiver for stop signal (cloned by the scheduler task).
    stop_rx: watch::Receiver<bool>,
    /// Collection statistics.
    pub stats: RwLock<CollectionStats>,
}

impl CollectorState {
    /// Create a new collector state.
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            stop_tx,
            stop_rx,
            stats: RwLock::new(CollectionStats::default()),
        }
    }

    /// Check if the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the scheduler as started.
    ///
    /// Returns `false` if it was already running.
    pub fn try_start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        self.started_at.store(now, Ordering::SeqCst);
        true
    }

    /// Mark the scheduler as stopped. Called by the scheduler task on exit.
    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Get the scheduler start time.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal the scheduler to stop.
    ///
    /// The scheduler stays marked as running until its task exits.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Reset the stop signal (for restarting).
    pub fn reset_stop(&self) {
        let _ = self.stop_tx.send(false);
    }
}

impl Default for CollectorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome counters for ingestion runs.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CollectionStats {
    /// When an ingestion last ran, whatever its outcome.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run_at: Option<OffsetDateTime>,
    /// When a reading was last stored.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_stored_at: Option<OffsetDateTime>,
    /// When an ingestion last failed.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_error_at: Option<OffsetDateTime>,
    /// Last error message.
    pub last_error: Option<String>,
    /// Readings stored.
    pub stored_count: u64,
    /// Runs skipped because the hour already had a reading.
    pub skipped_count: u64,
    /// Failed runs.
    pub failure_count: u64,
    /// Sensor fetch failures since the sensor last answered.
    pub consecutive_fetch_failures: u32,
}

impl CollectionStats {
    /// Record a run that stored a reading.
    pub fn record_stored(&mut self, at: OffsetDateTime) {
        self.last_run_at = Some(at);
        self.last_stored_at = Some(at);
        self.stored_count += 1;
        self.consecutive_fetch_failures = 0;
    }

    /// Record a run that found the hour already recorded.
    pub fn record_skipped(&mut self, at: OffsetDateTime) {
        self.last_run_at = Some(at);
        self.skipped_count += 1;
        self.consecutive_fetch_failures = 0;
    }

    /// Record a run where the sensor could not be read.
    pub fn record_fetch_failure(&mut self, at: OffsetDateTime, error: &str) {
        self.record_error(at, error);
        self.consecutive_fetch_failures += 1;
    }

    /// Record a run where the sensor answered but storing failed.
    pub fn record_store_failure(&mut self, at: OffsetDateTime, error: &str) {
        self.record_error(at, error);
        self.consecutive_fetch_failures = 0;
    }

    fn record_error(&mut self, at: OffsetDateTime, error: &str) {
        self.last_run_at = Some(at);
        self.last_error_at = Some(at);
        self.last_error = Some(error.to_string());
        self.failure_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::MockSensor;
    use time::macros::{datetime, offset};

    fn create_test_state() -> Arc<AppState> {
        AppState::new(
            PartitionStore::open("/nonexistent/thermolog"),
            Config::default(),
            Arc::new(MockSensor::with_values(20.0, 50.0)),
            offset!(+02:00),
        )
    }

    #[test]
    fn test_app_state_now_uses_offset() {
        let state = create_test_state();
        assert_eq!(state.now().offset(), offset!(+02:00));
    }

    #[test]
    fn test_collector_state() {
        let collector = CollectorState::new();
        assert!(!collector.is_running());
        assert!(collector.started_at().is_none());

        assert!(collector.try_start());
        assert!(collector.is_running());
        assert!(collector.started_at().is_some());
        assert!(!collector.try_start());

        collector.signal_stop();
        assert!(collector.is_running());
        assert!(*collector.subscribe_stop().borrow());

        collector.mark_stopped();
        assert!(!collector.is_running());

        collector.reset_stop();
        assert!(!*collector.subscribe_stop().borrow());
    }

    #[test]
    fn test_collection_stats_counters() {
        let mut stats = CollectionStats::default();
        let at = datetime!(2024-01-05 03:00 UTC);

        stats.record_fetch_failure(at, "offline");
        stats.record_fetch_failure(at, "offline");
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.consecutive_fetch_failures, 2);
        assert_eq!(stats.last_error.as_deref(), Some("offline"));

        stats.record_store_failure(at, "disk full");
        assert_eq!(stats.failure_count, 3);
        assert_eq!(stats.consecutive_fetch_failures, 0);
        assert_eq!(stats.last_error.as_deref(), Some("disk full"));

        stats.record_fetch_failure(at, "offline");
        stats.record_stored(at);
        assert_eq!(stats.stored_count, 1);
        assert_eq!(stats.consecutive_fetch_failures, 0);

        stats.record_skipped(at);
        assert_eq!(stats.skipped_count, 1);
        assert_eq!(stats.last_run_at, Some(at));
    }

    #[test]
    fn test_collection_stats_serialization() {
        let mut stats = CollectionStats::default();
        stats.record_stored(datetime!(2024-01-05 03:00 UTC));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["stored_count"], 1);
        assert_eq!(json["last_stored_at"], "2024-01-05T03:00:00Z");
        assert!(json["last_error"].is_null());
    }
}
