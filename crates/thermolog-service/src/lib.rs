//! Hourly sensor collector and HTTP query API.
//!
//! This crate provides a service that:
//! - Polls one temperature/humidity sensor over HTTP on a schedule
//! - Keeps at most one reading per hour in monthly JSON partitions
//! - Exposes an HTTP API for filtering readings and daily temperature ranges
//!
//! # HTTP Endpoints
//!
//! - `GET /weather?filterBy=<criterion>&filterValue=<value>` - Readings of the
//!   current month, filtered by `day`, `month`, `year`, `hour` or `timestamp`
//! - `GET /tempdata?date=<YYYY-MM-DD>&month=<1-12>&year=<yyyy>` - Highest and
//!   lowest temperature of one day
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Collector statistics and partitions on disk
//! - `POST /api/collect` - Run one collection now
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/thermolog/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/thermolog"
//!
//! [sensor]
//! url = "http://192.168.1.40/"
//! timeout_secs = 10
//!
//! [collector]
//! interval_secs = 3600
//! run_on_start = true
//! utc_offset = "+01:00"
//! ```

pub mod api;
pub mod collector;
pub mod config;
pub mod sensor;
pub mod state;

pub use collector::{Collector, IngestError, IngestOutcome};
pub use config::{
    CollectorConfig, Config, ConfigError, DedupScope, SensorConfig, ServerConfig, StorageConfig,
};
pub use sensor::{HttpSensor, MockSensor, SensorError, SensorSource};
pub use state::{AppState, CollectionStats};
