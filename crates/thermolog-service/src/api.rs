//! HTTP endpoints.
//!
//! Query endpoints read the current monthly partition, resolved from the
//! local time at request start:
//!
//! - `GET /weather?filterBy=<criterion>&filterValue=<value>` returns the
//!   readings that pass the filter.
//! - `GET /tempdata?date=<YYYY-MM-DD>&month=<1-12>&year=<yyyy>` returns the
//!   temperature range of one day.
//!
//! Service endpoints live under `/api`: health, status and a manual
//! collection trigger.
//!
//! ## Error Handling
//!
//! All endpoints return JSON errors of the form `{"message": "..."}` via
//! [`AppError`]. Client errors carry their detail. Storage failures are
//! logged and answered with a generic 500.
//!
//! # Example
//!
//! ```ignore
//! use thermolog_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, warn};

use thermolog_store::{DayQuery, QueryError, ReadingFilter, TemperatureRange, filter_readings};
use thermolog_types::{PartitionKey, Reading};

use crate::collector::{Collector, IngestError, IngestOutcome};
use crate::sensor::SensorError;
use crate::state::{AppState, CollectionStats};

/// Body of the 404 returned by `/tempdata`.
pub const NO_DATA_MESSAGE: &str = "No data available for the specified day.";

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Queries
        .route("/weather", get(get_weather))
        .route("/tempdata", get(get_temp_data))
        // Service
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/collect", post(collect_now))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

// ==========================================================================
// Queries
// ==========================================================================

/// Query parameters for `/weather`.
#[derive(Debug, Default, Deserialize)]
pub struct WeatherQuery {
    /// Criterion: `day`, `month`, `year`, `hour` or `timestamp`.
    #[serde(rename = "filterBy")]
    pub filter_by: Option<String>,
    /// Criterion value.
    #[serde(rename = "filterValue")]
    pub filter_value: Option<String>,
}

/// Readings of the current partition, optionally filtered.
///
/// An unknown or absent `filterBy` returns the whole partition.
async fn get_weather(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let filter = ReadingFilter::parse(
        query.filter_by.as_deref(),
        query.filter_value.as_deref(),
        state.offset,
    )?;

    let key = PartitionKey::from_datetime(state.now());
    let readings = state.store.load_partition(&key)?;

    Ok(Json(filter_readings(&readings, &filter, state.offset)))
}

/// Query parameters for `/tempdata`.
#[derive(Debug, Default, Deserialize)]
pub struct TempDataQuery {
    /// Base date (`YYYY-MM-DD`); defaults to today.
    pub date: Option<String>,
    /// Month override (1-12).
    pub month: Option<String>,
    /// Year override.
    pub year: Option<String>,
}

/// Temperature range of one day.
#[derive(Debug, Serialize, Deserialize)]
pub struct TempDataResponse {
    #[serde(flatten)]
    pub range: TemperatureRange,
    /// The selected day as `YYYY-MM-DD`.
    pub day: String,
}

async fn get_temp_data(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TempDataQuery>,
) -> Result<Json<TempDataResponse>, AppError> {
    let now = state.now();
    let day = DayQuery::resolve(
        query.date.as_deref(),
        query.month.as_deref(),
        query.year.as_deref(),
        now.date(),
        state.offset,
    )?;

    let key = PartitionKey::from_datetime(now);
    let readings = state.store.load_partition(&key)?;
    let range = TemperatureRange::from_readings(&day.select(&readings, state.offset));
    if range.is_empty() {
        return Err(AppError::NotFound(NO_DATA_MESSAGE.to_string()));
    }

    Ok(Json(TempDataResponse {
        range,
        day: day.to_string(),
    }))
}

// ==========================================================================
// Service Status and Collection
// ==========================================================================

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service version.
    pub version: &'static str,
    /// Current local time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Collector status.
    pub collector: CollectorStatus,
    /// Partition new readings go to.
    pub current_partition: PartitionKey,
    /// Number of readings in the current partition.
    pub current_readings: usize,
    /// Partitions on disk, oldest first.
    pub partitions: Vec<PartitionKey>,
}

/// Collector status.
#[derive(Debug, Serialize)]
pub struct CollectorStatus {
    /// Whether the scheduler is running.
    pub running: bool,
    /// When the scheduler was started (if running).
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// How long the scheduler has been running (in seconds).
    pub uptime_seconds: Option<u64>,
    /// Seconds between scheduled collections.
    pub interval_secs: u64,
    /// Ingestion counters.
    pub stats: CollectionStats,
}

/// Get service status including collector statistics and partitions.
async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let now = state.now();
    let running = state.collector.is_running();
    let started_at = state.collector.started_at().filter(|_| running);
    let uptime_seconds = started_at.map(|s| (now - s).whole_seconds().max(0) as u64);
    let stats = state.collector.stats.read().await.clone();

    let current_partition = PartitionKey::from_datetime(now);
    let path = state.store.partition_path(&current_partition);
    let current_readings = if path.is_file() {
        state.store.load_or_create(&path).len()
    } else {
        0
    };
    let partitions = state.store.list_partitions()?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        collector: CollectorStatus {
            running,
            started_at,
            uptime_seconds,
            interval_secs: state.config.collector.interval_secs,
            stats,
        },
        current_partition,
        current_readings,
        partitions,
    }))
}

/// Response for a manual collection.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CollectResponse {
    /// A new reading was stored.
    Stored { reading: Reading },
    /// The current hour already had a reading.
    AlreadyRecorded { hour: u8 },
}

/// Run one ingestion immediately.
async fn collect_now(State(state): State<Arc<AppState>>) -> Result<Json<CollectResponse>, AppError> {
    let outcome = Collector::new(Arc::clone(&state))
        .ingest(state.now())
        .await?;

    Ok(Json(match outcome {
        IngestOutcome::Stored(reading) => CollectResponse::Stored { reading },
        IngestOutcome::AlreadyRecorded { hour } => CollectResponse::AlreadyRecorded { hour },
    }))
}

// ==========================================================================
// Errors
// ==========================================================================

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(thermolog_store::Error),
    Sensor(SensorError),
}

impl From<thermolog_store::Error> for AppError {
    fn from(e: thermolog_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Fetch(e) => AppError::Sensor(e),
            IngestError::Store(e) => AppError::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Sensor(e) => {
                warn!("Sensor request failed: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::Store(e) => {
                error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
