//! Thermolog - Hourly sensor collector and HTTP API.
//!
//! Run with: `cargo run -p thermolog-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use time::UtcOffset;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use thermolog_service::{AppState, Collector, Config, HttpSensor, api};
use thermolog_store::PartitionStore;

/// Thermolog - Hourly sensor collector and HTTP API.
#[derive(Parser, Debug)]
#[command(name = "thermolog")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Data directory (overrides config).
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Sensor URL (overrides config).
    #[arg(short, long)]
    sensor_url: Option<String>,

    /// Disable background collector (API only mode).
    #[arg(long)]
    no_collector: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The host offset must be read before any other thread exists
    let host_offset = UtcOffset::current_local_offset().ok();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_server(args, host_offset))
}

async fn run_server(args: Args, host_offset: Option<UtcOffset>) -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("thermolog_service=info".parse()?)
                .add_directive("thermolog_store=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.path = data_dir;
    }
    if let Some(url) = args.sensor_url {
        config.sensor.url = url;
    }
    if args.no_collector {
        config.collector.enabled = false;
    }
    config.validate()?;

    let offset = config.collector.local_offset(host_offset)?;
    if host_offset.is_none() && config.collector.utc_offset.is_none() {
        info!("Local offset could not be determined, using UTC");
    }

    let store = PartitionStore::open(&config.storage.path);
    info!("Storing readings under {}", store.root().display());
    let sensor = HttpSensor::new(
        &config.sensor.url,
        Duration::from_secs(config.sensor.timeout_secs),
    )?;

    // Create application state
    let state = AppState::new(store, config.clone(), Arc::new(sensor), offset);

    // Start the background collector
    let collector = Collector::new(Arc::clone(&state));
    if collector.start().is_none() {
        info!("Background collector disabled");
    }

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse()?;

    info!("Starting server on {}", addr);

    // Run the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    collector.stop();
    Ok(())
}
