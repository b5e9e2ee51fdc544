//! Market Feed Binary
//!
//! Starts the market data ingestion, snapshot cache and fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `MARKET_FEED_MARKETS`: Markets to run - "spot,coin_futures" (default: both)
//! - `MARKET_FEED_SPOT_WS_URL` / `MARKET_FEED_SPOT_REST_URL`: Spot endpoints
//! - `MARKET_FEED_COIN_FUTURES_WS_URL` / `MARKET_FEED_COIN_FUTURES_REST_URL`: Coin futures endpoints
//! - `MARKET_FEED_SNAPSHOT_TTL_SECS`: Snapshot TTL (default: 172800)
//! - `MARKET_FEED_FANOUT_INTERVAL_SECS`: Fan-out period (default: 5)
//! - `MARKET_FEED_RECONNECT_DELAY_MS`: Linear backoff base (default: 3000)
//! - `MARKET_FEED_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 5)
//! - `MARKET_FEED_BOOK_TICKER_SYMBOLS`, `MARKET_FEED_DEPTH_SYMBOLS`: Comma lists
//! - `MARKET_FEED_GATEWAY_PORT`: Downstream WebSocket port (default: 4000)
//! - `MARKET_FEED_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log filter (default: `market_feed=info`)

use std::sync::Arc;
use std::time::Duration;

use market_feed::application::ports::{BatchSink, SharedSnapshotStore, StreamNaming};
use market_feed::application::services::{
    BootstrapResolver, FanoutConfig, FanoutScheduler, MarketFeedService,
};
use market_feed::infrastructure::binance::{BinanceCatalogClient, BinanceClassifier};
use market_feed::infrastructure::broadcast::BroadcastHub;
use market_feed::infrastructure::gateway::{GatewayServer, GatewayState};
use market_feed::infrastructure::health::{HealthServer, HealthServerState};
use market_feed::infrastructure::snapshot::MemorySnapshotStore;
use market_feed::infrastructure::stream::StreamConnection;
use market_feed::infrastructure::telemetry;
use market_feed::{ServiceConfig, init_metrics};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err("failed to install rustls crypto provider".into());
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        span_export = telemetry_guard.is_exporting(),
        "Starting market feed"
    );

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store = Arc::new(MemorySnapshotStore::new());
    let shared_store: SharedSnapshotStore = store.clone();
    let broadcast_hub = Arc::new(BroadcastHub::new(config.broadcast_config()));
    let naming: Arc<dyn StreamNaming> = Arc::new(config.subscriptions.stream_naming());

    // One connection per market
    let mut connections = Vec::with_capacity(config.markets.len());
    let mut namespaces = Vec::new();
    for market in &config.markets {
        let profile = market.profile();
        let catalog = BinanceCatalogClient::new(&profile, config.catalog.timeout)?;
        let resolver = BootstrapResolver::new(profile.feed, Arc::new(catalog))
            .with_policy(config.catalog.retry_policy());

        let settings = config.feed_settings(market);
        namespaces.extend(settings.channel_namespaces());

        let service = Arc::new(MarketFeedService::new(
            settings,
            resolver,
            Arc::clone(&shared_store),
            Arc::clone(&naming),
            shutdown_token.child_token(),
        ));

        let connection = Arc::new(StreamConnection::new(
            config.stream.stream_config(market),
            Arc::new(BinanceClassifier::new()),
            service,
        ));
        connections.push(connection);
    }

    let mut tasks = JoinSet::new();

    for connection in &connections {
        let connection = Arc::clone(connection);
        tasks.spawn(async move {
            let feed = connection.handle().feed();
            if let Err(e) = connection.open().await {
                tracing::warn!(feed = %feed, error = %e, "Initial connect failed; retrying in background");
            }
            if let Err(e) = connection.join().await {
                tracing::error!(feed = %feed, error = %e, "Stream connection terminated");
            }
        });
    }

    // Fan-out scheduler
    let mut fanout_config = FanoutConfig::new(namespaces);
    fanout_config.interval = config.fanout_interval;
    let sink: Arc<dyn BatchSink> = broadcast_hub.clone();
    let fanout = FanoutScheduler::new(fanout_config, Arc::clone(&shared_store), sink);
    tasks.spawn(fanout.run(shutdown_token.child_token()));

    // Downstream gateway
    let gateway_state = Arc::new(GatewayState::new(
        Arc::clone(&broadcast_hub),
        shutdown_token.child_token(),
    ));
    let gateway = GatewayServer::new(config.server.gateway_port, Arc::clone(&gateway_state));
    tasks.spawn(async move {
        if let Err(e) = gateway.run().await {
            tracing::error!(error = %e, "Gateway error");
        }
    });

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        connections.iter().map(|c| c.handle()).collect(),
        Arc::clone(&store),
        Arc::clone(&broadcast_hub),
        gateway_state,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.child_token(),
    );
    tasks.spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!(feeds = connections.len(), "Market feed ready");

    await_shutdown(shutdown_token).await;

    for connection in &connections {
        connection.close();
    }

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out; aborting remaining tasks"
        );
        tasks.abort_all();
    }

    tracing::info!("Market feed stopped");
    drop(telemetry_guard);
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    let markets: Vec<String> = config.markets.iter().map(|m| m.feed().to_string()).collect();
    tracing::info!(
        markets = ?markets,
        snapshot_ttl_secs = config.snapshot_ttl.as_secs(),
        fanout_interval_secs = config.fanout_interval.as_secs(),
        gateway_port = config.server.gateway_port,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    for market in &config.markets {
        tracing::debug!(
            feed = %market.feed(),
            ws_url = %market.ws_url,
            rest_url = %market.rest_url,
            "Feed endpoints"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
