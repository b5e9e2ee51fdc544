//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (at least one feed open)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::ConnectionState;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::gateway::GatewayState;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::snapshot::MemorySnapshotStore;
use crate::infrastructure::stream::ConnectionHandle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-feed connection status.
    pub feeds: Vec<FeedInfo>,
    /// Snapshot cache status.
    pub snapshots: SnapshotStatus,
    /// Downstream client status.
    pub clients: ClientStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All feeds open.
    Healthy,
    /// Some feeds open.
    Degraded,
    /// No feed open.
    Unhealthy,
}

/// Individual feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Feed name, e.g. `Binance:Spot`.
    pub feed: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Whether this feed is open.
    pub connected: bool,
    /// Inbound frames received.
    pub frames_received: u64,
    /// Reconnect attempts scheduled.
    pub reconnect_attempts: u64,
    /// Active subscriptions.
    pub subscriptions: usize,
}

/// Snapshot cache status.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatus {
    /// Live snapshot entries.
    pub entries: usize,
}

/// Downstream client status.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Connected gateway clients.
    pub gateway: usize,
    /// Broadcast receivers (gateway clients plus in-process consumers).
    pub broadcast_receivers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    connections: Vec<ConnectionHandle>,
    store: Arc<MemorySnapshotStore>,
    broadcast_hub: SharedBroadcastHub,
    gateway: Arc<GatewayState>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        connections: Vec<ConnectionHandle>,
        store: Arc<MemorySnapshotStore>,
        broadcast_hub: SharedBroadcastHub,
        gateway: Arc<GatewayState>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            connections,
            store,
            broadcast_hub,
            gateway,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Router with all health routes.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let is_ready = state
        .connections
        .iter()
        .any(|c| c.stats().state == ConnectionState::Open);

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feeds: Vec<FeedInfo> = state.connections.iter().map(feed_info).collect();
    let status = determine_health_status(&feeds);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feeds,
        snapshots: SnapshotStatus {
            entries: state.store.len(),
        },
        clients: ClientStatus {
            gateway: state.gateway.client_count(),
            broadcast_receivers: state.broadcast_hub.stats().receivers,
        },
    }
}

fn feed_info(handle: &ConnectionHandle) -> FeedInfo {
    let stats = handle.stats();
    FeedInfo {
        feed: handle.feed().to_string(),
        state: stats.state,
        connected: stats.state == ConnectionState::Open,
        frames_received: stats.frames_received,
        reconnect_attempts: stats.reconnect_attempts,
        subscriptions: stats.subscriptions,
    }
}

fn determine_health_status(feeds: &[FeedInfo]) -> HealthStatus {
    let connected = feeds.iter().filter(|f| f.connected).count();

    match connected {
        0 => HealthStatus::Unhealthy,
        n if n == feeds.len() => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        Classification, ConnectionLifecycle, FrameClassifier, ProtocolError, StreamControl,
    };
    use crate::domain::streaming::{Exchange, FeedId, Market};
    use crate::infrastructure::broadcast::BroadcastHub;
    use crate::infrastructure::stream::{StreamConfig, StreamConnection};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Noop;

    impl ConnectionLifecycle for Noop {
        fn on_open(&self, _control: Arc<dyn StreamControl>) {}
        fn on_close(&self) {}
    }

    impl FrameClassifier for Noop {
        fn classify(&self, _raw: &str) -> Classification {
            Classification::Unroutable(ProtocolError::UnknownShape)
        }
    }

    fn feed(name: &str, connected: bool) -> FeedInfo {
        FeedInfo {
            feed: name.to_string(),
            state: if connected {
                ConnectionState::Open
            } else {
                ConnectionState::Reconnecting
            },
            connected,
            frames_received: 0,
            reconnect_attempts: 0,
            subscriptions: 0,
        }
    }

    fn state() -> Arc<HealthServerState> {
        let config = StreamConfig::new(
            FeedId::new(Exchange::Binance, Market::Spot),
            "ws://127.0.0.1:1/ws",
        );
        let connection = StreamConnection::new(config, Arc::new(Noop), Arc::new(Noop));
        let hub = Arc::new(BroadcastHub::with_defaults());
        let gateway = Arc::new(GatewayState::new(Arc::clone(&hub), CancellationToken::new()));

        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            vec![connection.handle()],
            Arc::new(MemorySnapshotStore::new()),
            hub,
            gateway,
        ))
    }

    async fn get(path: &str) -> (StatusCode, String) {
        let response = HealthServer::router(state())
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn determine_status_by_open_feeds() {
        let open = feed("Binance:Spot", true);
        let down = feed("Binance:CMF", false);

        assert_eq!(determine_health_status(&[open.clone(), open.clone()]), HealthStatus::Healthy);
        assert_eq!(determine_health_status(&[open, down.clone()]), HealthStatus::Degraded);
        assert_eq!(determine_health_status(&[down]), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(&[]), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (status, body) = get("/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn not_ready_without_open_feed() {
        let (status, body) = get("/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");
    }

    #[tokio::test]
    async fn health_reports_each_feed() {
        let (status, body) = get("/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["feeds"][0]["feed"], "Binance:Spot");
        assert_eq!(json["feeds"][0]["state"], "DISCONNECTED");
        assert_eq!(json["snapshots"]["entries"], 0);
        assert_eq!(json["clients"]["gateway"], 0);
    }
}
