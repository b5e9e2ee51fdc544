//! Downstream WebSocket Gateway
//!
//! Serves the fan-out stream to downstream consumers at `GET /ws`. Every
//! connected client receives every snapshot batch as a JSON text frame:
//!
//! ```json
//! {"channel":"Binance:SpotMiniTicker","payload":[{"type":"mini_ticker", ...}]}
//! ```
//!
//! Clients do not send anything meaningful; inbound text is ignored and
//! pings are answered. A client that lags behind the broadcast buffer
//! skips the missed batches.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::{Router, routing::get};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics;

// =============================================================================
// Gateway State
// =============================================================================

/// Shared state for the gateway.
pub struct GatewayState {
    hub: SharedBroadcastHub,
    clients: AtomicUsize,
    cancel: CancellationToken,
}

impl GatewayState {
    /// Create gateway state over a broadcast hub.
    #[must_use]
    pub const fn new(hub: SharedBroadcastHub, cancel: CancellationToken) -> Self {
        Self {
            hub,
            clients: AtomicUsize::new(0),
            cancel,
        }
    }

    /// Connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    fn client_joined(&self) -> usize {
        let count = self.clients.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_gateway_clients(count);
        count
    }

    fn client_left(&self) -> usize {
        let count = self.clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::set_gateway_clients(count);
        count
    }
}

// =============================================================================
// Gateway Server
// =============================================================================

/// WebSocket gateway server.
pub struct GatewayServer {
    port: u16,
    state: Arc<GatewayState>,
}

impl GatewayServer {
    /// Create a gateway server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<GatewayState>) -> Self {
        Self { port, state }
    }

    /// Router serving `/ws`, exposed for embedding and tests.
    #[must_use]
    pub fn router(state: Arc<GatewayState>) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state)
    }

    /// Run the gateway until the state's cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if binding fails or the server stops with
    /// an I/O error.
    pub async fn run(self) -> Result<(), GatewayError> {
        let cancel = self.state.cancel.clone();
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| GatewayError::ServerFailed(e.to_string()))?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| {
        let client_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("gateway_client", component = "gateway", client = %client_id);
        handle_socket(socket, state).instrument(span)
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let clients = state.client_joined();
    let mut batches = BroadcastStream::new(state.hub.batches_rx());
    tracing::info!(clients, "Gateway client connected");

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            batch = batches.next() => match batch {
                Some(Ok(batch)) => {
                    let text = match serde_json::to_string(&batch) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, channel = %batch.channel, "Failed to encode batch");
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Gateway client lagging; batches skipped");
                }
                None => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    if ws_tx.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let clients = state.client_left();
    tracing::info!(clients, "Gateway client disconnected");
}

// =============================================================================
// Errors
// =============================================================================

/// Gateway server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
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
    use crate::application::ports::SnapshotBatch;
    use crate::infrastructure::broadcast::BroadcastHub;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    #[tokio::test]
    async fn client_receives_published_batches() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let cancel = CancellationToken::new();
        let state = Arc::new(GatewayState::new(Arc::clone(&hub), cancel.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = GatewayServer::router(Arc::clone(&state));
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        });

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        // Wait for the server side to subscribe to the hub
        while hub.receiver_count() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(state.client_count(), 1);

        let _ = hub.send_batch(SnapshotBatch {
            channel: "Binance:SpotMiniTicker".to_string(),
            payload: vec![],
        });

        let frame = client.next().await.unwrap().unwrap();
        let WsMessage::Text(text) = frame else {
            panic!("expected text frame, got {frame:?}");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["channel"], "Binance:SpotMiniTicker");
        assert!(json["payload"].as_array().unwrap().is_empty());

        cancel.cancel();
        let frame = client.next().await.unwrap().unwrap();
        assert!(matches!(frame, WsMessage::Close(_)));
    }
}
