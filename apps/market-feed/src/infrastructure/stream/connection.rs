//! Stream Connection
//!
//! One long-lived WebSocket connection per (exchange, market) feed. The
//! connection owns the transport lifecycle (connect, heartbeat, reconnect
//! with backoff) and hands every inbound text frame, unparsed, to the
//! feed's [`FrameClassifier`]. Routed records are dispatched through the
//! connection's [`SubscriptionRegistry`] in arrival order.
//!
//! # Outbound frames
//!
//! `send`, `subscribe` and `unsubscribe` never touch the socket. Frames go
//! onto a bounded queue that the session loop drains while the connection
//! is `OPEN`. Frames queued before the first open are flushed, in order,
//! once it succeeds. Losing a session clears the registry and the
//! lifecycle re-seeds it on the next open, so frames still queued when a
//! session is lost are discarded with it. Frames queued while reconnecting
//! are flushed after the re-seed. A full queue is reported to the caller as [`SendError::QueueFull`].
//!
//! # Lifecycle
//!
//! ```text
//! DISCONNECTED ──open()──► CONNECTING ──► OPEN ──transport lost──► RECONNECTING
//!                              ▲                                       │
//!                              └────────── backoff delay ◄─────────────┘
//! close() from any state ──► CLOSING ──► DISCONNECTED (no further reconnects)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    Classification, ConnectionLifecycle, FrameClassifier, SendError, StreamControl,
};
use crate::domain::streaming::{ChannelKey, ConnectionState, FeedId};
use crate::domain::subscription::{DispatchOutcome, RecordHandler, SubscriptionRegistry};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Raw frames longer than this are truncated in logs.
const LOGGED_FRAME_LIMIT: usize = 512;

// =============================================================================
// Error Types
// =============================================================================

/// Errors establishing the transport.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// WebSocket handshake or TCP/TLS connect failed.
    #[error("WebSocket connect failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    /// The attempt did not complete in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// `close()` was called before the connection opened.
    #[error("connection closed before it opened")]
    Cancelled,

    /// `open()` was already called on this connection.
    #[error("connection already opened")]
    AlreadyOpened,
}

/// Terminal outcome of a connection's background task.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Consecutive reconnect attempts exceeded the configured bound.
    #[error("gave up after {attempts} consecutive reconnect attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// The background task panicked or was aborted.
    #[error("connection task failed: {0}")]
    Task(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one stream connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Feed identity (used for logs and metrics).
    pub feed: FeedId,
    /// WebSocket URL.
    pub url: String,
    /// Reconnection schedule.
    pub reconnect: ReconnectConfig,
    /// Heartbeat schedule.
    pub heartbeat: HeartbeatConfig,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Capacity of the outbound frame queue.
    pub outbound_capacity: usize,
}

impl StreamConfig {
    /// Configuration with default timings.
    #[must_use]
    pub fn new(feed: FeedId, url: impl Into<String>) -> Self {
        Self {
            feed,
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
            outbound_capacity: 256,
        }
    }
}

// =============================================================================
// Connection Handle
// =============================================================================

/// Counters exposed to the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Current state.
    pub state: ConnectionState,
    /// Inbound frames seen.
    pub frames_received: u64,
    /// Reconnect attempts scheduled.
    pub reconnect_attempts: u64,
    /// Active subscriptions.
    pub subscriptions: usize,
}

struct Shared {
    feed: FeedId,
    registry: SubscriptionRegistry,
    state: RwLock<ConnectionState>,
    outbound_tx: mpsc::Sender<String>,
    outbound_capacity: usize,
    cancel: CancellationToken,
    frames_received: AtomicU64,
    reconnect_attempts: AtomicU64,
}

/// Cloneable control handle for a [`StreamConnection`].
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("feed", &self.shared.feed)
            .field("state", &*self.shared.state.read())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Feed this connection serves.
    #[must_use]
    pub fn feed(&self) -> FeedId {
        self.shared.feed
    }

    /// The connection's subscription registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.shared.registry
    }

    /// Request shutdown. Idempotent and callable from any context; stops
    /// the session and any pending or in-flight reconnect.
    pub fn close(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();

        let mut state = self.shared.state.write();
        if *state != ConnectionState::Disconnected {
            *state = ConnectionState::Closing;
            metrics::set_connection_state(self.shared.feed, ConnectionState::Closing);
        }
    }

    /// Whether `close()` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: *self.shared.state.read(),
            frames_received: self.shared.frames_received.load(Ordering::Relaxed),
            reconnect_attempts: self.shared.reconnect_attempts.load(Ordering::Relaxed),
            subscriptions: self.shared.registry.len(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.shared.state.write() = state;
        metrics::set_connection_state(self.shared.feed, state);
    }
}

impl StreamControl for ConnectionHandle {
    fn send(&self, frame: String) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.shared.outbound_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull {
                capacity: self.shared.outbound_capacity,
            },
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    fn subscribe(
        &self,
        key: ChannelKey,
        params: Vec<String>,
        handler: RecordHandler,
    ) -> Result<String, SendError> {
        let registry = &self.shared.registry;
        let (frame, previous) = registry.subscribe(key.clone(), params, handler);

        let queued = frame
            .to_json()
            .map_err(SendError::from)
            .and_then(|json| self.send(json));

        match queued {
            Ok(()) => {
                metrics::set_active_subscriptions(self.shared.feed, registry.len());
                Ok(frame.id)
            }
            Err(e) => {
                registry.rollback(&frame, &key, previous);
                Err(e)
            }
        }
    }

    /// The registry entry is removed even if the frame cannot be queued.
    fn unsubscribe(&self, key: &ChannelKey) -> Result<bool, SendError> {
        let Some(frame) = self.shared.registry.unsubscribe(key) else {
            return Ok(false);
        };
        metrics::set_active_subscriptions(self.shared.feed, self.shared.registry.len());
        self.send(frame.to_json()?)?;
        Ok(true)
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }
}

// =============================================================================
// Stream Connection
// =============================================================================

/// Resilient WebSocket connection for one feed.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use market_feed::application::ports::{ConnectionLifecycle, StreamControl};
/// use market_feed::domain::streaming::{Exchange, FeedId, Market};
/// use market_feed::infrastructure::binance::BinanceClassifier;
/// use market_feed::infrastructure::stream::{StreamConfig, StreamConnection};
///
/// struct Owner;
///
/// impl ConnectionLifecycle for Owner {
///     fn on_open(&self, _control: Arc<dyn StreamControl>) {}
///     fn on_close(&self) {}
/// }
///
/// async fn example() {
///     let feed = FeedId::new(Exchange::Binance, Market::Spot);
///     let config = StreamConfig::new(feed, "wss://stream.binance.com:9443/ws");
///     let connection = StreamConnection::new(
///         config,
///         Arc::new(BinanceClassifier::new()),
///         Arc::new(Owner),
///     );
///
///     if connection.open().await.is_ok() {
///         // ... later
///         connection.close();
///     }
///     let _ = connection.join().await;
/// }
/// ```
pub struct StreamConnection {
    config: StreamConfig,
    handle: ConnectionHandle,
    classifier: Arc<dyn FrameClassifier>,
    lifecycle: Arc<dyn ConnectionLifecycle>,
    outbound_rx: Mutex<Option<mpsc::Receiver<String>>>,
    task: Mutex<Option<JoinHandle<Result<(), ConnectionError>>>>,
    span: tracing::Span,
}

impl StreamConnection {
    /// Create a connection. Nothing happens until [`Self::open`].
    #[must_use]
    pub fn new(
        config: StreamConfig,
        classifier: Arc<dyn FrameClassifier>,
        lifecycle: Arc<dyn ConnectionLifecycle>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let span = tracing::info_span!(
            "stream",
            component = "stream_connection",
            feed = %config.feed
        );
        let handle = ConnectionHandle {
            shared: Arc::new(Shared {
                feed: config.feed,
                registry: SubscriptionRegistry::new(),
                state: RwLock::new(ConnectionState::Disconnected),
                outbound_tx,
                outbound_capacity: config.outbound_capacity.max(1),
                cancel: CancellationToken::new(),
                frames_received: AtomicU64::new(0),
                reconnect_attempts: AtomicU64::new(0),
            }),
        };

        Self {
            config,
            handle,
            classifier,
            lifecycle,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
            span,
        }
    }

    /// Override the logging span.
    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Control handle.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Establish the transport and start the background session task.
    ///
    /// Resolves once the first attempt has either reached `OPEN` or failed.
    /// A failed first attempt is returned here, and the background task
    /// keeps reconnecting with backoff.
    ///
    /// # Errors
    ///
    /// Returns the first attempt's [`ConnectError`], or
    /// [`ConnectError::AlreadyOpened`] on a second call.
    pub async fn open(&self) -> Result<(), ConnectError> {
        let Some(outbound_rx) = self.outbound_rx.lock().take() else {
            return Err(ConnectError::AlreadyOpened);
        };

        let (first_tx, first_rx) = oneshot::channel();
        let driver = Driver {
            config: self.config.clone(),
            handle: self.handle.clone(),
            classifier: Arc::clone(&self.classifier),
            lifecycle: Arc::clone(&self.lifecycle),
            outbound_rx,
            policy: ReconnectPolicy::new(self.config.reconnect.clone()),
        };

        let task = tokio::spawn(driver.run(first_tx).instrument(self.span.clone()));
        *self.task.lock() = Some(task);

        first_rx.await.unwrap_or(Err(ConnectError::Cancelled))
    }

    /// Request shutdown. See [`ConnectionHandle::close`].
    pub fn close(&self) {
        self.handle.close();
    }

    /// Wait for the background task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ReconnectExhausted`] when the connection
    /// gave up, or [`ConnectionError::Task`] if the task failed.
    pub async fn join(&self) -> Result<(), ConnectionError> {
        let task = self.task.lock().take();
        match task {
            Some(task) => task
                .await
                .map_err(|e| ConnectionError::Task(e.to_string()))?,
            None => Ok(()),
        }
    }
}

// =============================================================================
// Background Driver
// =============================================================================

enum SessionEnd {
    /// `close()` was requested.
    Closed,
    /// Transport failure; reconnect.
    Lost(String),
}

struct Driver {
    config: StreamConfig,
    handle: ConnectionHandle,
    classifier: Arc<dyn FrameClassifier>,
    lifecycle: Arc<dyn ConnectionLifecycle>,
    outbound_rx: mpsc::Receiver<String>,
    policy: ReconnectPolicy,
}

impl Driver {
    async fn run(
        mut self,
        first_tx: oneshot::Sender<Result<(), ConnectError>>,
    ) -> Result<(), ConnectionError> {
        let cancel = self.handle.shared.cancel.clone();
        let feed = self.config.feed;
        let mut first = Some(first_tx);

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            self.handle.set_state(ConnectionState::Connecting);
            match self.establish(&cancel).await {
                Ok(ws) => {
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(()));
                    }
                    self.policy.reset();

                    let end = self.session(ws, &cancel).await;
                    self.teardown();
                    match end {
                        SessionEnd::Closed => break Ok(()),
                        SessionEnd::Lost(reason) => {
                            tracing::warn!(reason = %reason, "Stream session lost");
                            self.discard_queued_frames();
                        }
                    }
                }
                Err(ConnectError::Cancelled) => break Ok(()),
                Err(e) => {
                    tracing::warn!(url = %self.config.url, error = %e, "Stream connect attempt failed");
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(e));
                    }
                }
            }

            if cancel.is_cancelled() {
                break Ok(());
            }

            self.handle.set_state(ConnectionState::Reconnecting);
            let Some(delay) = self.policy.next_delay() else {
                let attempts = self.policy.attempt_count();
                tracing::error!(
                    attempts,
                    url = %self.config.url,
                    "Reconnect attempts exhausted; stream will stay down"
                );
                break Err(ConnectionError::ReconnectExhausted { attempts });
            };

            self.handle
                .shared
                .reconnect_attempts
                .fetch_add(1, Ordering::Relaxed);
            metrics::record_reconnect(feed);
            tracing::info!(
                attempt = self.policy.attempt_count(),
                max_attempts = self.policy.max_attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to market stream"
            );

            let cancelled = tokio::select! {
                () = cancel.cancelled() => true,
                () = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                break Ok(());
            }
        };

        self.handle.set_state(ConnectionState::Disconnected);
        tracing::info!("Stream connection stopped");
        result
    }

    async fn establish(&self, cancel: &CancellationToken) -> Result<WsStream, ConnectError> {
        tracing::info!(url = %self.config.url, "Connecting to market stream");

        let timeout = self.config.connect_timeout;
        let connect =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(self.config.url.as_str()));

        tokio::select! {
            () = cancel.cancelled() => Err(ConnectError::Cancelled),
            result = connect => match result {
                Ok(Ok((ws, _response))) => Ok(ws),
                Ok(Err(e)) => Err(ConnectError::Handshake(e)),
                Err(_) => Err(ConnectError::Timeout(timeout)),
            },
        }
    }

    async fn session(&mut self, ws: WsStream, cancel: &CancellationToken) -> SessionEnd {
        let (mut write, mut read) = ws.split();

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat_cancel = cancel.child_token();
        let heartbeat = HeartbeatManager::new(
            self.config.heartbeat.clone(),
            Arc::clone(&heartbeat_state),
            heartbeat_tx,
            heartbeat_cancel.clone(),
        );
        tokio::spawn(heartbeat.run().in_current_span());

        self.handle.set_state(ConnectionState::Open);
        tracing::info!("Stream session open");
        self.lifecycle.on_open(Arc::new(self.handle.clone()));

        let end = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break SessionEnd::Closed;
                }
                event = heartbeat_rx.recv() => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        heartbeat_state.mark_ping_sent();
                        if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                            break SessionEnd::Lost(e.to_string());
                        }
                    }
                    Some(HeartbeatEvent::Timeout) => {
                        break SessionEnd::Lost("heartbeat timeout".to_string());
                    }
                    None => {
                        tracing::error!("Heartbeat stopped unexpectedly");
                        break SessionEnd::Lost("heartbeat stopped".to_string());
                    }
                },
                frame = self.outbound_rx.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            break SessionEnd::Lost(e.to_string());
                        }
                    }
                    None => break SessionEnd::Closed,
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat_state.record_activity();
                        self.route(text.as_str());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        heartbeat_state.record_activity();
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break SessionEnd::Lost(e.to_string());
                        }
                    }
                    Some(Ok(Message::Pong(_))) => heartbeat_state.record_activity(),
                    Some(Ok(Message::Binary(data))) => {
                        heartbeat_state.record_activity();
                        tracing::debug!(bytes = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Feed sent close frame");
                        break SessionEnd::Lost("closed by peer".to_string());
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                    None => break SessionEnd::Lost("stream ended".to_string()),
                },
            }
        };

        heartbeat_cancel.cancel();
        end
    }

    /// Classify one inbound frame and act on it. Never fails the session.
    fn route(&self, raw: &str) {
        let feed = self.config.feed;
        let registry = self.handle.registry();
        self.handle
            .shared
            .frames_received
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_frame(feed);

        match self.classifier.classify(raw) {
            Classification::Ack { id } => match registry.acknowledge(&id) {
                Some(request) => tracing::debug!(
                    id = %id,
                    channel = %request.key,
                    method = ?request.method,
                    "Control frame acknowledged"
                ),
                None => tracing::debug!(id = %id, "Acknowledgement for unknown correlation id"),
            },
            Classification::Rejected { id, code, message } => {
                let request = id.as_deref().and_then(|id| registry.reject(id));
                tracing::warn!(
                    id = ?id,
                    code,
                    message = %message,
                    channel = ?request.map(|r| r.key.to_string()),
                    "Control frame rejected by feed"
                );
            }
            Classification::Routed(routes) => {
                for route in routes {
                    metrics::record_routed(feed, route.key.kind);
                    if registry.dispatch(&route.key, route.record) == DispatchOutcome::Unknown {
                        metrics::record_unknown_dispatch(feed);
                    }
                }
            }
            Classification::Unroutable(error) => {
                metrics::record_unroutable(feed);
                tracing::warn!(
                    error = %error,
                    raw = %truncate(raw, LOGGED_FRAME_LIMIT),
                    "Dropping unroutable frame"
                );
            }
        }
    }

    /// Drop frames still queued for a lost session. Their registry entries
    /// went with the session; the next open re-seeds them.
    fn discard_queued_frames(&mut self) {
        let mut dropped = 0_usize;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::info!(dropped, "Discarded frames queued for the lost session");
        }
    }

    fn teardown(&self) {
        self.handle.registry().clear();
        metrics::set_active_subscriptions(self.config.feed, 0);
        self.lifecycle.on_close();
    }
}

fn truncate(raw: &str, limit: usize) -> &str {
    raw.char_indices().nth(limit).map_or(raw, |(i, _)| &raw[..i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::{ChannelKind, Exchange, Market};

    struct Noop;

    impl ConnectionLifecycle for Noop {
        fn on_open(&self, _control: Arc<dyn StreamControl>) {}
        fn on_close(&self) {}
    }

    struct NeverRoutes;

    impl FrameClassifier for NeverRoutes {
        fn classify(&self, _raw: &str) -> Classification {
            Classification::Unroutable(crate::application::ports::ProtocolError::UnknownShape)
        }
    }

    fn connection(capacity: usize) -> StreamConnection {
        let mut config = StreamConfig::new(
            FeedId::new(Exchange::Binance, Market::Spot),
            "ws://127.0.0.1:1/ws",
        );
        config.outbound_capacity = capacity;
        StreamConnection::new(config, Arc::new(NeverRoutes), Arc::new(Noop))
    }

    fn driver(connection: &StreamConnection) -> Driver {
        Driver {
            config: connection.config.clone(),
            handle: connection.handle(),
            classifier: Arc::clone(&connection.classifier),
            lifecycle: Arc::clone(&connection.lifecycle),
            outbound_rx: connection.outbound_rx.lock().take().unwrap(),
            policy: ReconnectPolicy::new(connection.config.reconnect.clone()),
        }
    }

    #[test]
    fn lost_session_discards_queued_frames_only() {
        let connection = connection(4);
        let handle = connection.handle();
        let mut driver = driver(&connection);

        handle.send("subscribe-a".to_string()).unwrap();
        handle.send("subscribe-b".to_string()).unwrap();
        driver.discard_queued_frames();

        handle.send("while-reconnecting".to_string()).unwrap();
        assert_eq!(driver.outbound_rx.try_recv().unwrap(), "while-reconnecting");
        assert!(driver.outbound_rx.try_recv().is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("ääää", 2), "ää");
    }

    #[test]
    fn subscribe_before_open_is_queued() {
        let connection = connection(4);
        let handle = connection.handle();

        let id = handle
            .subscribe(
                ChannelKey::market_wide(ChannelKind::MiniTicker),
                vec!["!miniTicker@arr".to_string()],
                Arc::new(|_| {}),
            )
            .unwrap();

        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(handle.stats().subscriptions, 1);
    }

    #[test]
    fn full_queue_is_an_explicit_error_and_rolls_back() {
        let connection = connection(1);
        let handle = connection.handle();
        handle.send("first".to_string()).unwrap();

        let key = ChannelKey::instrument(ChannelKind::BookTicker, "BTCUSDT");
        let result = handle.subscribe(key.clone(), vec!["btcusdt@bookTicker".to_string()], Arc::new(|_| {}));

        assert!(matches!(result, Err(SendError::QueueFull { capacity: 1 })));
        assert!(!handle.registry().contains(&key));
    }

    #[test]
    fn send_after_close_is_rejected() {
        let connection = connection(4);
        let handle = connection.handle();

        connection.close();
        connection.close();

        assert!(handle.is_closed());
        assert!(matches!(handle.send("x".to_string()), Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn open_after_close_is_cancelled() {
        let connection = connection(4);
        connection.close();

        assert!(matches!(connection.open().await, Err(ConnectError::Cancelled)));
        assert!(connection.join().await.is_ok());
        assert_eq!(connection.handle().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn second_open_is_rejected() {
        let connection = connection(4);
        connection.close();
        let _ = connection.open().await;

        assert!(matches!(connection.open().await, Err(ConnectError::AlreadyOpened)));
    }
}
