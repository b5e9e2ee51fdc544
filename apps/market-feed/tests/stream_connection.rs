//! Stream Connection Transport Tests
//!
//! Exercises the connection lifecycle against loopback WebSocket servers:
//! queued frame flushing, ping replies, reconnect after a dropped session
//! and giving up once reconnect attempts are exhausted.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use market_feed::application::ports::{ConnectionLifecycle, StreamControl};
use market_feed::infrastructure::binance::BinanceClassifier;
use market_feed::infrastructure::stream::{
    ConnectError, ConnectionError, HeartbeatConfig, ReconnectConfig, StreamConfig,
    StreamConnection,
};
use market_feed::{ConnectionState, Exchange, FeedId, Market};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct CountingLifecycle {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl ConnectionLifecycle for CountingLifecycle {
    fn on_open(&self, control: Arc<dyn StreamControl>) {
        assert_eq!(control.state(), ConnectionState::Open);
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn feed() -> FeedId {
    FeedId::new(Exchange::Binance, Market::Spot)
}

fn connection(url: String, lifecycle: Arc<CountingLifecycle>) -> StreamConnection {
    let mut config = StreamConfig::new(feed(), url);
    config.reconnect = ReconnectConfig::linear(Duration::from_millis(10), 5);
    config.connect_timeout = Duration::from_secs(2);
    StreamConnection::new(config, Arc::new(BinanceClassifier::new()), lifecycle)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn frames_queued_before_open_are_flushed_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut received = Vec::new();
        while received.len() < 2 {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => received.push(text.as_str().to_string()),
                Some(Ok(_)) => {}
                _ => break,
            }
        }
        received
    });

    let lifecycle = Arc::new(CountingLifecycle::default());
    let connection = connection(format!("ws://{addr}"), Arc::clone(&lifecycle));
    let handle = connection.handle();
    handle.send("first".to_string()).unwrap();
    handle.send("second".to_string()).unwrap();

    connection.open().await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, vec!["first", "second"]);
    assert_eq!(lifecycle.opens.load(Ordering::SeqCst), 1);

    connection.close();
    connection.join().await.unwrap();
}

#[tokio::test]
async fn server_ping_is_answered_with_pong() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Ping(b"keepalive".to_vec().into()))
            .await
            .unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Pong(payload))) => return payload.to_vec(),
                Some(Ok(_)) => {}
                other => panic!("socket ended before pong: {other:?}"),
            }
        }
    });

    let connection = connection(
        format!("ws://{addr}"),
        Arc::new(CountingLifecycle::default()),
    );
    connection.open().await.unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, b"keepalive");

    connection.close();
    connection.join().await.unwrap();
}

#[tokio::test]
async fn dropped_session_reconnects_and_reopens() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // First session: drop right after the handshake
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        // Second session: stay open until the client leaves
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let lifecycle = Arc::new(CountingLifecycle::default());
    let connection = connection(format!("ws://{addr}"), Arc::clone(&lifecycle));
    let handle = connection.handle();
    connection.open().await.unwrap();

    wait_for(|| lifecycle.opens.load(Ordering::SeqCst) == 2).await;
    assert!(lifecycle.closes.load(Ordering::SeqCst) >= 1);
    assert_eq!(handle.stats().reconnect_attempts, 1);
    wait_for(|| handle.state() == ConnectionState::Open).await;

    connection.close();
    connection.join().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(lifecycle.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stopped_heartbeat_is_treated_as_a_lost_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    // A zero ping interval makes the heartbeat stop as soon as it starts
    let lifecycle = Arc::new(CountingLifecycle::default());
    let mut config = StreamConfig::new(feed(), format!("ws://{addr}"));
    config.reconnect = ReconnectConfig::linear(Duration::from_millis(10), 3);
    config.heartbeat = HeartbeatConfig::new(Duration::ZERO, Duration::from_secs(30));
    let connection = StreamConnection::new(
        config,
        Arc::new(BinanceClassifier::new()),
        Arc::clone(&lifecycle) as Arc<dyn ConnectionLifecycle>,
    );
    let handle = connection.handle();
    connection.open().await.unwrap();

    wait_for(|| lifecycle.opens.load(Ordering::SeqCst) >= 2).await;
    assert!(handle.stats().reconnect_attempts >= 1);
    assert!(lifecycle.closes.load(Ordering::SeqCst) >= 1);
    assert!(!handle.is_closed());

    connection.close();
    connection.join().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn exhausted_reconnects_stop_the_connection() {
    // Bind then drop to get a port that refuses connections
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let lifecycle = Arc::new(CountingLifecycle::default());
    let mut config = StreamConfig::new(feed(), format!("ws://{addr}"));
    config.reconnect = ReconnectConfig::linear(Duration::from_millis(5), 2);
    let connection = StreamConnection::new(
        config,
        Arc::new(BinanceClassifier::new()),
        Arc::clone(&lifecycle) as Arc<dyn ConnectionLifecycle>,
    );
    let handle = connection.handle();

    let first = connection.open().await;
    assert!(matches!(first, Err(ConnectError::Handshake(_))));

    let outcome = tokio::time::timeout(Duration::from_secs(5), connection.join())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Err(ConnectionError::ReconnectExhausted { attempts: 2 })
    ));
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(handle.stats().reconnect_attempts, 2);
    assert_eq!(lifecycle.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn close_is_idempotent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let connection = connection(
        format!("ws://{addr}"),
        Arc::new(CountingLifecycle::default()),
    );
    let handle = connection.handle();
    connection.open().await.unwrap();

    connection.close();
    connection.close();
    handle.close();
    connection.join().await.unwrap();

    assert!(handle.is_closed());
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(connection.join().await.ok(), Some(()));
}
