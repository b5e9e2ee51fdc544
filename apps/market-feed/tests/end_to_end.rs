//! End-to-End Pipeline Tests
//!
//! Runs one spot feed against a mocked REST catalog and a loopback
//! WebSocket exchange: catalog bootstrap, subscription seeding,
//! acknowledgement, classification, snapshot writes and fan-out.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use market_feed::application::ports::{SharedSnapshotStore, SnapshotStore, StreamControl};
use market_feed::application::services::RetryPolicy;
use market_feed::infrastructure::binance::{
    BinanceCatalogClient, BinanceClassifier, BinanceStreams, FeedProfile,
};
use market_feed::infrastructure::snapshot::MemorySnapshotStore;
use market_feed::{
    BootstrapResolver, BroadcastHub, ChannelKind, ConnectionState, FanoutConfig, FanoutScheduler,
    Market, MarketFeedService, MarketFeedSettings, StreamConfig, StreamConnection,
};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Fixtures
// =============================================================================

async fn mock_catalog() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/exchangeInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "symbols": [
                {"symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT"},
                {"symbol": "ETHUSDT", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "USDT"},
                {"symbol": "OLDUSDT", "status": "BREAK", "baseAsset": "OLD", "quoteAsset": "USDT"}
            ]
        })))
        .mount(&server)
        .await;
    server
}

fn mini_ticker(symbol: &str, close: &str) -> Value {
    json!({
        "e": "24hrMiniTicker", "E": 1_700_000_000_000_i64, "s": symbol,
        "c": close, "o": "1", "h": close, "l": "1", "v": "10", "q": "100"
    })
}

/// Loopback exchange: acknowledges every control frame, reports the
/// frames it received, and after `acks` acknowledgements pushes `frames`.
async fn fake_exchange(
    acks: usize,
    frames: Vec<Value>,
) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut acked = 0;

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let control: Value = serde_json::from_str(text.as_str()).unwrap();
            let ack = json!({"result": null, "id": control["id"]});
            control_tx.send(control).unwrap();
            ws.send(Message::Text(ack.to_string().into())).await.unwrap();

            acked += 1;
            if acked == acks {
                for frame in &frames {
                    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
                }
            }
        }
    });

    (format!("ws://{addr}/ws"), control_rx)
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
async fn spot_feed_caches_routed_records_and_fans_them_out() {
    let catalog = mock_catalog().await;
    let frames = vec![
        json!([
            mini_ticker("BTCUSDT", "42000.5"),
            mini_ticker("ETHUSDT", "2500.25"),
            mini_ticker("ETHBTC", "0.06")
        ]),
        json!({"u": 400_900_217, "s": "BTCUSDT", "b": "42000.1", "B": "31.2", "a": "42000.2", "A": "40.6"}),
        json!({"unexpected": true}),
    ];
    let (ws_url, mut controls) = fake_exchange(2, frames).await;

    let profile = FeedProfile::for_market(Market::Spot)
        .with_ws_url(ws_url.clone())
        .with_rest_base_url(catalog.uri());
    let feed = profile.feed;

    let store = Arc::new(MemorySnapshotStore::new());
    let shared: SharedSnapshotStore = store.clone();

    let mut settings = MarketFeedSettings::new(feed);
    settings.quote_filter = Some("USDT".to_string());
    settings.book_ticker_symbols = vec!["btcusdt".to_string(), "OLDUSDT".to_string()];

    let client = BinanceCatalogClient::new(&profile, Duration::from_secs(5)).unwrap();
    let resolver = BootstrapResolver::new(feed, Arc::new(client))
        .with_policy(RetryPolicy::unbounded(Duration::from_millis(10)));
    let service = Arc::new(MarketFeedService::new(
        settings.clone(),
        resolver,
        Arc::clone(&shared),
        Arc::new(BinanceStreams::default()),
        CancellationToken::new(),
    ));

    let connection = StreamConnection::new(
        StreamConfig::new(feed, ws_url),
        Arc::new(BinanceClassifier::new()),
        service,
    );
    connection.open().await.unwrap();
    let handle = connection.handle();
    assert_eq!(handle.state(), ConnectionState::Open);

    // Market-wide mini ticker first, then the tradable book ticker only
    let first = controls.recv().await.unwrap();
    assert_eq!(first["method"], "SUBSCRIBE");
    assert_eq!(first["params"], json!(["!miniTicker@arr"]));
    let second = controls.recv().await.unwrap();
    assert_eq!(second["params"], json!(["btcusdt@bookTicker"]));

    let mini = feed.channel_namespace(ChannelKind::MiniTicker);
    let book = feed.channel_namespace(ChannelKind::BookTicker);
    wait_for(|| {
        store.scan_prefix(&mini.scan_prefix()).len() == 2
            && store.scan_prefix(&book.scan_prefix()).len() == 1
    })
    .await;
    wait_for(|| handle.registry().stats().pending == 0).await;
    wait_for(|| handle.stats().frames_received >= 5).await;

    assert!(store.get(&mini.key("ETHBTC")).is_none());
    assert_eq!(handle.registry().len(), 2);

    // Fan-out publishes one batch per configured namespace, empty ones included
    let hub = Arc::new(BroadcastHub::with_defaults());
    let mut rx = hub.batches_rx();
    let scheduler = FanoutScheduler::new(
        FanoutConfig::new(settings.channel_namespaces()),
        shared,
        hub,
    );
    let batches = scheduler.tick();

    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].channel, "Binance:SpotMiniTicker");
    assert_eq!(batches[0].payload.len(), 2);
    assert_eq!(batches[1].channel, "Binance:SpotBookTicker");
    assert_eq!(batches[1].payload.len(), 1);
    assert_eq!(batches[2].channel, "Binance:SpotDepth");
    assert!(batches[2].payload.is_empty());
    assert_eq!(rx.recv().await.unwrap().channel, "Binance:SpotMiniTicker");

    connection.close();
    connection.join().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(handle.registry().is_empty());
}
