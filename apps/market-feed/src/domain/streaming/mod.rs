//! Market Data Streaming Types
//!
//! Core domain types for market data: mini tickers, book tickers and
//! depth. These types are wire-format agnostic and represent the canonical
//! internal representation every exchange feed is normalized into.
//!
//! # Identity
//!
//! - [`FeedId`]: one (exchange, market) pair, i.e. one stream connection
//! - [`ChannelKey`]: a channel kind plus an optional instrument id; the
//!   key of the per-connection dispatch table
//! - [`Namespace`]: a snapshot store key prefix, e.g. `Binance:SpotMiniTicker`

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Feed Identity
// =============================================================================

/// Upstream exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// Binance.
    Binance,
}

impl Exchange {
    /// Label used in snapshot keys and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "Binance",
        }
    }
}

/// Market segment within an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    /// Spot market.
    Spot,
    /// Coin-margined futures.
    CoinFutures,
}

impl Market {
    /// Label used in snapshot keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "Spot",
            Self::CoinFutures => "CMF",
        }
    }

    /// Parse from a configuration value (case-insensitive).
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "spot" => Some(Self::Spot),
            "coin_futures" | "cmf" | "coin-futures" => Some(Self::CoinFutures),
            _ => None,
        }
    }
}

/// One (exchange, market) pair. Each feed owns exactly one stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedId {
    /// Upstream exchange.
    pub exchange: Exchange,
    /// Market segment.
    pub market: Market,
}

impl FeedId {
    /// Create a feed id.
    #[must_use]
    pub const fn new(exchange: Exchange, market: Market) -> Self {
        Self { exchange, market }
    }

    /// Snapshot namespace for a channel kind on this feed.
    #[must_use]
    pub const fn channel_namespace(&self, kind: ChannelKind) -> Namespace {
        Namespace::new(*self, Dataset::Channel(kind))
    }

    /// Snapshot namespace for the instrument catalog of this feed.
    #[must_use]
    pub const fn catalog_namespace(&self) -> Namespace {
        Namespace::new(*self, Dataset::Catalog)
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange.as_str(), self.market.as_str())
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No transport and no reconnect pending.
    #[default]
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Session established; frames flow.
    Open,
    /// Close requested by the owner.
    Closing,
    /// Transport lost; waiting out the backoff delay.
    Reconnecting,
}

impl ConnectionState {
    /// Upper-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Reconnecting => "RECONNECTING",
        }
    }

    /// Numeric value reported by the connection state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Open => 2.0,
            Self::Closing => 3.0,
            Self::Reconnecting => 4.0,
        }
    }
}

// =============================================================================
// Channels
// =============================================================================

/// Kind of data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// 24h rolling mini ticker.
    MiniTicker,
    /// Best bid/ask.
    BookTicker,
    /// Order book depth.
    Depth,
}

impl ChannelKind {
    /// All channel kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::MiniTicker, Self::BookTicker, Self::Depth]
    }

    /// Label used in snapshot namespaces and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MiniTicker => "MiniTicker",
            Self::BookTicker => "BookTicker",
            Self::Depth => "Depth",
        }
    }
}

/// Key of the per-connection dispatch table.
///
/// `instrument == None` addresses the market-wide aggregate of a channel
/// (e.g. all mini tickers), or a symbol-less frame awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    /// Channel kind.
    pub kind: ChannelKind,
    /// Upper-case instrument id, if any.
    pub instrument: Option<String>,
}

impl ChannelKey {
    /// Key for one instrument. The id is normalized to upper case.
    #[must_use]
    pub fn instrument(kind: ChannelKind, instrument: &str) -> Self {
        Self {
            kind,
            instrument: Some(instrument.to_uppercase()),
        }
    }

    /// Key for the market-wide aggregate of a channel.
    #[must_use]
    pub const fn market_wide(kind: ChannelKind) -> Self {
        Self {
            kind,
            instrument: None,
        }
    }

    /// Whether this key addresses a market-wide aggregate.
    #[must_use]
    pub const fn is_market_wide(&self) -> bool {
        self.instrument.is_none()
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instrument {
            Some(instrument) => write!(f, "{}:{instrument}", self.kind.as_str()),
            None => write!(f, "{}:*", self.kind.as_str()),
        }
    }
}

// =============================================================================
// Snapshot Namespaces
// =============================================================================

/// What a namespace holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    /// Latest normalized record per instrument.
    Channel(ChannelKind),
    /// Instrument catalog entries.
    Catalog,
}

impl Dataset {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Channel(kind) => kind.as_str(),
            Self::Catalog => "Symbol",
        }
    }
}

/// A snapshot store key prefix: `{Exchange}:{Market}{Dataset}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// Owning feed.
    pub feed: FeedId,
    /// Contents.
    pub dataset: Dataset,
}

impl Namespace {
    /// Create a namespace.
    #[must_use]
    pub const fn new(feed: FeedId, dataset: Dataset) -> Self {
        Self { feed, dataset }
    }

    /// Namespace name, e.g. `Binance:SpotMiniTicker`. Also used as the
    /// downstream broadcast channel name.
    #[must_use]
    pub fn name(&self) -> String {
        format!(
            "{}:{}{}",
            self.feed.exchange.as_str(),
            self.feed.market.as_str(),
            self.dataset.as_str()
        )
    }

    /// Prefix passed to `scan_prefix` (name plus trailing separator).
    #[must_use]
    pub fn scan_prefix(&self) -> String {
        format!("{}:", self.name())
    }

    /// Full key for one instrument.
    #[must_use]
    pub fn key(&self, instrument: &str) -> String {
        format!("{}:{instrument}", self.name())
    }
}

// =============================================================================
// Normalized Records
// =============================================================================

/// 24h rolling window ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiniTicker {
    /// Instrument id.
    pub instrument_id: String,
    /// Exchange event time (epoch milliseconds).
    pub event_time_ms: Option<i64>,
    /// Last traded price.
    pub last_price: Decimal,
    /// Open price of the window.
    pub open_price: Decimal,
    /// High price of the window.
    pub high_price: Decimal,
    /// Low price of the window.
    pub low_price: Decimal,
    /// Base asset volume.
    pub volume: Decimal,
    /// Quote asset volume.
    pub quote_volume: Decimal,
}

/// Best bid/ask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicker {
    /// Instrument id.
    pub instrument_id: String,
    /// Exchange event time (epoch milliseconds); absent on spot.
    pub event_time_ms: Option<i64>,
    /// Order book update id.
    pub update_id: u64,
    /// Best bid price.
    pub best_bid_price: Decimal,
    /// Best bid quantity.
    pub best_bid_qty: Decimal,
    /// Best ask price.
    pub best_ask_price: Decimal,
    /// Best ask quantity.
    pub best_ask_qty: Decimal,
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price.
    pub price: Decimal,
    /// Quantity at price.
    pub quantity: Decimal,
}

/// Order book depth (partial snapshot or diff).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Depth {
    /// Instrument id. Empty until resolved when the frame carried no symbol.
    pub instrument_id: String,
    /// Exchange event time (epoch milliseconds).
    pub event_time_ms: Option<i64>,
    /// First update id covered.
    pub first_update_id: u64,
    /// Last update id covered.
    pub final_update_id: u64,
    /// Bid levels, best first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first.
    pub asks: Vec<PriceLevel>,
}

/// A normalized market data record. Produced only by a frame classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedRecord {
    /// Mini ticker.
    MiniTicker(MiniTicker),
    /// Book ticker.
    BookTicker(BookTicker),
    /// Depth.
    Depth(Depth),
}

impl NormalizedRecord {
    /// Channel kind of this record.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        match self {
            Self::MiniTicker(_) => ChannelKind::MiniTicker,
            Self::BookTicker(_) => ChannelKind::BookTicker,
            Self::Depth(_) => ChannelKind::Depth,
        }
    }

    /// Instrument id (may be empty for an unresolved symbol-less depth).
    #[must_use]
    pub fn instrument_id(&self) -> &str {
        match self {
            Self::MiniTicker(r) => &r.instrument_id,
            Self::BookTicker(r) => &r.instrument_id,
            Self::Depth(r) => &r.instrument_id,
        }
    }

    /// Exchange event time, if the feed supplied one.
    #[must_use]
    pub const fn event_time_ms(&self) -> Option<i64> {
        match self {
            Self::MiniTicker(r) => r.event_time_ms,
            Self::BookTicker(r) => r.event_time_ms,
            Self::Depth(r) => r.event_time_ms,
        }
    }

    /// Rebuild the record with a different instrument id.
    #[must_use]
    pub fn with_instrument(self, instrument_id: &str) -> Self {
        let instrument_id = instrument_id.to_string();
        match self {
            Self::MiniTicker(r) => Self::MiniTicker(MiniTicker { instrument_id, ..r }),
            Self::BookTicker(r) => Self::BookTicker(BookTicker { instrument_id, ..r }),
            Self::Depth(r) => Self::Depth(Depth { instrument_id, ..r }),
        }
    }

    /// Dispatch key derived from the record itself.
    #[must_use]
    pub fn channel_key(&self) -> ChannelKey {
        let id = self.instrument_id();
        if id.is_empty() {
            ChannelKey::market_wide(self.kind())
        } else {
            ChannelKey::instrument(self.kind(), id)
        }
    }
}
