//! Binance Endpoints and Stream Names
//!
//! Per-market behavior is supplied as data: a [`FeedProfile`] carries the
//! stream URL, REST catalog endpoint and catalog shape of one market, and
//! [`BinanceStreams`] renders channel keys into stream parameters.
//!
//! # Stream parameter grammar
//!
//! - `!miniTicker@arr`: all mini tickers of the market
//! - `{symbol}@miniTicker`, `{symbol}@bookTicker`
//! - `{symbol}@depth{levels}@{interval}`: partial depth
//!
//! Symbols are lower case on the wire.

use crate::application::ports::StreamNaming;
use crate::domain::streaming::{ChannelKey, ChannelKind, Exchange, FeedId, Market};

/// Spot market stream URL.
pub const SPOT_WS_URL: &str = "wss://stream.binance.com:9443/ws";
/// Spot REST base URL.
pub const SPOT_REST_URL: &str = "https://api.binance.com";
/// Coin-margined futures stream URL.
pub const COIN_FUTURES_WS_URL: &str = "wss://dstream.binance.com/ws";
/// Coin-margined futures REST base URL.
pub const COIN_FUTURES_REST_URL: &str = "https://dapi.binance.com";

/// Shape of an `exchangeInfo` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogShape {
    /// Spot: `status`, `quoteAssetPrecision`, `baseAssetPrecision`.
    Spot,
    /// Coin futures: `contractStatus`, `pricePrecision`, `quantityPrecision`.
    CoinFutures,
}

/// Everything market-specific about one Binance feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedProfile {
    /// Feed identity.
    pub feed: FeedId,
    /// Market stream URL.
    pub ws_url: String,
    /// REST base URL.
    pub rest_base_url: String,
    /// `exchangeInfo` path and query.
    pub catalog_path: &'static str,
    /// `exchangeInfo` shape.
    pub catalog_shape: CatalogShape,
}

impl FeedProfile {
    /// Production profile for a market.
    #[must_use]
    pub fn for_market(market: Market) -> Self {
        match market {
            Market::Spot => Self {
                feed: FeedId::new(Exchange::Binance, Market::Spot),
                ws_url: SPOT_WS_URL.to_string(),
                rest_base_url: SPOT_REST_URL.to_string(),
                catalog_path: "/api/v3/exchangeInfo?showPermissionSets=false",
                catalog_shape: CatalogShape::Spot,
            },
            Market::CoinFutures => Self {
                feed: FeedId::new(Exchange::Binance, Market::CoinFutures),
                ws_url: COIN_FUTURES_WS_URL.to_string(),
                rest_base_url: COIN_FUTURES_REST_URL.to_string(),
                catalog_path: "/dapi/v1/exchangeInfo",
                catalog_shape: CatalogShape::CoinFutures,
            },
        }
    }

    /// Override the stream URL.
    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Override the REST base URL.
    #[must_use]
    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = url.into();
        self
    }

    /// Full `exchangeInfo` URL.
    #[must_use]
    pub fn catalog_url(&self) -> String {
        format!(
            "{}{}",
            self.rest_base_url.trim_end_matches('/'),
            self.catalog_path
        )
    }
}

/// Stream parameter renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinanceStreams {
    /// Partial depth levels (5, 10 or 20).
    pub depth_levels: u8,
    /// Partial depth update interval, e.g. `100ms`.
    pub depth_interval: String,
}

impl Default for BinanceStreams {
    fn default() -> Self {
        Self {
            depth_levels: 10,
            depth_interval: "100ms".to_string(),
        }
    }
}

impl StreamNaming for BinanceStreams {
    fn stream_param(&self, key: &ChannelKey) -> String {
        let Some(symbol) = key.instrument.as_deref().map(str::to_lowercase) else {
            return match key.kind {
                ChannelKind::MiniTicker => "!miniTicker@arr".to_string(),
                ChannelKind::BookTicker => "!bookTicker".to_string(),
                ChannelKind::Depth => "!depth".to_string(),
            };
        };

        match key.kind {
            ChannelKind::MiniTicker => format!("{symbol}@miniTicker"),
            ChannelKind::BookTicker => format!("{symbol}@bookTicker"),
            ChannelKind::Depth => format!(
                "{symbol}@depth{}@{}",
                self.depth_levels, self.depth_interval
            ),
        }
    }
}
