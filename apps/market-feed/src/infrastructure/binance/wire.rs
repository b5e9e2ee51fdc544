//! Binance WebSocket Wire Types
//!
//! Deserialization targets for the raw market stream payloads. Field names
//! follow Binance's single-letter schema and are mapped onto the normalized
//! domain records by [`From`] conversions.
//!
//! # Payloads
//!
//! - `24hrMiniTicker`: per-symbol event, or an array of them on
//!   `!miniTicker@arr`
//! - Book ticker: spot omits `e`/`E`; coin futures include them
//! - Partial depth (spot `@depth<levels>`): no event type and no symbol
//! - `depthUpdate`: diff depth and all coin futures depth streams
//!
//! # References
//!
//! - [Spot streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)
//! - [COIN-M streams](https://developers.binance.com/docs/derivatives/coin-margined-futures/websocket-market-streams)

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::streaming::{BookTicker, Depth, MiniTicker, PriceLevel};

/// Event type for 24h mini tickers.
pub const EVENT_MINI_TICKER: &str = "24hrMiniTicker";
/// Event type for book tickers (coin futures only).
pub const EVENT_BOOK_TICKER: &str = "bookTicker";
/// Event type for depth diffs.
pub const EVENT_DEPTH_UPDATE: &str = "depthUpdate";

/// 24h rolling window mini ticker.
///
/// # Wire Format (JSON)
/// ```json
/// {"e":"24hrMiniTicker","E":123456789,"s":"BNBBTC","c":"0.0025","o":"0.0010",
///  "h":"0.0025","l":"0.0010","v":"10000","q":"18"}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct MiniTickerEvent {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: Option<i64>,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Close (last) price.
    #[serde(rename = "c")]
    pub close: Decimal,
    /// Open price.
    #[serde(rename = "o")]
    pub open: Decimal,
    /// High price.
    #[serde(rename = "h")]
    pub high: Decimal,
    /// Low price.
    #[serde(rename = "l")]
    pub low: Decimal,
    /// Base asset volume.
    #[serde(rename = "v")]
    pub volume: Decimal,
    /// Quote asset volume.
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
}

impl From<MiniTickerEvent> for MiniTicker {
    fn from(e: MiniTickerEvent) -> Self {
        Self {
            instrument_id: e.symbol,
            event_time_ms: e.event_time,
            last_price: e.close,
            open_price: e.open,
            high_price: e.high,
            low_price: e.low,
            volume: e.volume,
            quote_volume: e.quote_volume,
        }
    }
}

/// Best bid/ask.
///
/// # Wire Format (JSON)
/// ```json
/// {"u":400900217,"s":"BNBUSDT","b":"25.35","B":"31.21","a":"25.36","A":"40.66"}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct BookTickerEvent {
    /// Event time (ms), coin futures only.
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,
    /// Order book update id.
    #[serde(rename = "u")]
    pub update_id: u64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Best bid price.
    #[serde(rename = "b")]
    pub bid_price: Decimal,
    /// Best bid quantity.
    #[serde(rename = "B")]
    pub bid_qty: Decimal,
    /// Best ask price.
    #[serde(rename = "a")]
    pub ask_price: Decimal,
    /// Best ask quantity.
    #[serde(rename = "A")]
    pub ask_qty: Decimal,
}

impl From<BookTickerEvent> for BookTicker {
    fn from(e: BookTickerEvent) -> Self {
        Self {
            instrument_id: e.symbol,
            event_time_ms: e.event_time,
            update_id: e.update_id,
            best_bid_price: e.bid_price,
            best_bid_qty: e.bid_qty,
            best_ask_price: e.ask_price,
            best_ask_qty: e.ask_qty,
        }
    }
}

fn levels(raw: Vec<(Decimal, Decimal)>) -> Vec<PriceLevel> {
    raw.into_iter()
        .map(|(price, quantity)| PriceLevel { price, quantity })
        .collect()
}

/// Partial book depth snapshot. Carries no symbol.
///
/// # Wire Format (JSON)
/// ```json
/// {"lastUpdateId":160,"bids":[["0.0024","10"]],"asks":[["0.0026","100"]]}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialDepthEvent {
    /// Last update id included.
    pub last_update_id: u64,
    /// Bid levels.
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask levels.
    pub asks: Vec<(Decimal, Decimal)>,
}

impl From<PartialDepthEvent> for Depth {
    fn from(e: PartialDepthEvent) -> Self {
        Self {
            instrument_id: String::new(),
            event_time_ms: None,
            first_update_id: e.last_update_id,
            final_update_id: e.last_update_id,
            bids: levels(e.bids),
            asks: levels(e.asks),
        }
    }
}

/// Depth diff.
///
/// # Wire Format (JSON)
/// ```json
/// {"e":"depthUpdate","E":123456789,"s":"BNBBTC","U":157,"u":160,
///  "b":[["0.0024","10"]],"a":[["0.0026","100"]]}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdateEvent {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: Option<i64>,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// First update id in event.
    #[serde(rename = "U")]
    pub first_update_id: u64,
    /// Final update id in event.
    #[serde(rename = "u")]
    pub final_update_id: u64,
    /// Bid changes.
    #[serde(rename = "b")]
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask changes.
    #[serde(rename = "a")]
    pub asks: Vec<(Decimal, Decimal)>,
}

impl From<DepthUpdateEvent> for Depth {
    fn from(e: DepthUpdateEvent) -> Self {
        Self {
            instrument_id: e.symbol,
            event_time_ms: e.event_time,
            first_update_id: e.first_update_id,
            final_update_id: e.final_update_id,
            bids: levels(e.bids),
            asks: levels(e.asks),
        }
    }
}

/// Error body of a rejected control frame.
///
/// # Wire Format (JSON)
/// ```json
/// {"error":{"code":2,"msg":"Invalid request: unknown variant"},"id":"..."}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mini_ticker_maps_short_fields() {
        let raw = r#"{"e":"24hrMiniTicker","E":123456789,"s":"BNBBTC","c":"0.0025","o":"0.0010","h":"0.0025","l":"0.0010","v":"10000","q":"18"}"#;
        let event: MiniTickerEvent = serde_json::from_str(raw).unwrap();
        let ticker = MiniTicker::from(event);

        assert_eq!(ticker.instrument_id, "BNBBTC");
        assert_eq!(ticker.event_time_ms, Some(123_456_789));
        assert_eq!(ticker.last_price, "0.0025".parse::<Decimal>().unwrap());
        assert_eq!(ticker.quote_volume, Decimal::from(18));
    }

    #[test]
    fn book_ticker_distinguishes_case_of_field_names() {
        let raw = r#"{"u":400900217,"s":"BNBUSDT","b":"25.35","B":"31.21","a":"25.36","A":"40.66"}"#;
        let ticker = BookTicker::from(serde_json::from_str::<BookTickerEvent>(raw).unwrap());

        assert_eq!(ticker.update_id, 400_900_217);
        assert_eq!(ticker.best_bid_price, "25.35".parse::<Decimal>().unwrap());
        assert_eq!(ticker.best_bid_qty, "31.21".parse::<Decimal>().unwrap());
        assert_eq!(ticker.best_ask_qty, "40.66".parse::<Decimal>().unwrap());
        assert_eq!(ticker.event_time_ms, None);
    }

    #[test]
    fn partial_depth_uses_last_update_id_for_both_bounds() {
        let raw = r#"{"lastUpdateId":160,"bids":[["0.0024","10"]],"asks":[["0.0026","100"]]}"#;
        let depth = Depth::from(serde_json::from_str::<PartialDepthEvent>(raw).unwrap());

        assert!(depth.instrument_id.is_empty());
        assert_eq!(depth.first_update_id, 160);
        assert_eq!(depth.final_update_id, 160);
        assert_eq!(depth.asks[0].quantity, Decimal::from(100));
    }
}
