//! Instrument Catalog Types
//!
//! Exchange-agnostic description of a tradable instrument, as resolved by the
//! bootstrap resolver and cached under the catalog snapshot namespace.

use serde::{Deserialize, Serialize};

/// Trading status reported by the exchange.
///
/// Spot and futures report different vocabularies; both are folded into
/// this enum. Anything unrecognized is kept verbatim in [`Self::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingStatus {
    /// Open for trading.
    Trading,
    /// Futures contract listed but not yet trading.
    PendingTrading,
    /// Trading halted.
    Halt,
    /// Trading break.
    Break,
    /// Closed for the day.
    EndOfDay,
    /// Futures contract in delivery.
    Delivering,
    /// Futures contract settled.
    Delivered,
    /// Unrecognized status.
    Other(String),
}

impl TradingStatus {
    /// Parse an exchange status string.
    #[must_use]
    pub fn from_exchange(s: &str) -> Self {
        match s {
            "TRADING" => Self::Trading,
            "PENDING_TRADING" => Self::PendingTrading,
            "HALT" => Self::Halt,
            "BREAK" => Self::Break,
            "END_OF_DAY" => Self::EndOfDay,
            "PRE_DELIVERING" | "DELIVERING" => Self::Delivering,
            "DELIVERED" => Self::Delivered,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One instrument of the authoritative catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentCatalogEntry {
    /// Exchange symbol (upper case).
    pub symbol: String,
    /// Trading status.
    pub trading_status: TradingStatus,
    /// Base asset.
    pub base_asset: String,
    /// Quote asset.
    pub quote_asset: String,
    /// Price precision (decimal places).
    pub price_precision: u32,
    /// Quantity precision (decimal places).
    pub quantity_precision: u32,
    /// Supported order types.
    pub order_types: Vec<String>,
    /// Futures contract type (e.g. `PERPETUAL`), absent on spot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_type: Option<String>,
}

impl InstrumentCatalogEntry {
    /// Whether the instrument is open for trading and worth subscribing to.
    #[must_use]
    pub fn is_tradable(&self) -> bool {
        self.trading_status == TradingStatus::Trading
    }
}
