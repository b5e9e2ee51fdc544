//! Binance Market Stream Adapters
//!
//! Everything Binance-specific lives here:
//!
//! - **wire**: raw stream payload types
//! - **classifier**: rule-driven frame classification
//! - **catalog**: REST `exchangeInfo` client
//! - **endpoints**: per-market URLs and the stream parameter grammar

pub mod catalog;
pub mod classifier;
pub mod endpoints;
pub mod wire;

pub use catalog::{BinanceCatalogClient, DEFAULT_CATALOG_TIMEOUT};
pub use classifier::{BINANCE_RULES, BinanceClassifier, ClassifierRules, Decoder, Fingerprint};
pub use endpoints::{BinanceStreams, CatalogShape, FeedProfile};
