//! Configuration Module
//!
//! Environment-driven configuration for the market feed service.

mod settings;

pub use settings::{
    CatalogSettings, ConfigError, MarketSettings, ServerSettings, ServiceConfig, StreamSettings,
    SubscriptionSettings,
};
