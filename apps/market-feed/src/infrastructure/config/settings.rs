//! Service Configuration Settings
//!
//! Configuration types for the market feed, loaded from environment
//! variables. Every value has a default; unparseable numbers fall back to
//! the default.

use std::time::Duration;

use crate::application::services::{
    DepthSeed, FanoutConfig, MarketFeedSettings, RetryPolicy, market_feed::DEFAULT_SNAPSHOT_TTL,
};
use crate::domain::streaming::{Exchange, FeedId, Market};
use crate::infrastructure::binance::{BinanceStreams, FeedProfile};
use crate::infrastructure::broadcast::BroadcastConfig;
use crate::infrastructure::stream::{HeartbeatConfig, ReconnectConfig, StreamConfig};

/// Per-market endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSettings {
    /// Market.
    pub market: Market,
    /// Stream URL.
    pub ws_url: String,
    /// REST base URL for the catalog.
    pub rest_url: String,
}

impl MarketSettings {
    /// Production endpoints for `market`.
    #[must_use]
    pub fn for_market(market: Market) -> Self {
        let profile = FeedProfile::for_market(market);
        Self {
            market,
            ws_url: profile.ws_url,
            rest_url: profile.rest_base_url,
        }
    }

    /// Feed identity.
    #[must_use]
    pub const fn feed(&self) -> FeedId {
        FeedId::new(Exchange::Binance, self.market)
    }

    /// Endpoint profile with the configured URLs.
    #[must_use]
    pub fn profile(&self) -> FeedProfile {
        FeedProfile::for_market(self.market)
            .with_ws_url(self.ws_url.clone())
            .with_rest_base_url(self.rest_url.clone())
    }
}

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Base reconnect delay; the k-th attempt waits `k` times this.
    pub reconnect_delay: Duration,
    /// Consecutive reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after a ping before the session is considered dead.
    pub heartbeat_timeout: Duration,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Outbound frame queue capacity.
    pub outbound_queue_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(3_000),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            outbound_queue_capacity: 256,
        }
    }
}

impl StreamSettings {
    /// Connection configuration for one market.
    #[must_use]
    pub fn stream_config(&self, market: &MarketSettings) -> StreamConfig {
        StreamConfig {
            feed: market.feed(),
            url: market.ws_url.clone(),
            reconnect: ReconnectConfig::linear(self.reconnect_delay, self.max_reconnect_attempts),
            heartbeat: HeartbeatConfig::new(self.heartbeat_interval, self.heartbeat_timeout),
            connect_timeout: self.connect_timeout,
            outbound_capacity: self.outbound_queue_capacity,
        }
    }
}

/// Catalog fetch settings.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    /// Delay between failed attempts.
    pub retry_delay: Duration,
    /// HTTP request timeout.
    pub timeout: Duration,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(3_000),
            timeout: Duration::from_secs(10),
        }
    }
}

impl CatalogSettings {
    /// Retry policy for the bootstrap resolver.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(self.retry_delay)
    }
}

/// Which channels each feed subscribes to.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    /// Quote asset spot mini tickers must contain to be cached.
    pub spot_quote_filter: Option<String>,
    /// Instruments for per-instrument book tickers.
    pub book_ticker_symbols: Vec<String>,
    /// Instruments for partial depth.
    pub depth_symbols: Vec<String>,
    /// Partial depth levels.
    pub depth_levels: u8,
    /// Partial depth update interval.
    pub depth_interval: String,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            spot_quote_filter: Some("USDT".to_string()),
            book_ticker_symbols: Vec::new(),
            depth_symbols: Vec::new(),
            depth_levels: 10,
            depth_interval: "100ms".to_string(),
        }
    }
}

impl SubscriptionSettings {
    /// Stream parameter renderer.
    #[must_use]
    pub fn stream_naming(&self) -> BinanceStreams {
        BinanceStreams {
            depth_levels: self.depth_levels,
            depth_interval: self.depth_interval.clone(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Downstream WebSocket gateway port.
    pub gateway_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            gateway_port: 4000,
            health_port: 8082,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Markets to run, one connection each.
    pub markets: Vec<MarketSettings>,
    /// TTL applied to every snapshot.
    pub snapshot_ttl: Duration,
    /// Fan-out tick period.
    pub fanout_interval: Duration,
    /// Catalog settings.
    pub catalog: CatalogSettings,
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Subscription settings.
    pub subscriptions: SubscriptionSettings,
    /// Server ports.
    pub server: ServerSettings,
    /// Broadcast channel capacity.
    pub broadcast_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            markets: vec![
                MarketSettings::for_market(Market::Spot),
                MarketSettings::for_market(Market::CoinFutures),
            ],
            snapshot_ttl: DEFAULT_SNAPSHOT_TTL,
            fanout_interval: FanoutConfig::DEFAULT_INTERVAL,
            catalog: CatalogSettings::default(),
            stream: StreamSettings::default(),
            subscriptions: SubscriptionSettings::default(),
            server: ServerSettings::default(),
            broadcast_capacity: BroadcastConfig::default().capacity,
        }
    }
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `MARKET_FEED_MARKETS` names an unknown market
    /// or no market at all.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        let defaults = Self::default();

        let markets = match env.get("MARKET_FEED_MARKETS") {
            Some(raw) => parse_markets(&raw)?,
            None => vec![Market::Spot, Market::CoinFutures],
        };
        let markets = markets
            .into_iter()
            .map(|market| {
                let prefix = match market {
                    Market::Spot => "MARKET_FEED_SPOT",
                    Market::CoinFutures => "MARKET_FEED_COIN_FUTURES",
                };
                let base = MarketSettings::for_market(market);
                MarketSettings {
                    market,
                    ws_url: env.string(&format!("{prefix}_WS_URL"), base.ws_url),
                    rest_url: env.string(&format!("{prefix}_REST_URL"), base.rest_url),
                }
            })
            .collect();

        let stream_defaults = defaults.stream;
        let stream = StreamSettings {
            reconnect_delay: env.millis(
                "MARKET_FEED_RECONNECT_DELAY_MS",
                stream_defaults.reconnect_delay,
            ),
            max_reconnect_attempts: env.parse(
                "MARKET_FEED_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            ),
            heartbeat_interval: env.secs(
                "MARKET_FEED_HEARTBEAT_INTERVAL_SECS",
                stream_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.secs(
                "MARKET_FEED_HEARTBEAT_TIMEOUT_SECS",
                stream_defaults.heartbeat_timeout,
            ),
            connect_timeout: env.secs(
                "MARKET_FEED_CONNECT_TIMEOUT_SECS",
                stream_defaults.connect_timeout,
            ),
            outbound_queue_capacity: env.positive(
                "MARKET_FEED_OUTBOUND_QUEUE_CAPACITY",
                stream_defaults.outbound_queue_capacity,
            ),
        };

        let catalog = CatalogSettings {
            retry_delay: env.millis(
                "MARKET_FEED_CATALOG_RETRY_DELAY_MS",
                defaults.catalog.retry_delay,
            ),
            timeout: env.secs("MARKET_FEED_CATALOG_TIMEOUT_SECS", defaults.catalog.timeout),
        };

        let sub_defaults = defaults.subscriptions;
        let spot_quote_filter = env
            .get("MARKET_FEED_SPOT_QUOTE_FILTER")
            .map_or(sub_defaults.spot_quote_filter, |raw| {
                let trimmed = raw.trim().to_uppercase();
                (!trimmed.is_empty()).then_some(trimmed)
            });
        let subscriptions = SubscriptionSettings {
            spot_quote_filter,
            book_ticker_symbols: env.symbols("MARKET_FEED_BOOK_TICKER_SYMBOLS"),
            depth_symbols: env.symbols("MARKET_FEED_DEPTH_SYMBOLS"),
            depth_levels: env.parse("MARKET_FEED_DEPTH_LEVELS", sub_defaults.depth_levels),
            depth_interval: env.string("MARKET_FEED_DEPTH_INTERVAL", sub_defaults.depth_interval),
        };

        let server = ServerSettings {
            gateway_port: env.parse("MARKET_FEED_GATEWAY_PORT", defaults.server.gateway_port),
            health_port: env.parse("MARKET_FEED_HEALTH_PORT", defaults.server.health_port),
        };

        Ok(Self {
            markets,
            snapshot_ttl: env.secs("MARKET_FEED_SNAPSHOT_TTL_SECS", defaults.snapshot_ttl),
            fanout_interval: env.secs("MARKET_FEED_FANOUT_INTERVAL_SECS", defaults.fanout_interval),
            catalog,
            stream,
            subscriptions,
            server,
            broadcast_capacity: env.positive("MARKET_FEED_BROADCAST_CAPACITY", defaults.broadcast_capacity),
        })
    }

    /// Service settings for one market.
    #[must_use]
    pub fn feed_settings(&self, market: &MarketSettings) -> MarketFeedSettings {
        let quote_filter = match market.market {
            Market::Spot => self.subscriptions.spot_quote_filter.clone(),
            Market::CoinFutures => None,
        };
        MarketFeedSettings {
            feed: market.feed(),
            snapshot_ttl: self.snapshot_ttl,
            quote_filter,
            book_ticker_symbols: self.subscriptions.book_ticker_symbols.clone(),
            depth: DepthSeed {
                symbols: self.subscriptions.depth_symbols.clone(),
            },
        }
    }

    /// Broadcast hub configuration.
    #[must_use]
    pub const fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            capacity: self.broadcast_capacity,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an unusable value.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_markets(raw: &str) -> Result<Vec<Market>, ConfigError> {
    let mut markets = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let market =
            Market::from_str_case_insensitive(name).ok_or_else(|| ConfigError::InvalidValue {
                key: "MARKET_FEED_MARKETS".to_string(),
                value: name.to_string(),
            })?;
        if !markets.contains(&market) {
            markets.push(market);
        }
    }

    if markets.is_empty() {
        return Err(ConfigError::EmptyValue("MARKET_FEED_MARKETS".to_string()));
    }
    Ok(markets)
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string(&self, key: &str, default: String) -> String {
        self.get(key).filter(|v| !v.trim().is_empty()).unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Zero is treated like an unparsable value.
    fn positive<T>(&self, key: &str, default: T) -> T
    where
        T: std::str::FromStr + PartialOrd + Default,
    {
        self.get(key)
            .and_then(|v| v.trim().parse::<T>().ok())
            .filter(|n| *n > T::default())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.positive(key, default.as_secs()))
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.positive(key, default))
    }

    fn symbols(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config(&[]).unwrap();

        assert_eq!(config.markets.len(), 2);
        assert_eq!(config.markets[0].ws_url, "wss://stream.binance.com:9443/ws");
        assert_eq!(config.markets[1].ws_url, "wss://dstream.binance.com/ws");
        assert_eq!(config.snapshot_ttl, Duration::from_secs(172_800));
        assert_eq!(config.fanout_interval, Duration::from_secs(5));
        assert_eq!(config.stream.max_reconnect_attempts, 5);
        assert_eq!(config.stream.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.subscriptions.spot_quote_filter.as_deref(), Some("USDT"));
        assert_eq!(config.server.gateway_port, 4000);
        assert_eq!(config.server.health_port, 8082);
    }

    #[test]
    fn overrides_and_invalid_numbers() {
        let config = config(&[
            ("MARKET_FEED_MARKETS", "spot"),
            ("MARKET_FEED_SPOT_WS_URL", "ws://127.0.0.1:9000/ws"),
            ("MARKET_FEED_MAX_RECONNECT_ATTEMPTS", "0"),
            ("MARKET_FEED_FANOUT_INTERVAL_SECS", "not-a-number"),
            ("MARKET_FEED_BOOK_TICKER_SYMBOLS", "btcusdt, ethusdt,,"),
            ("MARKET_FEED_SPOT_QUOTE_FILTER", ""),
        ])
        .unwrap();

        assert_eq!(config.markets.len(), 1);
        assert_eq!(config.markets[0].ws_url, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.stream.max_reconnect_attempts, 0);
        assert_eq!(config.fanout_interval, Duration::from_secs(5));
        assert_eq!(config.subscriptions.book_ticker_symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.subscriptions.spot_quote_filter, None);
    }

    #[test]
    fn zero_intervals_and_capacities_fall_back_to_defaults() {
        let config = config(&[
            ("MARKET_FEED_HEARTBEAT_INTERVAL_SECS", "0"),
            ("MARKET_FEED_FANOUT_INTERVAL_SECS", "0"),
            ("MARKET_FEED_RECONNECT_DELAY_MS", "0"),
            ("MARKET_FEED_CATALOG_RETRY_DELAY_MS", "-5"),
            ("MARKET_FEED_OUTBOUND_QUEUE_CAPACITY", "0"),
            ("MARKET_FEED_BROADCAST_CAPACITY", "0"),
            ("MARKET_FEED_HEARTBEAT_TIMEOUT_SECS", "45"),
        ])
        .unwrap();
        let defaults = ServiceConfig::default();

        assert_eq!(config.stream.heartbeat_interval, defaults.stream.heartbeat_interval);
        assert_eq!(config.fanout_interval, defaults.fanout_interval);
        assert_eq!(config.stream.reconnect_delay, defaults.stream.reconnect_delay);
        assert_eq!(config.catalog.retry_delay, defaults.catalog.retry_delay);
        assert_eq!(config.stream.outbound_queue_capacity, 256);
        assert_eq!(config.broadcast_capacity, defaults.broadcast_capacity);
        assert_eq!(config.stream.heartbeat_timeout, Duration::from_secs(45));
    }

    #[test]
    fn unknown_market_is_rejected() {
        let result = config(&[("MARKET_FEED_MARKETS", "spot,usdm")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { value, .. }) if value == "usdm"));
    }

    #[test]
    fn empty_market_list_is_rejected() {
        assert!(matches!(
            config(&[("MARKET_FEED_MARKETS", " , ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn quote_filter_applies_to_spot_only() {
        let config = config(&[]).unwrap();

        let spot = config.feed_settings(&config.markets[0]);
        let futures = config.feed_settings(&config.markets[1]);

        assert_eq!(spot.quote_filter.as_deref(), Some("USDT"));
        assert_eq!(futures.quote_filter, None);
        assert_eq!(futures.feed.to_string(), "Binance:CMF");
    }

    #[test]
    fn stream_config_uses_linear_backoff() {
        let config = config(&[("MARKET_FEED_RECONNECT_DELAY_MS", "250")]).unwrap();
        let stream = config.stream.stream_config(&config.markets[0]);

        assert_eq!(stream.reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(stream.reconnect.max_attempts, 5);
        assert_eq!(stream.outbound_capacity, 256);
    }
}
