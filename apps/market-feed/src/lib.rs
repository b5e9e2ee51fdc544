#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::items_after_statements
    )
)]

//! Market Feed - Exchange Market Data Cache and Fan-out
//!
//! Maintains one WebSocket connection per (exchange, market) pair, turns
//! every inbound frame into normalized ticker, book-ticker and depth
//! records, caches the latest snapshot per instrument with a TTL, and
//! periodically broadcasts the cache to downstream clients.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Feed identities, channel keys, normalized records
//!   - `subscription`: Subscription registry and control frames
//!   - `catalog`: Instrument catalog entries
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Snapshot store, catalog source, classifier, stream control
//!   - `services`: Bootstrap resolver, market feed service, fan-out scheduler
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: Resilient WebSocket connection (heartbeat, reconnect)
//!   - `binance`: Wire types, classifier rules, REST catalog client
//!   - `snapshot`: In-memory TTL snapshot store
//!   - `broadcast`: Channel-based batch distribution
//!   - `gateway`: Downstream WebSocket endpoint
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Binance Spot WS ──┐
//!                   ├──► classify ──► dispatch ──► snapshot store (TTL)
//! Binance CMF WS  ──┘                                    │
//!                                                        │ every 5s
//!                                                        ▼
//!                              gateway clients ◄── broadcast ◄── fan-out
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    ChannelKey, ChannelKind, ConnectionState, Exchange, FeedId, Market, NormalizedRecord,
};
pub use domain::subscription::{ControlFrame, SubscriptionRegistry};

// Application services
pub use application::services::{
    BootstrapResolver, FanoutConfig, FanoutScheduler, MarketFeedService, MarketFeedSettings,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServiceConfig};

// Stream connection
pub use infrastructure::stream::{
    ConnectError, ConnectionError, ConnectionHandle, StreamConfig, StreamConnection,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastHub, SharedBroadcastHub};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
