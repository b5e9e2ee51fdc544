//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `BootstrapResolver`: fetches the instrument catalog, retrying until it
//!   is non-empty
//! - `MarketFeedService`: owns one connection; seeds subscriptions on open
//!   and writes routed records into the snapshot store
//! - `FanoutScheduler`: periodically broadcasts live snapshots

/// Catalog bootstrap with retry.
pub mod bootstrap;

/// Periodic snapshot fan-out.
pub mod fanout;

/// Connection owner: subscription seeding and snapshot writes.
pub mod market_feed;

/// Retry-with-delay helper.
pub mod retry;

pub use bootstrap::BootstrapResolver;
pub use fanout::{FanoutConfig, FanoutScheduler};
pub use market_feed::{DepthSeed, MarketFeedService, MarketFeedSettings};
pub use retry::{RetryError, RetryPolicy, retry_with_delay};
