//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames, routed records, unroutable frames
//! - **Connections**: Stream connection state and reconnects per feed
//! - **Subscriptions**: Active subscriptions per feed
//! - **Snapshots**: Store writes and fan-out batches
//! - **Gateway**: Connected downstream clients
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder, so
//! unit tests can call them freely.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::{ChannelKind, ConnectionState, FeedId};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the already-installed handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "market_feed_frames_received_total",
        "Total text frames received from exchange feeds"
    );
    describe_counter!(
        "market_feed_records_routed_total",
        "Total normalized records routed by channel kind"
    );
    describe_counter!(
        "market_feed_frames_unroutable_total",
        "Total frames dropped because they could not be classified"
    );
    describe_counter!(
        "market_feed_unknown_channel_total",
        "Total records dropped because no subscription matched"
    );

    // Connection metrics
    describe_gauge!(
        "market_feed_connection_state",
        "Stream connection state (0=disconnected 1=connecting 2=open 3=closing 4=reconnecting)"
    );
    describe_counter!(
        "market_feed_reconnects_total",
        "Total stream reconnection attempts"
    );
    describe_gauge!(
        "market_feed_subscriptions",
        "Active channel subscriptions per feed"
    );

    // Bootstrap
    describe_counter!(
        "market_feed_catalog_failures_total",
        "Total failed instrument catalog fetches"
    );

    // Snapshots and fan-out
    describe_counter!(
        "market_feed_snapshot_writes_total",
        "Total snapshot writes by namespace"
    );
    describe_counter!(
        "market_feed_fanout_batches_total",
        "Total snapshot batches published by channel"
    );
    describe_counter!(
        "market_feed_fanout_records_total",
        "Total snapshot records published by channel"
    );

    // Gateway
    describe_gauge!(
        "market_feed_gateway_clients",
        "Connected downstream WebSocket clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an inbound text frame.
pub fn record_frame(feed: FeedId) {
    counter!("market_feed_frames_received_total", "feed" => feed.to_string()).increment(1);
}

/// Record a routed record.
pub fn record_routed(feed: FeedId, kind: ChannelKind) {
    counter!(
        "market_feed_records_routed_total",
        "feed" => feed.to_string(),
        "channel" => kind.as_str()
    )
    .increment(1);
}

/// Record an unroutable frame.
pub fn record_unroutable(feed: FeedId) {
    counter!("market_feed_frames_unroutable_total", "feed" => feed.to_string()).increment(1);
}

/// Record a record with no matching subscription.
pub fn record_unknown_dispatch(feed: FeedId) {
    counter!("market_feed_unknown_channel_total", "feed" => feed.to_string()).increment(1);
}

/// Update the connection state gauge for a feed.
pub fn set_connection_state(feed: FeedId, state: ConnectionState) {
    gauge!("market_feed_connection_state", "feed" => feed.to_string()).set(state.as_gauge());
}

/// Record a reconnection attempt.
pub fn record_reconnect(feed: FeedId) {
    counter!("market_feed_reconnects_total", "feed" => feed.to_string()).increment(1);
}

/// Update the active subscription gauge for a feed.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(feed: FeedId, count: usize) {
    gauge!("market_feed_subscriptions", "feed" => feed.to_string()).set(count as f64);
}

/// Record a failed catalog fetch.
pub fn record_catalog_failure(feed: FeedId) {
    counter!("market_feed_catalog_failures_total", "feed" => feed.to_string()).increment(1);
}

/// Record a snapshot write.
pub fn record_snapshot_write(namespace: &str) {
    counter!(
        "market_feed_snapshot_writes_total",
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

/// Record a published fan-out batch.
pub fn record_fanout_batch(channel: &str, records: usize) {
    counter!("market_feed_fanout_batches_total", "channel" => channel.to_string()).increment(1);
    counter!("market_feed_fanout_records_total", "channel" => channel.to_string())
        .increment(records as u64);
}

/// Update the gateway client gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_gateway_clients(count: usize) {
    gauge!("market_feed_gateway_clients").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
