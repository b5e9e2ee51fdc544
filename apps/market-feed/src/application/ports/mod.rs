//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`SnapshotStore`]: key-value cache with per-key TTL
//! - [`CatalogSource`]: authoritative instrument catalog (REST)
//! - [`StreamControl`]: outbound control side of a stream connection
//! - [`BatchSink`]: downstream broadcast of snapshot batches
//!
//! ## Driver Ports (Inbound)
//!
//! - [`FrameClassifier`]: exchange-specific decoding of inbound frames
//! - [`ConnectionLifecycle`]: open/close hooks implemented by the owner
//!   of a connection
//! - [`StreamNaming`]: exchange-specific stream parameter grammar

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::domain::catalog::InstrumentCatalogEntry;
use crate::domain::streaming::{ChannelKey, ChannelKind, ConnectionState, NormalizedRecord};
use crate::domain::subscription::RecordHandler;

// =============================================================================
// Snapshot Store
// =============================================================================

/// Key-value cache with per-key TTL.
///
/// Implementations must allow concurrent single-key reads and writes
/// without caller coordination. Writes are last-writer-wins per key; there
/// is no cross-key atomicity. Expired keys behave as absent.
pub trait SnapshotStore: Send + Sync {
    /// Read a live value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, resetting its expiry to now + `ttl`.
    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration);

    /// Live keys starting with `prefix`, sorted.
    fn scan_prefix(&self, prefix: &str) -> Vec<String>;

    /// Remaining lifetime of a live key.
    fn ttl(&self, key: &str) -> Option<Duration>;
}

/// Errors from the typed snapshot helpers.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotStoreError {
    /// Value could not be encoded or decoded.
    #[error("snapshot value for {key} is not valid JSON: {source}")]
    Json {
        /// Affected key.
        key: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Typed JSON helpers over any [`SnapshotStore`].
pub trait SnapshotStoreExt: SnapshotStore {
    /// Read and decode a live value.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not decode as `T`.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SnapshotStoreError> {
        self.get(key)
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|source| SnapshotStoreError::Json {
                key: key.to_string(),
                source,
            })
    }

    /// Encode and write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be encoded.
    fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), SnapshotStoreError> {
        let raw = serde_json::to_string(value).map_err(|source| SnapshotStoreError::Json {
            key: key.to_string(),
            source,
        })?;
        self.set_with_ttl(key, raw, ttl);
        Ok(())
    }
}

impl<S: SnapshotStore + ?Sized> SnapshotStoreExt for S {}

/// Shared snapshot store handle.
pub type SharedSnapshotStore = Arc<dyn SnapshotStore>;

// =============================================================================
// Catalog Source
// =============================================================================

/// Errors fetching the instrument catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogFetchError {
    /// HTTP transport failure.
    #[error("catalog request failed: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("catalog request returned HTTP {status}")]
    Status {
        /// Status code.
        status: u16,
    },

    /// Response body could not be decoded.
    #[error("catalog response could not be decoded: {0}")]
    Decode(String),

    /// The exchange returned no instruments.
    #[error("catalog is empty")]
    Empty,
}

/// Authoritative source of the instrument catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch the full catalog once.
    async fn fetch_catalog(&self) -> Result<Vec<InstrumentCatalogEntry>, CatalogFetchError>;
}

// =============================================================================
// Frame Classification
// =============================================================================

/// Why a frame could not be routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Shape recognized but the payload did not decode.
    #[error("{kind:?} frame failed to decode: {reason}")]
    Decode {
        /// Channel the shape matched.
        kind: ChannelKind,
        /// Decoder message.
        reason: String,
    },

    /// No rule matched.
    #[error("frame matches no known shape")]
    UnknownShape,
}

/// One routable record and its dispatch key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Dispatch key.
    pub key: ChannelKey,
    /// Normalized record.
    pub record: NormalizedRecord,
}

/// Outcome of classifying one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Success acknowledgement of a control frame.
    Ack {
        /// Echoed correlation id.
        id: String,
    },
    /// Error response to a control frame.
    Rejected {
        /// Echoed correlation id, if any.
        id: Option<String>,
        /// Exchange error code.
        code: i64,
        /// Exchange error message.
        message: String,
    },
    /// Records to dispatch, in frame order.
    Routed(Vec<Route>),
    /// Nothing matched; log and drop.
    Unroutable(ProtocolError),
}

/// Exchange-specific decoding of raw inbound frames.
///
/// This is the only place that knows an exchange's wire format.
pub trait FrameClassifier: Send + Sync {
    /// Classify one raw text frame.
    fn classify(&self, raw: &str) -> Classification;
}

/// Exchange-specific stream parameter grammar.
pub trait StreamNaming: Send + Sync {
    /// Parameter string for a channel, e.g. `btcusdt@bookTicker`.
    fn stream_param(&self, key: &ChannelKey) -> String;
}

// =============================================================================
// Stream Control
// =============================================================================

/// Errors queueing an outbound frame.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The outbound queue is at capacity.
    #[error("outbound queue full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// The connection was closed.
    #[error("connection closed")]
    Closed,

    /// The control frame could not be encoded.
    #[error("control frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound control side of a stream connection.
///
/// Frames sent while the transport is down are queued and flushed in order
/// on the next open.
#[cfg_attr(test, mockall::automock)]
pub trait StreamControl: Send + Sync {
    /// Queue a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::QueueFull`] or [`SendError::Closed`].
    fn send(&self, frame: String) -> Result<(), SendError>;

    /// Register `handler` for `key` and queue the subscribe frame.
    ///
    /// Returns the correlation id.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be queued; the registry is
    /// left unchanged in that case.
    fn subscribe(
        &self,
        key: ChannelKey,
        params: Vec<String>,
        handler: RecordHandler,
    ) -> Result<String, SendError>;

    /// Remove the subscription for `key` and queue the unsubscribe frame.
    ///
    /// Returns `false` when nothing was subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be queued.
    fn unsubscribe(&self, key: &ChannelKey) -> Result<bool, SendError>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}

/// Lifecycle hooks supplied by the owner of a connection.
pub trait ConnectionLifecycle: Send + Sync {
    /// A session reached `OPEN`. The registry is empty at this point.
    fn on_open(&self, control: Arc<dyn StreamControl>);

    /// A session ended (transport loss or close).
    fn on_close(&self);
}

// =============================================================================
// Downstream Broadcast
// =============================================================================

/// One fan-out event: all live snapshots of one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotBatch {
    /// Namespace name, e.g. `Binance:SpotMiniTicker`.
    pub channel: String,
    /// Records, ordered by snapshot key.
    pub payload: Vec<NormalizedRecord>,
}

/// Downstream consumer of snapshot batches.
pub trait BatchSink: Send + Sync {
    /// Publish a batch. Returns the number of consumers that received it.
    fn publish(&self, batch: SnapshotBatch) -> usize;
}
