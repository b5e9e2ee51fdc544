//! Subscription Registry
//!
//! Per-connection dispatch table from [`ChannelKey`] to record handler,
//! plus the set of control frames still awaiting acknowledgement.
//!
//! # Design
//!
//! The registry tracks:
//! - At most one handler per channel key (a later subscribe replaces)
//! - Pending control frames by correlation id, for ack/rejection matching
//! - Dispatches that hit no entry, which are logged and dropped
//!
//! Entries never survive a connection teardown: the connection calls
//! [`SubscriptionRegistry::clear`] when a session ends and the owner
//! re-subscribes from its open hook.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use market_feed::domain::streaming::{ChannelKey, ChannelKind};
//! use market_feed::domain::subscription::SubscriptionRegistry;
//!
//! let registry = SubscriptionRegistry::new();
//! let key = ChannelKey::market_wide(ChannelKind::MiniTicker);
//!
//! let (frame, _previous) = registry.subscribe(
//!     key.clone(),
//!     vec!["!miniTicker@arr".to_string()],
//!     Arc::new(|_record| {}),
//! );
//! assert_eq!(registry.len(), 1);
//!
//! // The exchange echoes the correlation id back on success
//! assert!(registry.acknowledge(&frame.id).is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use super::streaming::{ChannelKey, NormalizedRecord};

// =============================================================================
// Types
// =============================================================================

/// Callback invoked with every record routed to a subscription.
pub type RecordHandler = Arc<dyn Fn(NormalizedRecord) + Send + Sync>;

/// Control frame method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMethod {
    /// Start a stream.
    Subscribe,
    /// Stop a stream.
    Unsubscribe,
}

/// Outbound control frame: `{"method", "params", "id"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFrame {
    /// Method.
    pub method: ControlMethod,
    /// Stream parameters, e.g. `btcusdt@bookTicker`.
    pub params: Vec<String>,
    /// Client-generated correlation id.
    pub id: String,
}

impl ControlFrame {
    /// Build a frame with a fresh UUID v4 correlation id.
    #[must_use]
    pub fn new(method: ControlMethod, params: Vec<String>) -> Self {
        Self {
            method,
            params,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Encode as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A registered subscription.
#[derive(Clone)]
pub struct Subscription {
    /// Dispatch key.
    pub key: ChannelKey,
    /// Stream parameters sent upstream.
    pub params: Vec<String>,
    /// Record handler.
    pub handler: RecordHandler,
    /// Id of the subscribe frame that installed this entry.
    pub request_id: String,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("params", &self.params)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// A control frame awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Method that was sent.
    pub method: ControlMethod,
    /// Channel the frame was issued for.
    pub key: ChannelKey,
}

/// Result of routing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The record reached a handler.
    Delivered,
    /// No subscription matched; the record was dropped.
    Unknown,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Active subscriptions.
    pub subscriptions: usize,
    /// Control frames awaiting acknowledgement.
    pub pending: usize,
    /// Dispatches that matched no subscription.
    pub unknown_dispatches: u64,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe dispatch table for one connection.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<ChannelKey, Subscription>>,
    pending: RwLock<HashMap<String, PendingRequest>>,
    unknown_dispatches: AtomicU64,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `key`.
    ///
    /// Returns the subscribe control frame to send and the subscription it
    /// replaced, if any.
    pub fn subscribe(
        &self,
        key: ChannelKey,
        params: Vec<String>,
        handler: RecordHandler,
    ) -> (ControlFrame, Option<Subscription>) {
        let frame = ControlFrame::new(ControlMethod::Subscribe, params.clone());
        self.pending.write().insert(
            frame.id.clone(),
            PendingRequest {
                method: ControlMethod::Subscribe,
                key: key.clone(),
            },
        );

        let subscription = Subscription {
            key: key.clone(),
            params,
            handler,
            request_id: frame.id.clone(),
        };
        let previous = self.entries.write().insert(key, subscription);
        (frame, previous)
    }

    /// Remove the entry for `key`.
    ///
    /// Returns the unsubscribe control frame to send, or `None` when no
    /// subscription existed.
    pub fn unsubscribe(&self, key: &ChannelKey) -> Option<ControlFrame> {
        let removed = self.entries.write().remove(key)?;
        let frame = ControlFrame::new(ControlMethod::Unsubscribe, removed.params);
        self.pending.write().insert(
            frame.id.clone(),
            PendingRequest {
                method: ControlMethod::Unsubscribe,
                key: key.clone(),
            },
        );
        Some(frame)
    }

    /// Undo a [`Self::subscribe`] whose control frame could not be sent.
    pub fn rollback(&self, frame: &ControlFrame, key: &ChannelKey, previous: Option<Subscription>) {
        self.pending.write().remove(&frame.id);
        let mut entries = self.entries.write();
        match previous {
            Some(previous) => {
                entries.insert(key.clone(), previous);
            }
            None => {
                entries.remove(key);
            }
        }
    }

    /// Route one record to its handler.
    ///
    /// Resolution order:
    /// 1. exact key
    /// 2. for per-instrument keys, the market-wide key of the same kind
    /// 3. for market-wide keys with no market-wide entry, the sole
    ///    per-instrument subscription of that kind; the record is rebuilt
    ///    with that subscription's instrument id
    ///
    /// The handler runs outside the registry lock.
    pub fn dispatch(&self, key: &ChannelKey, record: NormalizedRecord) -> DispatchOutcome {
        let resolved = self.resolve(key);

        match resolved {
            Some((handler, None)) => {
                handler(record);
                DispatchOutcome::Delivered
            }
            Some((handler, Some(instrument))) => {
                handler(record.with_instrument(&instrument));
                DispatchOutcome::Delivered
            }
            None => {
                self.unknown_dispatches.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(channel = %key, "Dropping record for unsubscribed channel");
                DispatchOutcome::Unknown
            }
        }
    }

    fn resolve(&self, key: &ChannelKey) -> Option<(RecordHandler, Option<String>)> {
        let entries = self.entries.read();

        if let Some(entry) = entries.get(key) {
            return Some((Arc::clone(&entry.handler), None));
        }

        if key.is_market_wide() {
            let mut candidates = entries.values().filter(|s| s.key.kind == key.kind);
            let sole = candidates.next()?;
            if candidates.next().is_some() {
                return None;
            }
            return Some((Arc::clone(&sole.handler), sole.key.instrument.clone()));
        }

        entries
            .get(&ChannelKey::market_wide(key.kind))
            .map(|entry| (Arc::clone(&entry.handler), None))
    }

    /// Resolve a pending control frame after a success acknowledgement.
    pub fn acknowledge(&self, id: &str) -> Option<PendingRequest> {
        self.pending.write().remove(id)
    }

    /// Resolve a pending control frame after an error response.
    ///
    /// A rejected subscribe also drops the subscription it created, unless
    /// a later subscribe has since replaced it.
    pub fn reject(&self, id: &str) -> Option<PendingRequest> {
        let request = self.pending.write().remove(id)?;
        if request.method == ControlMethod::Subscribe {
            let mut entries = self.entries.write();
            if entries.get(&request.key).is_some_and(|s| s.request_id == id) {
                entries.remove(&request.key);
            }
        }
        Some(request)
    }

    /// Drop every subscription and pending request (connection teardown).
    pub fn clear(&self) {
        self.entries.write().clear();
        self.pending.write().clear();
    }

    /// Whether `key` has a subscription.
    #[must_use]
    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Snapshot of all subscribed keys.
    #[must_use]
    pub fn keys(&self) -> Vec<ChannelKey> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            subscriptions: self.entries.read().len(),
            pending: self.pending.read().len(),
            unknown_dispatches: self.unknown_dispatches.load(Ordering::Relaxed),
        }
    }
}
