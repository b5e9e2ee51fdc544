//! Broadcast Channel Adapter
//!
//! Distributes snapshot batches from the fan-out scheduler to every
//! downstream consumer over a tokio broadcast channel. Receivers that fall
//! behind lose the oldest batches (`Lagged`) rather than slowing the
//! scheduler.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::ports::{BatchSink, SnapshotBatch};

/// Configuration for the broadcast channel.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Batches buffered per receiver before it starts lagging.
    pub capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { capacity: 1_024 }
    }
}

/// Central hub for snapshot batches.
///
/// # Example
///
/// ```rust
/// use market_feed::application::ports::SnapshotBatch;
/// use market_feed::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let mut rx = hub.batches_rx();
///
/// let delivered = hub.send_batch(SnapshotBatch {
///     channel: "Binance:SpotMiniTicker".to_string(),
///     payload: vec![],
/// });
/// assert_eq!(delivered, Some(1));
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    batches_tx: broadcast::Sender<SnapshotBatch>,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        let (batches_tx, _) = broadcast::channel(config.capacity.max(1));
        Self { batches_tx }
    }

    /// Create a hub with default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Send a batch to all receivers.
    ///
    /// Returns the number of receivers, or `None` if there are none.
    #[must_use]
    pub fn send_batch(&self, batch: SnapshotBatch) -> Option<usize> {
        self.batches_tx.send(batch).ok()
    }

    /// Subscribe to snapshot batches.
    #[must_use]
    pub fn batches_rx(&self) -> broadcast::Receiver<SnapshotBatch> {
        self.batches_tx.subscribe()
    }

    /// Current receiver count.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.batches_tx.receiver_count()
    }

    /// Channel statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            receivers: self.batches_tx.receiver_count(),
            queued: self.batches_tx.len(),
        }
    }
}

impl BatchSink for BroadcastHub {
    fn publish(&self, batch: SnapshotBatch) -> usize {
        self.send_batch(batch).unwrap_or(0)
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about the broadcast channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Active receivers.
    pub receivers: usize,
    /// Batches retained for the slowest receiver.
    pub queued: usize,
}

// =============================================================================
// Tests
// =============================================================================
