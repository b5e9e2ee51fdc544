//! Fan-out Scheduler
//!
//! Timer-driven job. On every tick it enumerates the live keys of each
//! configured namespace, reads them one by one and publishes one batch per
//! namespace, empty ones included, so consumers can tell an idle or fully
//! stale namespace from a stalled scheduler. Reads are independent per key, so a batch can mix snapshots
//! from slightly different instants. Delivery is at-most-once per tick;
//! a consumer that misses a tick gets fresher data on the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{BatchSink, SharedSnapshotStore, SnapshotBatch, SnapshotStoreExt};
use crate::domain::streaming::{Namespace, NormalizedRecord};
use crate::infrastructure::metrics;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Tick period.
    pub interval: Duration,
    /// Namespaces to broadcast, in order.
    pub namespaces: Vec<Namespace>,
}

impl FanoutConfig {
    /// Default tick period.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

    /// Configuration with the default period.
    #[must_use]
    pub const fn new(namespaces: Vec<Namespace>) -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            namespaces,
        }
    }
}

/// Periodic snapshot broadcaster.
pub struct FanoutScheduler {
    config: FanoutConfig,
    store: SharedSnapshotStore,
    sink: Arc<dyn BatchSink>,
    span: tracing::Span,
}

impl FanoutScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(config: FanoutConfig, store: SharedSnapshotStore, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            config,
            store,
            sink,
            span: tracing::info_span!("fanout", component = "fanout_scheduler"),
        }
    }

    /// Read every live snapshot of `namespace`.
    ///
    /// Keys that expire or fail to decode between the scan and the read are
    /// skipped.
    #[must_use]
    pub fn collect(&self, namespace: &Namespace) -> SnapshotBatch {
        let payload = self
            .store
            .scan_prefix(&namespace.scan_prefix())
            .iter()
            .filter_map(|key| match self.store.get_json::<NormalizedRecord>(key) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable snapshot");
                    None
                }
            })
            .collect();

        SnapshotBatch {
            channel: namespace.name(),
            payload,
        }
    }

    /// Run one tick: one batch per configured namespace, in order. A
    /// namespace with no live snapshots publishes an empty payload.
    ///
    /// Returns the published batches.
    pub fn tick(&self) -> Vec<SnapshotBatch> {
        let mut published = Vec::with_capacity(self.config.namespaces.len());

        for namespace in &self.config.namespaces {
            let batch = self.collect(namespace);
            let receivers = self.sink.publish(batch.clone());
            metrics::record_fanout_batch(&batch.channel, batch.payload.len());
            tracing::debug!(
                channel = %batch.channel,
                records = batch.payload.len(),
                receivers,
                "Published snapshot batch"
            );
            published.push(batch);
        }

        published
    }

    /// Tick on the configured period until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            let period = if self.config.interval.is_zero() {
                tracing::warn!(
                    default_ms = u64::try_from(FanoutConfig::DEFAULT_INTERVAL.as_millis()).unwrap_or(u64::MAX),
                    "Fan-out interval is zero; using the default period"
                );
                FanoutConfig::DEFAULT_INTERVAL
            } else {
                self.config.interval
            };
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; start one period in
            interval.tick().await;

            tracing::info!(
                interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
                namespaces = self.config.namespaces.len(),
                "Fan-out scheduler started"
            );

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::info!("Fan-out scheduler stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick();
                    }
                }
            }
        }
        .instrument(span)
        .await;
    }
}
