//! Market Feed Service
//!
//! Owner of one stream connection. On every open it resolves the
//! instrument catalog, caches it, and (re-)issues the feed's subscriptions:
//! the full-market mini ticker plus per-instrument book tickers and depth
//! for configured instruments that the catalog lists as tradable. Every
//! routed record is written to the snapshot store under its namespace.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::bootstrap::BootstrapResolver;
use super::retry::RetryError;
use crate::application::ports::{
    ConnectionLifecycle, SharedSnapshotStore, SnapshotStoreExt, StreamControl, StreamNaming,
};
use crate::domain::catalog::InstrumentCatalogEntry;
use crate::domain::streaming::{ChannelKey, ChannelKind, FeedId, Market, Namespace, NormalizedRecord};
use crate::domain::subscription::RecordHandler;
use crate::infrastructure::metrics;

/// Default snapshot TTL (48 hours).
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(172_800);

// =============================================================================
// Settings
// =============================================================================

/// Per-instrument depth subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepthSeed {
    /// Instruments to subscribe depth for.
    pub symbols: Vec<String>,
}

/// What one feed subscribes to and how it caches.
#[derive(Debug, Clone)]
pub struct MarketFeedSettings {
    /// Feed identity.
    pub feed: FeedId,
    /// TTL applied to every snapshot write.
    pub snapshot_ttl: Duration,
    /// Spot mini tickers are cached only when the symbol contains this
    /// quote asset.
    pub quote_filter: Option<String>,
    /// Instruments to subscribe book tickers for.
    pub book_ticker_symbols: Vec<String>,
    /// Instruments to subscribe depth for.
    pub depth: DepthSeed,
}

impl MarketFeedSettings {
    /// Settings with defaults for `feed`.
    #[must_use]
    pub const fn new(feed: FeedId) -> Self {
        Self {
            feed,
            snapshot_ttl: DEFAULT_SNAPSHOT_TTL,
            quote_filter: None,
            book_ticker_symbols: Vec::new(),
            depth: DepthSeed {
                symbols: Vec::new(),
            },
        }
    }

    /// Snapshot namespaces this feed writes records into.
    #[must_use]
    pub fn channel_namespaces(&self) -> Vec<Namespace> {
        ChannelKind::all()
            .iter()
            .map(|kind| self.feed.channel_namespace(*kind))
            .collect()
    }
}

// =============================================================================
// Service
// =============================================================================

struct Inner {
    settings: MarketFeedSettings,
    resolver: BootstrapResolver,
    store: SharedSnapshotStore,
    naming: Arc<dyn StreamNaming>,
    span: tracing::Span,
}

/// Connection owner for one feed.
pub struct MarketFeedService {
    inner: Arc<Inner>,
    seeding: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl MarketFeedService {
    /// Create the service.
    #[must_use]
    pub fn new(
        settings: MarketFeedSettings,
        resolver: BootstrapResolver,
        store: SharedSnapshotStore,
        naming: Arc<dyn StreamNaming>,
        shutdown: CancellationToken,
    ) -> Self {
        let span = tracing::info_span!(
            "market_feed",
            component = "market_feed_service",
            feed = %settings.feed
        );
        Self {
            inner: Arc::new(Inner {
                settings,
                resolver,
                store,
                naming,
                span,
            }),
            seeding: Mutex::new(None),
            shutdown,
        }
    }

    /// Feed settings.
    #[must_use]
    pub fn settings(&self) -> &MarketFeedSettings {
        &self.inner.settings
    }

    /// Resolve the catalog, cache it and issue this feed's subscriptions.
    ///
    /// Called from the open hook on every session; exposed for tests.
    pub async fn seed(&self, control: Arc<dyn StreamControl>, cancel: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        let span = inner.span.clone();
        inner.seed(control, cancel).instrument(span).await;
    }

    /// Tradable instruments currently live in the catalog namespace.
    #[must_use]
    pub fn tradable_instruments(&self) -> HashSet<String> {
        self.inner.tradable_instruments()
    }
}

impl ConnectionLifecycle for MarketFeedService {
    fn on_open(&self, control: Arc<dyn StreamControl>) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.seeding.lock().replace(token.clone()) {
            previous.cancel();
        }

        let inner = Arc::clone(&self.inner);
        let span = inner.span.clone();
        tokio::spawn(async move { inner.seed(control, token).await }.instrument(span));
    }

    fn on_close(&self) {
        if let Some(token) = self.seeding.lock().take() {
            token.cancel();
        }
        self.inner.span.in_scope(|| {
            tracing::debug!("Session closed; subscriptions will be re-seeded on next open");
        });
    }
}

impl Inner {
    async fn seed(&self, control: Arc<dyn StreamControl>, cancel: CancellationToken) {
        let catalog = match self.resolver.fetch_catalog(&cancel).await {
            Ok(catalog) => catalog,
            Err(RetryError::Cancelled) => {
                tracing::debug!("Subscription seeding cancelled");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Instrument catalog unavailable; no subscriptions issued");
                return;
            }
        };

        self.store_catalog(&catalog);

        if cancel.is_cancelled() {
            return;
        }

        let tradable = self.tradable_instruments();
        let mut keys = vec![ChannelKey::market_wide(ChannelKind::MiniTicker)];
        keys.extend(self.seeded_keys(ChannelKind::BookTicker, &self.settings.book_ticker_symbols, &tradable));
        keys.extend(self.seeded_keys(ChannelKind::Depth, &self.settings.depth.symbols, &tradable));

        for key in keys {
            self.subscribe(control.as_ref(), key);
        }
    }

    fn seeded_keys(
        &self,
        kind: ChannelKind,
        symbols: &[String],
        tradable: &HashSet<String>,
    ) -> Vec<ChannelKey> {
        symbols
            .iter()
            .map(|s| s.to_uppercase())
            .filter(|symbol| {
                let ok = tradable.contains(symbol);
                if !ok {
                    tracing::warn!(
                        symbol = %symbol,
                        channel = kind.as_str(),
                        "Skipping subscription for instrument that is not tradable"
                    );
                }
                ok
            })
            .map(|symbol| ChannelKey::instrument(kind, &symbol))
            .collect()
    }

    fn subscribe(&self, control: &dyn StreamControl, key: ChannelKey) {
        let params = vec![self.naming.stream_param(&key)];
        let handler = self.snapshot_writer(key.kind);
        let channel = key.to_string();

        match control.subscribe(key, params, handler) {
            Ok(id) => tracing::info!(channel = %channel, id = %id, "Subscription issued"),
            Err(e) => tracing::warn!(channel = %channel, error = %e, "Subscription could not be queued"),
        }
    }

    fn store_catalog(&self, catalog: &[InstrumentCatalogEntry]) {
        let namespace = self.settings.feed.catalog_namespace();
        for entry in catalog {
            let key = namespace.key(&entry.symbol);
            if let Err(e) = self.store.set_json(&key, entry, self.settings.snapshot_ttl) {
                tracing::warn!(key = %key, error = %e, "Failed to cache catalog entry");
            }
        }
        tracing::info!(
            namespace = %namespace.name(),
            instruments = catalog.len(),
            "Instrument catalog cached"
        );
    }

    fn tradable_instruments(&self) -> HashSet<String> {
        let namespace = self.settings.feed.catalog_namespace();
        self.store
            .scan_prefix(&namespace.scan_prefix())
            .iter()
            .filter_map(|key| match self.store.get_json::<InstrumentCatalogEntry>(key) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring undecodable catalog entry");
                    None
                }
            })
            .filter(InstrumentCatalogEntry::is_tradable)
            .map(|entry| entry.symbol)
            .collect()
    }

    fn snapshot_writer(&self, kind: ChannelKind) -> RecordHandler {
        let store = Arc::clone(&self.store);
        let namespace = self.settings.feed.channel_namespace(kind);
        let namespace_name = namespace.name();
        let ttl = self.settings.snapshot_ttl;
        let quote_filter = match (self.settings.feed.market, kind) {
            (Market::Spot, ChannelKind::MiniTicker) => self.settings.quote_filter.clone(),
            _ => None,
        };

        Arc::new(move |record: NormalizedRecord| {
            let instrument = record.instrument_id();
            if instrument.is_empty() {
                tracing::warn!(namespace = %namespace_name, "Dropping record without instrument id");
                return;
            }
            if let Some(quote) = &quote_filter
                && !instrument.contains(quote.as_str())
            {
                return;
            }

            let key = namespace.key(instrument);
            match store.set_json(&key, &record, ttl) {
                Ok(()) => metrics::record_snapshot_write(&namespace_name),
                Err(e) => tracing::warn!(key = %key, error = %e, "Snapshot write failed"),
            }
        })
    }
}
