//! Bootstrap Resolver
//!
//! Acquires the authoritative instrument catalog for one feed. A feed with
//! no catalog cannot seed subscriptions, so the default policy retries
//! forever with a fixed delay and only a cancellation stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::retry::{RetryError, RetryPolicy, retry_with_delay};
use crate::application::ports::{CatalogFetchError, CatalogSource};
use crate::domain::catalog::InstrumentCatalogEntry;
use crate::domain::streaming::FeedId;
use crate::infrastructure::metrics;

/// Default delay between catalog attempts.
pub const DEFAULT_CATALOG_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Fetches the instrument catalog, retrying on failure or empty result.
pub struct BootstrapResolver {
    feed: FeedId,
    source: Arc<dyn CatalogSource>,
    policy: RetryPolicy,
    span: tracing::Span,
}

impl BootstrapResolver {
    /// Create a resolver with the default unbounded policy.
    #[must_use]
    pub fn new(feed: FeedId, source: Arc<dyn CatalogSource>) -> Self {
        Self {
            feed,
            source,
            policy: RetryPolicy::unbounded(DEFAULT_CATALOG_RETRY_DELAY),
            span: tracing::info_span!("bootstrap", component = "bootstrap_resolver", feed = %feed),
        }
    }

    /// Override the retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the logging span.
    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Fetch a non-empty catalog.
    ///
    /// Blocks (asynchronously) until the source returns at least one
    /// instrument. Every failed attempt is logged at `warn`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Cancelled`] if `cancel` fires, or
    /// [`RetryError::Exhausted`] under a bounded policy.
    pub async fn fetch_catalog(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<InstrumentCatalogEntry>, RetryError<CatalogFetchError>> {
        let feed = self.feed;
        let source = &self.source;

        let result = retry_with_delay(&self.policy, cancel, |attempt| async move {
            tracing::debug!(attempt, "Fetching instrument catalog");
            let outcome = match source.fetch_catalog().await {
                Ok(entries) if entries.is_empty() => Err(CatalogFetchError::Empty),
                other => other,
            };
            if outcome.is_err() {
                metrics::record_catalog_failure(feed);
            }
            outcome
        })
        .instrument(self.span.clone())
        .await;

        if let Ok(entries) = &result {
            self.span.in_scope(|| {
                tracing::info!(instruments = entries.len(), "Instrument catalog resolved");
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockCatalogSource;
    use crate::domain::catalog::TradingStatus;
    use crate::domain::streaming::{Exchange, Market};
    use mockall::Sequence;

    fn feed() -> FeedId {
        FeedId::new(Exchange::Binance, Market::Spot)
    }

    fn entry(symbol: &str) -> InstrumentCatalogEntry {
        InstrumentCatalogEntry {
            symbol: symbol.to_string(),
            trading_status: TradingStatus::Trading,
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            price_precision: 8,
            quantity_precision: 8,
            order_types: vec![],
            contract_type: None,
        }
    }

    #[tokio::test]
    async fn retries_failures_and_empty_results_until_non_empty() {
        let mut source = MockCatalogSource::new();
        let mut seq = Sequence::new();
        source
            .expect_fetch_catalog()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(CatalogFetchError::Status { status: 503 }));
        source
            .expect_fetch_catalog()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![]));
        source
            .expect_fetch_catalog()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![entry("BTCUSDT"), entry("ETHUSDT")]));

        let resolver = BootstrapResolver::new(feed(), Arc::new(source))
            .with_policy(RetryPolicy::unbounded(Duration::ZERO));

        let catalog = resolver
            .fetch_catalog(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[tokio::test]
    async fn bounded_policy_gives_up_on_persistent_empty_catalog() {
        let mut source = MockCatalogSource::new();
        source.expect_fetch_catalog().times(3).returning(|| Ok(vec![]));

        let resolver = BootstrapResolver::new(feed(), Arc::new(source))
            .with_policy(RetryPolicy::bounded(Duration::ZERO, 3));

        let result = resolver.fetch_catalog(&CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last_error: CatalogFetchError::Empty
            })
        ));
    }

    #[tokio::test]
    async fn cancelled_resolver_returns_cancelled() {
        let mut source = MockCatalogSource::new();
        source
            .expect_fetch_catalog()
            .returning(|| Err(CatalogFetchError::Transport("refused".to_string())));

        let resolver = BootstrapResolver::new(feed(), Arc::new(source))
            .with_policy(RetryPolicy::unbounded(Duration::from_millis(10)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = resolver.fetch_catalog(&cancel).await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
