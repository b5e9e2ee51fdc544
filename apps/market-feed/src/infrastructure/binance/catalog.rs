//! Binance Instrument Catalog Client
//!
//! [`CatalogSource`] over the REST `exchangeInfo` endpoints. Spot and
//! coin-margined futures return different shapes; both are normalized into
//! [`InstrumentCatalogEntry`]. Retrying is the bootstrap resolver's job, so
//! this client makes exactly one request per call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::endpoints::{CatalogShape, FeedProfile};
use crate::application::ports::{CatalogFetchError, CatalogSource};
use crate::domain::catalog::{InstrumentCatalogEntry, TradingStatus};

/// Default request timeout.
pub const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ExchangeInfo<S> {
    symbols: Vec<S>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotSymbol {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    base_asset_precision: u32,
    #[serde(default)]
    quote_asset_precision: u32,
    #[serde(default)]
    order_types: Vec<String>,
}

impl From<SpotSymbol> for InstrumentCatalogEntry {
    fn from(s: SpotSymbol) -> Self {
        Self {
            trading_status: TradingStatus::from_exchange(&s.status),
            symbol: s.symbol,
            base_asset: s.base_asset,
            quote_asset: s.quote_asset,
            price_precision: s.quote_asset_precision,
            quantity_precision: s.base_asset_precision,
            order_types: s.order_types,
            contract_type: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinFuturesSymbol {
    symbol: String,
    contract_status: String,
    #[serde(default)]
    contract_type: Option<String>,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    price_precision: u32,
    #[serde(default)]
    quantity_precision: u32,
    #[serde(default)]
    order_types: Vec<String>,
}

impl From<CoinFuturesSymbol> for InstrumentCatalogEntry {
    fn from(s: CoinFuturesSymbol) -> Self {
        Self {
            trading_status: TradingStatus::from_exchange(&s.contract_status),
            symbol: s.symbol,
            base_asset: s.base_asset,
            quote_asset: s.quote_asset,
            price_precision: s.price_precision,
            quantity_precision: s.quantity_precision,
            order_types: s.order_types,
            contract_type: s.contract_type,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// REST catalog client for one Binance market.
#[derive(Debug, Clone)]
pub struct BinanceCatalogClient {
    client: Client,
    url: String,
    shape: CatalogShape,
}

impl BinanceCatalogClient {
    /// Create a client for `profile`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(profile: &FeedProfile, timeout: Duration) -> Result<Self, CatalogFetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogFetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: profile.catalog_url(),
            shape: profile.catalog_shape,
        })
    }

    async fn fetch<S>(&self) -> Result<Vec<InstrumentCatalogEntry>, CatalogFetchError>
    where
        S: for<'de> Deserialize<'de> + Into<InstrumentCatalogEntry>,
    {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CatalogFetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogFetchError::Status {
                status: status.as_u16(),
            });
        }

        let info: ExchangeInfo<S> = response
            .json()
            .await
            .map_err(|e| CatalogFetchError::Decode(e.to_string()))?;

        Ok(info.symbols.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl CatalogSource for BinanceCatalogClient {
    async fn fetch_catalog(&self) -> Result<Vec<InstrumentCatalogEntry>, CatalogFetchError> {
        match self.shape {
            CatalogShape::Spot => self.fetch::<SpotSymbol>().await,
            CatalogShape::CoinFutures => self.fetch::<CoinFuturesSymbol>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::Market;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(market: Market, server: &MockServer) -> BinanceCatalogClient {
        let profile = FeedProfile::for_market(market).with_rest_base_url(server.uri());
        BinanceCatalogClient::new(&profile, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn decodes_spot_exchange_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/exchangeInfo"))
            .and(query_param("showPermissionSets", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "timezone": "UTC",
                "symbols": [{
                    "symbol": "ETHBTC",
                    "status": "TRADING",
                    "baseAsset": "ETH",
                    "baseAssetPrecision": 8,
                    "quoteAsset": "BTC",
                    "quoteAssetPrecision": 6,
                    "orderTypes": ["LIMIT", "MARKET"]
                }]
            })))
            .mount(&server)
            .await;

        let catalog = client_for(Market::Spot, &server)
            .await
            .fetch_catalog()
            .await
            .unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].symbol, "ETHBTC");
        assert!(catalog[0].is_tradable());
        assert_eq!(catalog[0].price_precision, 6);
        assert_eq!(catalog[0].quantity_precision, 8);
        assert_eq!(catalog[0].contract_type, None);
    }

    #[tokio::test]
    async fn decodes_coin_futures_exchange_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dapi/v1/exchangeInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbols": [{
                    "symbol": "BTCUSD_PERP",
                    "pair": "BTCUSD",
                    "contractType": "PERPETUAL",
                    "contractStatus": "TRADING",
                    "pricePrecision": 1,
                    "quantityPrecision": 0,
                    "baseAsset": "BTC",
                    "quoteAsset": "USD",
                    "marginAsset": "BTC",
                    "orderTypes": ["LIMIT"]
                }, {
                    "symbol": "BTCUSD_200925",
                    "pair": "BTCUSD",
                    "contractType": "CURRENT_QUARTER",
                    "contractStatus": "DELIVERED",
                    "pricePrecision": 1,
                    "quantityPrecision": 0,
                    "baseAsset": "BTC",
                    "quoteAsset": "USD",
                    "marginAsset": "BTC",
                    "orderTypes": ["LIMIT"]
                }]
            })))
            .mount(&server)
            .await;

        let catalog = client_for(Market::CoinFutures, &server)
            .await
            .fetch_catalog()
            .await
            .unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].contract_type.as_deref(), Some("PERPETUAL"));
        assert!(catalog[0].is_tradable());
        assert_eq!(catalog[1].trading_status, TradingStatus::Delivered);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(418))
            .mount(&server)
            .await;

        let result = client_for(Market::Spot, &server).await.fetch_catalog().await;
        assert!(matches!(result, Err(CatalogFetchError::Status { status: 418 })));
    }

    #[tokio::test]
    async fn undecodable_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = client_for(Market::Spot, &server).await.fetch_catalog().await;
        assert!(matches!(result, Err(CatalogFetchError::Decode(_))));
    }
}
