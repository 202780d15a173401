use std::sync::Arc;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};
use crate::error::{Error, Result};
use crate::interfaces::PriceFeedServiceClient;
use crate::observability::metrics;
use crate::price_infra::aggregator::{MarketPriceValidation, MarketToExchangePrices};
use crate::types::ids::MarketId;
use crate::types::market::MarketParam;
use crate::types::price::{UpdateMarketPricesRequest, UpdateMarketPricesResponse};
use crate::types::timestamp::Timestamp;

/// Consensus-facing side of the price feed: accepts the daemon's batches into
/// its own price cache.
pub struct PriceFeedService {
    prices: Arc<MarketToExchangePrices>,
}

impl PriceFeedService {
    pub fn new(prices: Arc<MarketToExchangePrices>) -> Self {
        PriceFeedService { prices }
    }

    pub fn prices(&self) -> &Arc<MarketToExchangePrices> {
        &self.prices
    }

    pub fn update_market_prices(&self, request: &UpdateMarketPricesRequest) -> Result<UpdateMarketPricesResponse> {
        if request.is_empty() {
            return Err(Error::EmptyMarketPriceUpdate);
        }
        self.prices.update_prices(&request.market_price_updates);
        metrics::SERVICE_MARKET_PRICES_RECEIVED.inc_by(request.market_price_updates.len() as u64);
        debug!(markets = request.market_price_updates.len(), "Applied market price updates");
        Ok(UpdateMarketPricesResponse {})
    }

    /// Median of the valid prices of each market, judged at `read_time`
    /// against the exchanges its params accept. Markets whose exchange config
    /// cannot be parsed are skipped.
    pub fn get_valid_median_prices(&self, market_params: &[MarketParam], read_time: Timestamp) -> HashMap<MarketId, u64> {
        let validations: Vec<MarketPriceValidation> = market_params
            .iter()
            .filter_map(|param| match MarketPriceValidation::from_market_param(param) {
                Ok(validation) => Some(validation),
                Err(e) => {
                    warn!(market_id = %param.id, error = %e, "Skipping market with invalid exchange config");
                    None
                }
            })
            .collect();
        self.prices.get_valid_median_prices(&validations, read_time)
    }
}

/// In-process client for a `PriceFeedService`.
#[derive(Clone)]
pub struct LocalPriceFeedService {
    service: Arc<PriceFeedService>,
}

impl LocalPriceFeedService {
    pub fn new(service: Arc<PriceFeedService>) -> Self {
        LocalPriceFeedService { service }
    }
}

#[async_trait]
impl PriceFeedServiceClient for LocalPriceFeedService {
    async fn update_market_prices(&self, request: UpdateMarketPricesRequest) -> Result<UpdateMarketPricesResponse> {
        self.service.update_market_prices(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::types::ids::ExchangeId;
    use crate::types::price::{ExchangePrice, MarketPriceTimestamp, MarketPriceUpdate};

    #[tokio::test]
    async fn test_rejects_empty_batch() {
        let service = Arc::new(PriceFeedService::new(Arc::new(MarketToExchangePrices::new(Duration::from_secs(30)))));
        let client = LocalPriceFeedService::new(service);

        assert_eq!(
            client.update_market_prices(UpdateMarketPricesRequest::default()).await,
            Err(Error::EmptyMarketPriceUpdate)
        );
    }

    #[tokio::test]
    async fn test_applies_batch() {
        let prices = Arc::new(MarketToExchangePrices::new(Duration::from_secs(30)));
        let client = LocalPriceFeedService::new(Arc::new(PriceFeedService::new(prices.clone())));

        client
            .update_market_prices(UpdateMarketPricesRequest {
                market_price_updates: vec![MarketPriceUpdate {
                    market_id: MarketId(0),
                    exchange_prices: vec![ExchangePrice {
                        exchange_id: ExchangeId::from("Binance"),
                        price: 42,
                        last_update_time: Timestamp(1_000),
                    }],
                }],
            })
            .await
            .unwrap();

        assert_eq!(prices.get_all_prices()[&ExchangeId::from("Binance")][0].price, 42);
    }

    fn param(id: u32, min_exchanges: u32, json: &str) -> MarketParam {
        MarketParam {
            id: MarketId(id),
            pair: format!("M{}-USD", id),
            exponent: -5,
            min_exchanges,
            min_price_change_ppm: 50,
            exchange_config_json: json.to_string(),
        }
    }

    #[test]
    fn test_get_valid_median_prices() {
        let prices = Arc::new(MarketToExchangePrices::new(Duration::from_secs(30)));
        let service = PriceFeedService::new(prices.clone());
        let t = Timestamp(1_000_000);
        for (exchange, price) in [("Binance", 1001), ("Kraken", 2002), ("CoinbasePro", 9999)] {
            prices.update_price(
                &ExchangeId::from(exchange),
                MarketPriceTimestamp::new(MarketId(0), price, t),
            );
        }
        let two_exchanges = r#"{"exchanges":[{"exchangeName":"Binance","ticker":"A"},{"exchangeName":"Kraken","ticker":"B"}]}"#;

        let medians = service.get_valid_median_prices(
            &[param(0, 2, two_exchanges), param(1, 1, two_exchanges), param(2, 1, "not json")],
            t,
        );

        // CoinbasePro is not accepted for market 0; markets 1 and 2 have no usable prices.
        assert_eq!(medians, HashMap::from([(MarketId(0), 1502)]));
        assert!(service
            .get_valid_median_prices(&[param(0, 3, two_exchanges)], t)
            .is_empty());
    }
}
