use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use crate::error::{Error, Result};
use crate::price_infra::aggregator::MarketToExchangePrices;
use crate::price_infra::connectors::{from_fixed_point, invert, to_fixed_point};
use crate::types::exchange::ExchangeQueryDetails;
use crate::types::ids::MarketId;
use crate::types::market::{MutableExchangeMarketConfig, MutableMarketConfig};
use crate::types::price::MarketPriceTimestamp;
use crate::types::timestamp::Timestamp;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Issues a single HTTP GET.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

pub struct ReqwestRequestHandler {
    client: reqwest::Client,
}

impl ReqwestRequestHandler {
    pub fn new(max_connections_per_host: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(max_connections_per_host)
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build http client: {}", e)))?;
        Ok(ReqwestRequestHandler { client })
    }
}

#[async_trait]
impl RequestHandler for ReqwestRequestHandler {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                return Error::ConnectionReset(e.to_string());
            }
        }
        source = err.source();
    }
    Error::ExchangeError(e.to_string())
}

/// Result of one exchange query: prices for every market that resolved, and
/// a per-market error for every market that did not.
#[derive(Debug, Default)]
pub struct QueryOutput {
    pub prices: Vec<MarketPriceTimestamp>,
    pub unavailable_markets: HashMap<MarketId, Error>,
}

/// Queries an exchange for a set of markets.
#[async_trait]
pub trait ExchangeQueryHandler: Send + Sync {
    async fn query(
        &self,
        details: &ExchangeQueryDetails,
        exchange_config: &MutableExchangeMarketConfig,
        market_ids: &[MarketId],
        market_configs: &HashMap<MarketId, MutableMarketConfig>,
    ) -> Result<QueryOutput>;
}

pub struct ExchangeQueryHandlerImpl {
    request_handler: Arc<dyn RequestHandler>,
    // Source of the prices used for adjust-by-market conversions.
    adjustment_prices: Arc<MarketToExchangePrices>,
}

impl ExchangeQueryHandlerImpl {
    pub fn new(
        request_handler: Arc<dyn RequestHandler>,
        adjustment_prices: Arc<MarketToExchangePrices>,
    ) -> Self {
        ExchangeQueryHandlerImpl {
            request_handler,
            adjustment_prices,
        }
    }

    fn convert_price(
        &self,
        market_id: MarketId,
        raw: rust_decimal::Decimal,
        invert_price: bool,
        adjust_by_market: Option<MarketId>,
        market_configs: &HashMap<MarketId, MutableMarketConfig>,
        now: Timestamp,
    ) -> Result<u64> {
        let exponent = market_configs
            .get(&market_id)
            .map(|c| c.exponent)
            .ok_or(Error::UnknownMarket(market_id))?;

        let mut price = if invert_price { invert(raw)? } else { raw };

        if let Some(adjust_market) = adjust_by_market {
            let adjust_exponent = market_configs
                .get(&adjust_market)
                .map(|c| c.exponent)
                .ok_or(Error::UnknownMarket(adjust_market))?;
            let adjust_price = self
                .adjustment_prices
                .get_valid_median_price(adjust_market, now)
                .ok_or_else(|| Error::MarketUnavailable {
                    market_id,
                    reason: format!("price for adjustment market {} is not available", adjust_market),
                })?;
            let adjust_price = from_fixed_point(adjust_price, adjust_exponent)?;
            price = price.checked_mul(adjust_price).ok_or_else(|| Error::Overflow {
                operation: format!("adjust market {} by market {}", market_id, adjust_market),
            })?;
        }

        to_fixed_point(price, exponent)
    }
}

#[async_trait]
impl ExchangeQueryHandler for ExchangeQueryHandlerImpl {
    async fn query(
        &self,
        details: &ExchangeQueryDetails,
        exchange_config: &MutableExchangeMarketConfig,
        market_ids: &[MarketId],
        market_configs: &HashMap<MarketId, MutableMarketConfig>,
    ) -> Result<QueryOutput> {
        if market_ids.is_empty() {
            return Ok(QueryOutput::default());
        }

        let mut ticker_to_market = HashMap::with_capacity(market_ids.len());
        let mut tickers = Vec::with_capacity(market_ids.len());
        for market_id in market_ids {
            let config = exchange_config
                .market_to_market_config
                .get(market_id)
                .ok_or(Error::UnknownMarket(*market_id))?;
            ticker_to_market.insert(config.ticker.clone(), (*market_id, config));
            tickers.push(config.ticker.clone());
        }

        let substitution = if details.is_multi_market {
            details.price_function.format_tickers(&tickers)
        } else {
            tickers[0].clone()
        };
        let url = details.url.replace('$', &substitution);

        let response = self.request_handler.get(&url).await?;
        if response.status >= 500 {
            return Err(Error::ExchangeServerError { status: response.status });
        }
        if response.status != 200 {
            return Err(Error::UnexpectedStatus(response.status));
        }

        let parsed = details.price_function.parse(&response.body, &tickers)?;
        let now = Timestamp::now();

        let mut output = QueryOutput::default();
        for (ticker, raw_price) in parsed.ticker_to_price {
            let Some((market_id, config)) = ticker_to_market.get(&ticker) else {
                continue;
            };
            match self.convert_price(
                *market_id,
                raw_price,
                config.invert,
                config.adjust_by_market,
                market_configs,
                now,
            ) {
                Ok(price) => output.prices.push(MarketPriceTimestamp::new(*market_id, price, now)),
                Err(e) => {
                    output.unavailable_markets.insert(*market_id, e);
                }
            }
        }
        for (ticker, reason) in parsed.unavailable_tickers {
            if let Some((market_id, _)) = ticker_to_market.get(&ticker) {
                output.unavailable_markets.insert(
                    *market_id,
                    Error::MarketUnavailable {
                        market_id: *market_id,
                        reason,
                    },
                );
            }
        }

        Ok(output)
    }
}
