use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tracing::{debug, info};
use crate::error::{Error, Result};
use crate::interfaces::{MarketParamsPage, MarketParamsQueryClient, PageRequest, PriceFeedServiceClient};
use crate::types::market::MarketParam;
use crate::types::price::{UpdateMarketPricesRequest, UpdateMarketPricesResponse};

pub const MARKET_PRICES_PATH: &str = "/v1/market_prices";
pub const MARKET_PARAMS_PATH: &str = "/v1/market_params";
pub const HEALTH_PATH: &str = "/v1/health";
pub const MEDIAN_PRICES_PATH: &str = "/v1/median_prices";

/// Opens the daemon's outbound connections. Startup aborts if either fails.
#[async_trait]
pub trait DaemonConnector: Send + Sync {
    async fn connect_price_feed(&self) -> Result<Arc<dyn PriceFeedServiceClient>>;

    async fn connect_market_params(&self) -> Result<Arc<dyn MarketParamsQueryClient>>;
}

pub struct HttpDaemonConnector {
    price_feed_address: String,
    market_params_address: String,
    request_timeout: Duration,
}

impl HttpDaemonConnector {
    pub fn new(
        price_feed_address: impl Into<String>,
        market_params_address: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        HttpDaemonConnector {
            price_feed_address: price_feed_address.into(),
            market_params_address: market_params_address.into(),
            request_timeout,
        }
    }

    fn build_client(&self, target: &str) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| Error::ConnectionFailed {
                target: target.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl DaemonConnector for HttpDaemonConnector {
    /// The price feed service must be reachable before any worker starts.
    async fn connect_price_feed(&self) -> Result<Arc<dyn PriceFeedServiceClient>> {
        let base_url = self.price_feed_address.trim_end_matches('/').to_string();
        let client = self.build_client(&base_url)?;

        let connection_failed = |reason: String| Error::ConnectionFailed {
            target: base_url.clone(),
            reason,
        };
        let response = client
            .get(format!("{}{}", base_url, HEALTH_PATH))
            .send()
            .await
            .map_err(|e| connection_failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(connection_failed(format!("health probe returned {}", response.status())));
        }

        info!(address = %base_url, "Connected to price feed service");
        Ok(Arc::new(HttpPriceFeedClient { client, base_url }))
    }

    /// The market params service commonly comes up after the daemon, so this
    /// does not probe it. Refresh failures are handled by the refresher.
    async fn connect_market_params(&self) -> Result<Arc<dyn MarketParamsQueryClient>> {
        let base_url = self.market_params_address.trim_end_matches('/').to_string();
        let client = self.build_client(&base_url)?;
        Ok(Arc::new(HttpMarketParamsClient { client, base_url }))
    }
}

pub struct HttpPriceFeedClient {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl PriceFeedServiceClient for HttpPriceFeedClient {
    async fn update_market_prices(&self, request: UpdateMarketPricesRequest) -> Result<UpdateMarketPricesResponse> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, MARKET_PRICES_PATH))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::RpcError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RpcError(format!("price feed service returned {}: {}", status, body)));
        }
        response
            .json()
            .await
            .map_err(|e| Error::RpcError(e.to_string()))
    }
}

pub struct HttpMarketParamsClient {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl MarketParamsQueryClient for HttpMarketParamsClient {
    async fn all_market_params(&self, request: PageRequest) -> Result<MarketParamsPage> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, MARKET_PARAMS_PATH))
            .query(&request)
            .send()
            .await
            .map_err(|e| Error::RpcError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::RpcError(format!("market params service returned {}", status)));
        }
        response
            .json()
            .await
            .map_err(|e| Error::RpcError(e.to_string()))
    }
}

/// Follows `next_key` until the last page and returns every market param.
pub async fn all_paginated_market_params(client: &dyn MarketParamsQueryClient) -> Result<Vec<MarketParam>> {
    let mut market_params = Vec::new();
    let mut request = PageRequest::default();
    let mut seen_keys = HashSet::new();

    loop {
        let page = client.all_market_params(request.clone()).await?;
        debug!(count = page.market_params.len(), "Fetched market params page");
        let next_key = page.next_page().map(str::to_string);
        market_params.extend(page.market_params);

        match next_key {
            Some(key) if !seen_keys.insert(key.clone()) => {
                return Err(Error::RpcError(format!("market params pagination repeated key {}", key)));
            }
            Some(key) => request.key = Some(key),
            None => return Ok(market_params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use crate::types::ids::MarketId;

    struct PagedClient {
        pages: Vec<MarketParamsPage>,
        requests: Mutex<Vec<PageRequest>>,
    }

    #[async_trait]
    impl MarketParamsQueryClient for PagedClient {
        async fn all_market_params(&self, request: PageRequest) -> Result<MarketParamsPage> {
            let mut requests = self.requests.lock().unwrap();
            let page = self.pages[requests.len()].clone();
            requests.push(request);
            Ok(page)
        }
    }

    fn param(id: u32) -> MarketParam {
        MarketParam {
            id: MarketId(id),
            pair: format!("M{}-USD", id),
            exponent: -5,
            min_exchanges: 1,
            min_price_change_ppm: 50,
            exchange_config_json: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_all_paginated_market_params() {
        let client = PagedClient {
            pages: vec![
                MarketParamsPage { market_params: vec![param(0), param(1)], next_key: Some("k1".into()) },
                MarketParamsPage { market_params: vec![param(2)], next_key: Some(String::new()) },
            ],
            requests: Mutex::new(Vec::new()),
        };

        let params = all_paginated_market_params(&client).await.unwrap();

        assert_eq!(params.iter().map(|p| p.id).collect::<Vec<_>>(), vec![MarketId(0), MarketId(1), MarketId(2)]);
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].key, None);
        assert_eq!(requests[1].key.as_deref(), Some("k1"));
    }

    #[tokio::test]
    async fn test_all_paginated_market_params_repeated_key() {
        let looping = MarketParamsPage { market_params: vec![param(0)], next_key: Some("k1".into()) };
        let client = PagedClient {
            pages: vec![looping.clone(), looping.clone(), looping],
            requests: Mutex::new(Vec::new()),
        };

        assert!(matches!(
            all_paginated_market_params(&client).await,
            Err(Error::RpcError(_))
        ));
        assert_eq!(client.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_price_feed_unreachable() {
        // Nothing listens on port 9 (discard) in the test environment.
        let connector = HttpDaemonConnector::new("http://127.0.0.1:9", "http://127.0.0.1:9", Duration::from_millis(200));
        assert!(matches!(
            connector.connect_price_feed().await,
            Err(Error::ConnectionFailed { .. })
        ));
        assert!(connector.connect_market_params().await.is_ok());
    }
}
