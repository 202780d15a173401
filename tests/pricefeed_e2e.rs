use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use pricefeed::api::{LocalPriceFeedService, PriceFeedService};
use pricefeed::client::{DaemonConnector, PriceDaemon, SubTaskRunnerImpl};
use pricefeed::config::DaemonConfig;
use pricefeed::error::{Error, Result};
use pricefeed::interfaces::{MarketParamsPage, MarketParamsQueryClient, PageRequest, PriceFeedServiceClient};
use pricefeed::price_infra::aggregator::{MarketPriceValidation, MarketToExchangePrices};
use pricefeed::price_infra::connectors::{static_exchange_details, EXCHANGE_ID_BINANCE, EXCHANGE_ID_KRAKEN};
use pricefeed::price_infra::market_configs::MutableMarketConfigs;
use pricefeed::price_infra::query_handler::{HttpResponse, RequestHandler};
use pricefeed::types::exchange::ExchangeQueryConfig;
use pricefeed::types::ids::{ExchangeId, MarketId};
use pricefeed::types::market::MarketParam;
use pricefeed::types::price::MarketPriceTimestamp;
use pricefeed::types::timestamp::Timestamp;

const BTC_USD: MarketId = MarketId(0);
const ETH_USD: MarketId = MarketId(1);

fn market_param(id: MarketId, pair: &str, ticker: &str, min_exchanges: u32) -> MarketParam {
    MarketParam {
        id,
        pair: pair.to_string(),
        exponent: -5,
        min_exchanges,
        min_price_change_ppm: 50,
        exchange_config_json: format!(
            r#"{{"exchanges":[{{"exchangeName":"{}","ticker":"{}"}}]}}"#,
            EXCHANGE_ID_BINANCE, ticker
        ),
    }
}

#[test]
fn test_median_across_exchanges() {
    let prices = MarketToExchangePrices::new(Duration::from_secs(30));
    let t = Timestamp::from_millis(1_700_000_000_000);
    let exchange1 = ExchangeId::from("Exchange1");
    let exchange2 = ExchangeId::from("Exchange2");

    prices.update_price(&exchange1, MarketPriceTimestamp::new(BTC_USD, 1001, t));
    prices.update_price(&exchange2, MarketPriceTimestamp::new(BTC_USD, 2002, t));

    let validations = [MarketPriceValidation {
        market_id: BTC_USD,
        min_exchanges: 2,
        accepted_exchanges: HashSet::from([exchange1.clone(), exchange2.clone()]),
    }];

    let medians = prices.get_valid_median_prices(&validations, t);
    assert_eq!(medians.get(&BTC_USD), Some(&1502));

    // Still valid exactly at the age limit.
    let medians = prices.get_valid_median_prices(&validations, t + Duration::from_secs(30));
    assert_eq!(medians.get(&BTC_USD), Some(&1502));

    let medians = prices.get_valid_median_prices(&validations, t + Duration::from_secs(31));
    assert!(medians.is_empty());
}

#[test]
fn test_partial_market_update() {
    let configs = MutableMarketConfigs::new([ExchangeId::from(EXCHANGE_ID_BINANCE)]);
    let params = [
        market_param(BTC_USD, "BTC-USD", "BTCUSDT", 1),
        MarketParam {
            exchange_config_json: r#"{"exchanges":[{"exchangeName":"NotAnExchange","ticker":"ETHUSDT"}]}"#
                .to_string(),
            ..market_param(ETH_USD, "ETH-USD", "ETHUSDT", 1)
        },
    ];

    let errors = configs.update_markets(&params).unwrap();

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors.get(&ETH_USD), Some(Error::InvalidExchangeConfigJson { .. })));
    let exchange_config = configs
        .get_exchange_market_config(&ExchangeId::from(EXCHANGE_ID_BINANCE))
        .unwrap();
    assert_eq!(exchange_config.market_ids(), vec![BTC_USD]);
}

struct StaticParamsClient {
    params: Vec<MarketParam>,
}

#[async_trait]
impl MarketParamsQueryClient for StaticParamsClient {
    async fn all_market_params(&self, _request: PageRequest) -> Result<MarketParamsPage> {
        Ok(MarketParamsPage {
            market_params: self.params.clone(),
            next_key: None,
        })
    }
}

struct InProcessConnector {
    service: Arc<PriceFeedService>,
    params: Vec<MarketParam>,
}

#[async_trait]
impl DaemonConnector for InProcessConnector {
    async fn connect_price_feed(&self) -> Result<Arc<dyn PriceFeedServiceClient>> {
        Ok(Arc::new(LocalPriceFeedService::new(self.service.clone())))
    }

    async fn connect_market_params(&self) -> Result<Arc<dyn MarketParamsQueryClient>> {
        Ok(Arc::new(StaticParamsClient { params: self.params.clone() }))
    }
}

/// Answers every request with a fixed Binance ticker payload.
struct BinanceStub;

#[async_trait]
impl RequestHandler for BinanceStub {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        if !url.contains("BTCUSDT") {
            return Err(Error::ExchangeError(format!("unexpected url {}", url)));
        }
        Ok(HttpResponse {
            status: 200,
            body: r#"[{"symbol":"BTCUSDT","lastPrice":"50000","bidPrice":"49999","askPrice":"50001"}]"#
                .to_string(),
        })
    }
}

#[tokio::test]
async fn test_daemon_delivers_prices_to_service() {
    let service = Arc::new(PriceFeedService::new(Arc::new(MarketToExchangePrices::new(
        Duration::from_secs(30),
    ))));
    let connector = InProcessConnector {
        service: service.clone(),
        params: vec![market_param(BTC_USD, "BTC-USD", "BTCUSDT", 1)],
    };
    let config = DaemonConfig {
        price_updater_interval_ms: 20,
        market_param_updater_interval_ms: 10,
        exchanges: vec![ExchangeQueryConfig::new(EXCHANGE_ID_BINANCE, 10, 500, 1)],
        ..DaemonConfig::default()
    };
    let daemon = PriceDaemon::new(config, Arc::new(SubTaskRunnerImpl));

    daemon
        .start(&connector, &static_exchange_details(), Arc::new(BinanceStub))
        .await
        .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            // Health is reported right after the service accepts a batch.
            let price = service.prices().get_valid_median_price(BTC_USD, Timestamp::now());
            if let (Some(price), Ok(())) = (price, daemon.health_check()) {
                return price;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no price reached the price feed service");

    // 50000 at exponent -5.
    assert_eq!(delivered, 5_000_000_000);
    assert_eq!(daemon.prices().get_valid_median_price(BTC_USD, Timestamp::now()), Some(5_000_000_000));

    daemon.stop().await;
}

#[tokio::test]
async fn test_markets_listing_unqueried_exchanges_are_kept() {
    let service = Arc::new(PriceFeedService::new(Arc::new(MarketToExchangePrices::new(
        Duration::from_secs(30),
    ))));
    let btc_on_two_exchanges = MarketParam {
        exchange_config_json: format!(
            r#"{{"exchanges":[{{"exchangeName":"{}","ticker":"BTCUSDT"}},{{"exchangeName":"{}","ticker":"XXBTZUSD"}}]}}"#,
            EXCHANGE_ID_BINANCE, EXCHANGE_ID_KRAKEN
        ),
        ..market_param(BTC_USD, "BTC-USD", "BTCUSDT", 1)
    };
    let connector = InProcessConnector {
        service,
        params: vec![btc_on_two_exchanges],
    };
    // Only Binance is queried, Kraken is known but disabled.
    let config = DaemonConfig {
        market_param_updater_interval_ms: 10,
        exchanges: vec![ExchangeQueryConfig::new(EXCHANGE_ID_BINANCE, 10, 500, 1)],
        ..DaemonConfig::default()
    };
    let daemon = PriceDaemon::new(config, Arc::new(SubTaskRunnerImpl));

    daemon
        .start(&connector, &static_exchange_details(), Arc::new(BinanceStub))
        .await
        .unwrap();
    let configs = daemon.market_configs().unwrap();

    let markets = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let markets = configs
                .get_exchange_market_config(&ExchangeId::from(EXCHANGE_ID_BINANCE))
                .unwrap()
                .market_ids();
            if !markets.is_empty() {
                return markets;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("market params were never applied");

    assert_eq!(markets, vec![BTC_USD]);
    assert_eq!(configs.exchange_ids(), vec![ExchangeId::from(EXCHANGE_ID_BINANCE)]);

    daemon.stop().await;
}
