use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, Instrument};
use crate::error::{Error, Result};
use crate::health::HealthCheckable;
use crate::interfaces::PriceFeedServiceClient;
use crate::observability::{metrics, tracing::trace_price_updater};
use crate::price_infra::aggregator::MarketToExchangePrices;
use crate::types::ids::{ExchangeId, MarketId};
use crate::types::price::{ExchangePrice, MarketPriceTimestamp, MarketPriceUpdate, UpdateMarketPricesRequest};

/// Periodically forwards every cached per-exchange price downstream.
pub struct PriceUpdater {
    interval: Duration,
    prices: Arc<MarketToExchangePrices>,
    client: Arc<dyn PriceFeedServiceClient>,
    health: Arc<dyn HealthCheckable>,
}

impl PriceUpdater {
    pub fn new(
        interval: Duration,
        prices: Arc<MarketToExchangePrices>,
        client: Arc<dyn PriceFeedServiceClient>,
        health: Arc<dyn HealthCheckable>,
    ) -> Self {
        PriceUpdater {
            interval,
            prices,
            client,
            health,
        }
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        ticker.tick().await;

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = stop.changed() => {}
                _ = ticker.tick() => {
                    match self.run_task_loop().instrument(trace_price_updater()).await {
                        Ok(()) => self.health.report_success(),
                        Err(e) => self.health.report_failure(e),
                    }
                }
            }
        }
        info!("Price updater stopped");
    }

    /// Sends one snapshot of the cache. An empty snapshot is not sent and
    /// returns `Error::EmptyMarketPriceUpdate`.
    pub async fn run_task_loop(&self) -> Result<()> {
        let request = transform_price_updates(self.prices.get_all_prices());

        if request.is_empty() {
            // Expected right after startup, before the encoders have written anything.
            info!("Price update had length of 0");
            metrics::PRICE_UPDATER_ERRORS.with_label_values(&["zero_prices"]).inc();
            return Err(Error::EmptyMarketPriceUpdate);
        }

        let markets = request.market_price_updates.len();
        let started = Instant::now();
        let result = self.client.update_market_prices(request).await;
        metrics::PRICE_UPDATE_SEND_LATENCY.observe(started.elapsed().as_secs_f64());

        match result {
            Ok(_) => {
                metrics::PRICE_UPDATES_SENT.inc();
                metrics::PRICE_UPDATE_MARKETS.set(markets as i64);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to run price updater task loop for price daemon");
                metrics::PRICE_UPDATER_ERRORS.with_label_values(&["rpc"]).inc();
                Err(e)
            }
        }
    }
}

/// Regroups per-exchange prices into one update per market, ordered by market
/// id and, within a market, by exchange id.
pub fn transform_price_updates(
    updates: BTreeMap<ExchangeId, Vec<MarketPriceTimestamp>>,
) -> UpdateMarketPricesRequest {
    let mut by_market: BTreeMap<MarketId, Vec<ExchangePrice>> = BTreeMap::new();

    for (exchange_id, prices) in updates {
        for price in prices {
            by_market.entry(price.market_id).or_default().push(ExchangePrice {
                exchange_id: exchange_id.clone(),
                price: price.price,
                last_update_time: price.last_update_time,
            });
        }
    }

    UpdateMarketPricesRequest {
        market_price_updates: by_market
            .into_iter()
            .map(|(market_id, exchange_prices)| MarketPriceUpdate {
                market_id,
                exchange_prices,
            })
            .collect(),
    }
}
