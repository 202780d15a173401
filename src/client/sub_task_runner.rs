use async_trait::async_trait;
use tokio::sync::watch;
use crate::client::market_param_updater::MarketParamUpdater;
use crate::client::price_updater::PriceUpdater;
use crate::price_infra::encoder::PriceEncoder;
use crate::price_infra::fetcher::PriceFetcher;

/// Runs the daemon's long-lived workers. Each method returns when its worker
/// exits: loops on `stop`, encoders when their queue closes.
#[async_trait]
pub trait SubTaskRunner: Send + Sync {
    async fn start_price_updater(&self, updater: PriceUpdater, stop: watch::Receiver<bool>);

    async fn start_price_encoder(&self, encoder: PriceEncoder);

    async fn start_price_fetcher(&self, fetcher: PriceFetcher, stop: watch::Receiver<bool>);

    async fn start_market_param_updater(&self, updater: MarketParamUpdater, stop: watch::Receiver<bool>);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SubTaskRunnerImpl;

#[async_trait]
impl SubTaskRunner for SubTaskRunnerImpl {
    async fn start_price_updater(&self, updater: PriceUpdater, stop: watch::Receiver<bool>) {
        updater.run(stop).await;
    }

    async fn start_price_encoder(&self, encoder: PriceEncoder) {
        encoder.run().await;
    }

    async fn start_price_fetcher(&self, fetcher: PriceFetcher, stop: watch::Receiver<bool>) {
        fetcher.run(stop).await;
    }

    async fn start_market_param_updater(&self, updater: MarketParamUpdater, stop: watch::Receiver<bool>) {
        updater.run(stop).await;
    }
}
