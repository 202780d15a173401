use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, Instrument};
use crate::client::connections::all_paginated_market_params;
use crate::error::Result;
use crate::health::HealthCheckable;
use crate::interfaces::MarketParamsQueryClient;
use crate::observability::{metrics, tracing::trace_market_param_updater};
use crate::price_infra::market_configs::MutableMarketConfigs;

/// Periodically reloads market params and applies them to the fetcher configs.
pub struct MarketParamUpdater {
    interval: Duration,
    configs: Arc<MutableMarketConfigs>,
    client: Arc<dyn MarketParamsQueryClient>,
    startup_grace_period: Duration,
    health: Arc<dyn HealthCheckable>,
}

impl MarketParamUpdater {
    pub fn new(
        interval: Duration,
        configs: Arc<MutableMarketConfigs>,
        client: Arc<dyn MarketParamsQueryClient>,
        startup_grace_period: Duration,
        health: Arc<dyn HealthCheckable>,
    ) -> Self {
        MarketParamUpdater {
            interval,
            configs,
            client,
            startup_grace_period,
            health,
        }
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let started_at = Instant::now();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = stop.changed() => {}
                _ = ticker.tick() => {
                    let is_past_grace_period = started_at.elapsed() >= self.startup_grace_period;
                    match self.run_task_loop(is_past_grace_period).instrument(trace_market_param_updater()).await {
                        Ok(()) => self.health.report_success(),
                        Err(e) => self.health.report_failure(e),
                    }
                }
            }
        }
        info!("Market param updater stopped");
    }

    /// Fetches all market params and applies them. Invalid markets are logged
    /// and skipped; only a failed query or a rejected batch is an error.
    pub async fn run_task_loop(&self, is_past_grace_period: bool) -> Result<()> {
        let market_params = match all_paginated_market_params(self.client.as_ref()).await {
            Ok(params) => params,
            Err(e) => {
                // The params service usually becomes available some time after the daemon starts.
                if is_past_grace_period {
                    error!(error = %e, "Failed to get all market params");
                } else {
                    info!(error = %e, "Failed to get all market params");
                }
                metrics::MARKET_PARAM_REFRESHES.with_label_values(&["query_error"]).inc();
                return Err(e);
            }
        };

        match self.configs.update_markets(&market_params) {
            Ok(market_param_errors) => {
                metrics::MARKET_PARAM_REFRESHES.with_label_values(&["success"]).inc();
                if !market_param_errors.is_empty() {
                    metrics::INVALID_MARKET_PARAMS.inc_by(market_param_errors.len() as u64);
                    for (market_id, e) in &market_param_errors {
                        error!(market_id = %market_id, error = %e, "Failed to apply market update");
                    }
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to apply all market updates");
                metrics::MARKET_PARAM_REFRESHES.with_label_values(&["update_error"]).inc();
                Err(e)
            }
        }
    }
}
