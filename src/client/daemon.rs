use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, OnceCell};
use tracing::{error, info};
use crate::client::connections::DaemonConnector;
use crate::client::market_param_updater::MarketParamUpdater;
use crate::client::price_updater::PriceUpdater;
use crate::client::sub_task_runner::SubTaskRunner;
use crate::config::DaemonConfig;
use crate::error::{Error, Result};
use crate::health::{HealthCheckable, TimeBoundedHealthChecker};
use crate::price_infra::aggregator::MarketToExchangePrices;
use crate::price_infra::encoder::PriceEncoder;
use crate::price_infra::fetcher::PriceFetcher;
use crate::price_infra::market_configs::MutableMarketConfigs;
use crate::price_infra::query_handler::{ExchangeQueryHandler, ExchangeQueryHandlerImpl, RequestHandler};
use crate::types::exchange::ExchangeQueryDetails;
use crate::types::ids::ExchangeId;
use crate::utils::task_supervisor::TaskSupervisor;

pub const PRICE_DAEMON_SERVICE_NAME: &str = "pricefeed-daemon";
pub const MARKET_PARAM_UPDATER_SERVICE_NAME: &str = "pricefeed-market-param-updater";

/// A subtask is unhealthy once it has gone this long without a success.
pub const MAX_ACCEPTABLE_UPDATE_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DaemonState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Owns the price daemon's workers: one fetcher and one encoder per exchange,
/// the market param updater and the price updater.
///
/// `start` connects to both services before spawning anything. `stop` can be
/// called at any time and from any number of callers; it waits for startup to
/// finish, signals every worker and returns once all of them have exited.
pub struct PriceDaemon {
    config: DaemonConfig,
    sub_task_runner: Arc<dyn SubTaskRunner>,
    prices: Arc<MarketToExchangePrices>,
    state: Mutex<DaemonState>,
    // Reflects the price updater, the daemon's end-to-end output.
    health: Arc<TimeBoundedHealthChecker>,
    market_param_updater_health: Arc<TimeBoundedHealthChecker>,
    fetcher_health: Mutex<Vec<Arc<TimeBoundedHealthChecker>>>,
    market_configs: Mutex<Option<Arc<MutableMarketConfigs>>>,
    supervisor: tokio::sync::Mutex<TaskSupervisor>,
    stop_tx: watch::Sender<bool>,
    startup_done: watch::Sender<bool>,
    stopped: OnceCell<()>,
}

impl PriceDaemon {
    pub fn new(config: DaemonConfig, sub_task_runner: Arc<dyn SubTaskRunner>) -> Self {
        let prices = Arc::new(MarketToExchangePrices::new(config.max_price_age()));
        let (stop_tx, _) = watch::channel(false);
        let (startup_done, _) = watch::channel(false);

        PriceDaemon {
            config,
            sub_task_runner,
            prices,
            state: Mutex::new(DaemonState::Created),
            health: Arc::new(TimeBoundedHealthChecker::new(PRICE_DAEMON_SERVICE_NAME, MAX_ACCEPTABLE_UPDATE_DELAY)),
            market_param_updater_health: Arc::new(TimeBoundedHealthChecker::new(
                MARKET_PARAM_UPDATER_SERVICE_NAME,
                MAX_ACCEPTABLE_UPDATE_DELAY,
            )),
            fetcher_health: Mutex::new(Vec::new()),
            market_configs: Mutex::new(None),
            supervisor: tokio::sync::Mutex::new(TaskSupervisor::new()),
            stop_tx,
            startup_done,
            stopped: OnceCell::new(),
        }
    }

    pub fn state(&self) -> DaemonState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: DaemonState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn prices(&self) -> Arc<MarketToExchangePrices> {
        self.prices.clone()
    }

    /// Available once startup has created them.
    pub fn market_configs(&self) -> Option<Arc<MutableMarketConfigs>> {
        self.market_configs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Health of the daemon as a whole, driven by the price updater.
    pub fn health_check(&self) -> Result<()> {
        self.health.health_check()
    }

    /// Every health checkable the daemon owns, for registration with the monitor.
    pub fn health_checkables(&self) -> Vec<Arc<dyn HealthCheckable>> {
        let mut checkables: Vec<Arc<dyn HealthCheckable>> = vec![
            self.health.clone(),
            self.market_param_updater_health.clone(),
        ];
        let fetchers = self.fetcher_health.lock().unwrap_or_else(PoisonError::into_inner);
        checkables.extend(fetchers.iter().map(|h| h.clone() as Arc<dyn HealthCheckable>));
        checkables
    }

    /// Connects, validates the exchange configuration and spawns every worker.
    /// On error nothing is left running.
    pub async fn start(
        &self,
        connector: &dyn DaemonConnector,
        exchange_details: &HashMap<ExchangeId, ExchangeQueryDetails>,
        request_handler: Arc<dyn RequestHandler>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                DaemonState::Created => *state = DaemonState::Starting,
                DaemonState::Stopping | DaemonState::Stopped => return Err(Error::DaemonStopped),
                DaemonState::Starting | DaemonState::Running => return Err(Error::AlreadyStarted),
            }
        }

        let result = self.start_sub_tasks(connector, exchange_details, request_handler).await;
        match &result {
            Ok(()) => {
                self.set_state(DaemonState::Running);
                info!(exchanges = self.config.exchanges.len(), "Price daemon started");
            }
            Err(e) => {
                error!(error = %e, "Failed to start price daemon");
                self.stop_tx.send_replace(true);
                self.supervisor.lock().await.wait_all().await;
                self.set_state(DaemonState::Stopped);
            }
        }
        // Released on every path so that a pending stop can proceed.
        self.startup_done.send_replace(true);
        result
    }

    fn validate_config(&self, exchange_details: &HashMap<ExchangeId, ExchangeQueryDetails>) -> Result<()> {
        self.config.validate()?;
        if self.config.exchanges.is_empty() {
            return Err(Error::NoExchanges);
        }
        let mut seen = HashSet::with_capacity(self.config.exchanges.len());
        for exchange in &self.config.exchanges {
            if !seen.insert(&exchange.exchange_id) {
                return Err(Error::DuplicateExchangeId(exchange.exchange_id.clone()));
            }
            if !exchange_details.contains_key(&exchange.exchange_id) {
                return Err(Error::MissingExchangeDetails(exchange.exchange_id.clone()));
            }
        }
        Ok(())
    }

    async fn start_sub_tasks(
        &self,
        connector: &dyn DaemonConnector,
        exchange_details: &HashMap<ExchangeId, ExchangeQueryDetails>,
        request_handler: Arc<dyn RequestHandler>,
    ) -> Result<()> {
        let price_feed_client = connector.connect_price_feed().await?;
        let market_params_client = connector.connect_market_params().await?;

        self.validate_config(exchange_details)?;

        // Markets may list any exchange this build supports, not only the queried ones.
        let configs = Arc::new(MutableMarketConfigs::with_known_exchanges(
            self.config.exchanges.iter().map(|e| e.exchange_id.clone()),
            exchange_details.keys().cloned(),
        ));
        *self.market_configs.lock().unwrap_or_else(PoisonError::into_inner) = Some(configs.clone());

        let query_handler: Arc<dyn ExchangeQueryHandler> =
            Arc::new(ExchangeQueryHandlerImpl::new(request_handler, self.prices.clone()));
        let mut supervisor = self.supervisor.lock().await;

        for query_config in &self.config.exchanges {
            let exchange_id = query_config.exchange_id.clone();
            let details = exchange_details
                .get(&exchange_id)
                .cloned()
                .ok_or_else(|| Error::MissingExchangeDetails(exchange_id.clone()))?;

            let (sender, receiver) = mpsc::channel(self.config.buffer_size);
            let health = Arc::new(TimeBoundedHealthChecker::new(
                format!("pricefeed-fetcher-{}", exchange_id),
                MAX_ACCEPTABLE_UPDATE_DELAY,
            ));
            self.fetcher_health
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(health.clone());

            let fetcher = PriceFetcher::new(
                query_config.clone(),
                details,
                query_handler.clone(),
                configs.subscribe(&exchange_id)?,
                sender,
                health,
            );
            let encoder = PriceEncoder::new(exchange_id.clone(), self.prices.clone(), receiver);

            let runner = self.sub_task_runner.clone();
            supervisor.spawn(format!("price_encoder_{}", exchange_id), async move {
                runner.start_price_encoder(encoder).await;
            });
            let runner = self.sub_task_runner.clone();
            let stop = self.stop_tx.subscribe();
            supervisor.spawn(format!("price_fetcher_{}", exchange_id), async move {
                runner.start_price_fetcher(fetcher, stop).await;
            });
        }

        let market_param_updater = MarketParamUpdater::new(
            self.config.market_param_updater_interval(),
            configs,
            market_params_client,
            self.config.startup_grace_period(),
            self.market_param_updater_health.clone(),
        );
        let runner = self.sub_task_runner.clone();
        let stop = self.stop_tx.subscribe();
        supervisor.spawn("market_param_updater", async move {
            runner.start_market_param_updater(market_param_updater, stop).await;
        });

        let price_updater = PriceUpdater::new(
            self.config.price_updater_interval(),
            self.prices.clone(),
            price_feed_client,
            self.health.clone(),
        );
        let runner = self.sub_task_runner.clone();
        let stop = self.stop_tx.subscribe();
        supervisor.spawn("price_updater", async move {
            runner.start_price_updater(price_updater, stop).await;
        });

        Ok(())
    }

    /// Idempotent. Waits for an in-flight start, then for every worker to exit.
    pub async fn stop(&self) {
        self.stopped.get_or_init(|| self.shutdown()).await;
    }

    async fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == DaemonState::Created {
                *state = DaemonState::Stopped;
                self.startup_done.send_replace(true);
                return;
            }
        }

        let mut startup_done = self.startup_done.subscribe();
        while !*startup_done.borrow_and_update() {
            if startup_done.changed().await.is_err() {
                break;
            }
        }

        if self.state() == DaemonState::Stopped {
            return;
        }
        self.set_state(DaemonState::Stopping);
        info!("Stopping price daemon");

        self.stop_tx.send_replace(true);
        let failures = self.supervisor.lock().await.wait_all().await;
        for failure in failures {
            error!(error = %failure, "Price daemon worker failed");
        }

        self.set_state(DaemonState::Stopped);
        info!("Price daemon stopped");
    }
}
