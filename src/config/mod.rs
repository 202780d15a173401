use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::price_infra::connectors::{EXCHANGE_ID_BINANCE, EXCHANGE_ID_COINBASE_PRO, EXCHANGE_ID_KRAKEN};
use crate::types::exchange::ExchangeQueryConfig;

pub mod loader;

pub use loader::AppConfig;

/// Capacity of each fetcher to encoder queue.
pub const DEFAULT_BUFFER_SIZE: usize = 5120;

/// Observations older than this are excluded from medians.
pub const DEFAULT_MAX_PRICE_AGE_MS: u64 = 30_000;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Base url of the price feed service receiving price updates.
    pub price_feed_address: String,
    /// Base url of the market params query service.
    pub market_params_address: String,
    pub price_updater_interval_ms: u64,
    pub market_param_updater_interval_ms: u64,
    pub buffer_size: usize,
    pub max_price_age_ms: u64,
    /// Market param refresh failures are expected while the chain starts up
    /// and are logged at info level for this long.
    pub startup_grace_period_ms: u64,
    pub max_connections_per_host: usize,
    pub exchanges: Vec<ExchangeQueryConfig>,
}

impl DaemonConfig {
    pub fn price_updater_interval(&self) -> Duration {
        Duration::from_millis(self.price_updater_interval_ms)
    }

    pub fn market_param_updater_interval(&self) -> Duration {
        Duration::from_millis(self.market_param_updater_interval_ms)
    }

    pub fn max_price_age(&self) -> Duration {
        Duration::from_millis(self.max_price_age_ms)
    }

    pub fn startup_grace_period(&self) -> Duration {
        Duration::from_millis(self.startup_grace_period_ms)
    }

    /// Rejects values that would make a channel or ticker panic.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::ConfigError("daemon.buffer_size must be positive".to_string()));
        }
        if self.price_updater_interval_ms == 0 || self.market_param_updater_interval_ms == 0 {
            return Err(Error::ConfigError("daemon update intervals must be positive".to_string()));
        }
        for exchange in &self.exchanges {
            if exchange.interval_ms == 0 || exchange.timeout_ms == 0 || exchange.max_queries == 0 {
                return Err(Error::ConfigError(format!(
                    "exchange {} needs a positive interval, timeout and max queries",
                    exchange.exchange_id
                )));
            }
        }
        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            price_feed_address: "http://127.0.0.1:8090".to_string(),
            market_params_address: "http://127.0.0.1:1317".to_string(),
            price_updater_interval_ms: 3_000,
            market_param_updater_interval_ms: 10_000,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_price_age_ms: DEFAULT_MAX_PRICE_AGE_MS,
            startup_grace_period_ms: 60_000,
            max_connections_per_host: 32,
            exchanges: vec![
                ExchangeQueryConfig::new(EXCHANGE_ID_BINANCE, 2_500, 3_000, 1),
                ExchangeQueryConfig::new(EXCHANGE_ID_COINBASE_PRO, 2_000, 3_000, 3),
                ExchangeQueryConfig::new(EXCHANGE_ID_KRAKEN, 2_000, 3_000, 1),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub polling_interval_ms: u64,
    pub startup_grace_period_ms: u64,
    pub max_unhealthy_duration_ms: u64,
    /// Exit the process when a daemon stays unhealthy instead of only logging.
    pub panic_on_unhealthy: bool,
}

impl HealthConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn startup_grace_period(&self) -> Duration {
        Duration::from_millis(self.startup_grace_period_ms)
    }

    pub fn max_unhealthy_duration(&self) -> Duration {
        Duration::from_millis(self.max_unhealthy_duration_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            polling_interval_ms: 5_000,
            startup_grace_period_ms: 300_000,
            max_unhealthy_duration_ms: 300_000,
            panic_on_unhealthy: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Optional in-process price feed service, serving price updates and metrics.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub enabled: bool,
    pub listen_address: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            enabled: false,
            listen_address: "0.0.0.0:8090".to_string(),
        }
    }
}
