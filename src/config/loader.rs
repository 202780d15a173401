use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use crate::config::{DaemonConfig, HealthConfig, LoggingConfig, ServiceConfig};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub daemon: DaemonConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
}

impl AppConfig {
    /// Layers `config/default`, then `config/{env}`, then `PRICEFEED_*`
    /// environment variables (e.g. `PRICEFEED_DAEMON__BUFFER_SIZE`).
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("PRICEFEED").separator("__"))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        self.daemon.validate()?;
        if self.health.polling_interval_ms == 0 {
            return Err(Error::ConfigError("health.polling_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}
