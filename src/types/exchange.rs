use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::price_infra::connectors::PriceFunction;
use crate::types::ids::ExchangeId;

/// Polling parameters for one exchange. Loaded from process configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExchangeQueryConfig {
    pub exchange_id: ExchangeId,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub max_queries: u32,
}

impl ExchangeQueryConfig {
    pub fn new(exchange_id: impl Into<ExchangeId>, interval_ms: u64, timeout_ms: u64, max_queries: u32) -> Self {
        ExchangeQueryConfig {
            exchange_id: exchange_id.into(),
            interval_ms,
            timeout_ms,
            max_queries,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Static description of how an exchange is queried.
#[derive(Clone)]
pub struct ExchangeQueryDetails {
    pub exchange: ExchangeId,
    /// Endpoint template. `$` is replaced by the ticker, or by the encoded
    /// list of tickers for multi-market exchanges.
    pub url: String,
    pub is_multi_market: bool,
    pub price_function: Arc<dyn PriceFunction>,
}

impl fmt::Debug for ExchangeQueryDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeQueryDetails")
            .field("exchange", &self.exchange)
            .field("url", &self.url)
            .field("is_multi_market", &self.is_multi_market)
            .finish()
    }
}
