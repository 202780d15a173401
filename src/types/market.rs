use std::collections::{BTreeMap, HashMap, HashSet};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::types::ids::{ExchangeId, MarketId};

/// Upper bound (exclusive) on `min_price_change_ppm`.
pub const MAX_PRICE_CHANGE_PPM: u32 = 10_000;

/// Largest exponent magnitude a fixed-point price can be shifted by.
pub const MAX_EXPONENT_MAGNITUDE: u32 = 28;

/// Market parameters as stored by the on-chain prices module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParam {
    pub id: MarketId,
    pub pair: String,
    pub exponent: i32,
    pub min_exchanges: u32,
    pub min_price_change_ppm: u32,
    pub exchange_config_json: String,
}

impl MarketParam {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidMarketParam {
            market_id: self.id,
            reason: reason.to_string(),
        };

        if self.pair.is_empty() {
            return Err(invalid("pair cannot be empty"));
        }
        if self.min_exchanges == 0 {
            return Err(invalid("min exchanges cannot be zero"));
        }
        if self.min_price_change_ppm == 0 || self.min_price_change_ppm >= MAX_PRICE_CHANGE_PPM {
            return Err(invalid("min price change in parts-per-million must be in (0, 10000)"));
        }
        if self.exponent.unsigned_abs() > MAX_EXPONENT_MAGNITUDE {
            return Err(invalid("exponent must be within [-28, 28]"));
        }
        if self.exchange_config_json.is_empty() {
            return Err(invalid("exchange config json cannot be empty"));
        }
        Ok(())
    }

    pub fn parse_exchange_config(&self) -> Result<ExchangeConfigJson> {
        serde_json::from_str(&self.exchange_config_json).map_err(|e| {
            Error::InvalidExchangeConfigJson {
                market_id: self.id,
                reason: e.to_string(),
            }
        })
    }
}

/// One entry of a market's exchange config json.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeMarketConfigJson {
    pub exchange_name: ExchangeId,
    pub ticker: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub adjust_by_market: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invert: bool,
}

/// Parsed form of `MarketParam::exchange_config_json`:
/// `{"exchanges":[{"exchangeName":"Binance","ticker":"BTCUSDT","adjustByMarket":"USDT-USD"}]}`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfigJson {
    pub exchanges: Vec<ExchangeMarketConfigJson>,
}

impl ExchangeConfigJson {
    /// Checks every exchange is known, tickers are set and adjustment markets exist.
    pub fn validate(
        &self,
        market_id: MarketId,
        known_exchanges: &HashSet<ExchangeId>,
        market_name_to_id: &HashMap<String, MarketId>,
    ) -> Result<()> {
        let invalid = |reason: String| Error::InvalidExchangeConfigJson { market_id, reason };

        if self.exchanges.is_empty() {
            return Err(invalid("exchanges cannot be empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.exchanges.len());
        for exchange in &self.exchanges {
            if !known_exchanges.contains(&exchange.exchange_name) {
                return Err(invalid(format!(
                    "exchange name '{}' is not valid",
                    exchange.exchange_name
                )));
            }
            if !seen.insert(&exchange.exchange_name) {
                return Err(invalid(format!(
                    "exchange name '{}' is duplicated",
                    exchange.exchange_name
                )));
            }
            if exchange.ticker.is_empty() {
                return Err(invalid(format!(
                    "ticker is empty for exchange '{}'",
                    exchange.exchange_name
                )));
            }
            if !exchange.adjust_by_market.is_empty()
                && !market_name_to_id.contains_key(&exchange.adjust_by_market)
            {
                return Err(invalid(format!(
                    "adjustByMarket '{}' for exchange '{}' is not a valid market",
                    exchange.adjust_by_market, exchange.exchange_name
                )));
            }
        }
        Ok(())
    }

    pub fn exchange_ids(&self) -> HashSet<ExchangeId> {
        self.exchanges.iter().map(|e| e.exchange_name.clone()).collect()
    }
}

/// How one market is queried on one exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketConfig {
    pub ticker: String,
    pub adjust_by_market: Option<MarketId>,
    pub invert: bool,
}

/// Exchange independent market configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutableMarketConfig {
    pub id: MarketId,
    pub pair: String,
    pub exponent: i32,
    pub min_exchanges: u32,
}

/// The markets currently served by one exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutableExchangeMarketConfig {
    pub id: ExchangeId,
    pub market_to_market_config: BTreeMap<MarketId, MarketConfig>,
}

impl MutableExchangeMarketConfig {
    pub fn new(id: ExchangeId) -> Self {
        MutableExchangeMarketConfig {
            id,
            market_to_market_config: BTreeMap::new(),
        }
    }

    /// Market ids in ascending order.
    pub fn market_ids(&self) -> Vec<MarketId> {
        self.market_to_market_config.keys().copied().collect()
    }
}
