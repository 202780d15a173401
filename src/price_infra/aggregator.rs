use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use crate::error::Result;
use crate::price_infra::exchange_to_price::ExchangeToPrice;
use crate::types::ids::{ExchangeId, MarketId};
use crate::types::market::MarketParam;
use crate::types::price::{MarketPriceTimestamp, MarketPriceUpdate, PriceTimestamp};
use crate::types::timestamp::Timestamp;

/// Median of `values`. For an even count the two middle values are averaged,
/// rounding half up. Returns `None` for an empty slice.
pub fn median(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        let (lo, hi) = (sorted[mid - 1], sorted[mid]);
        Some(lo + (hi - lo).div_ceil(2))
    } else {
        Some(sorted[mid])
    }
}

/// Which exchanges count towards a market's median, and how many must report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketPriceValidation {
    pub market_id: MarketId,
    pub min_exchanges: u32,
    pub accepted_exchanges: HashSet<ExchangeId>,
}

impl MarketPriceValidation {
    pub fn from_market_param(param: &MarketParam) -> Result<Self> {
        let exchange_config = param.parse_exchange_config()?;
        Ok(MarketPriceValidation {
            market_id: param.id,
            min_exchanges: param.min_exchanges,
            accepted_exchanges: exchange_config.exchange_ids(),
        })
    }
}

/// In-memory cache of the latest price per (market, exchange).
///
/// Every encoder writes into it and the price updater and query handlers read
/// from it. A single reader/writer lock guards the outer map; it is held for
/// one write batch or one read-filter-aggregate pass.
#[derive(Debug)]
pub struct MarketToExchangePrices {
    max_price_age: Duration,
    markets: RwLock<HashMap<MarketId, ExchangeToPrice>>,
}

impl MarketToExchangePrices {
    pub fn new(max_price_age: Duration) -> Self {
        MarketToExchangePrices {
            max_price_age,
            markets: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_price_age(&self) -> Duration {
        self.max_price_age
    }

    /// Applies a single observation from `exchange_id`. Returns whether it was newer.
    pub fn update_price(&self, exchange_id: &ExchangeId, observation: MarketPriceTimestamp) -> bool {
        let mut markets = self.markets.write().unwrap_or_else(PoisonError::into_inner);
        markets
            .entry(observation.market_id)
            .or_insert_with(|| ExchangeToPrice::new(observation.market_id))
            .update_price(
                exchange_id,
                PriceTimestamp {
                    price: observation.price,
                    last_update_time: observation.last_update_time,
                },
            )
    }

    /// Applies a batch of per-market updates. Entries that are not newer are skipped.
    pub fn update_prices(&self, updates: &[MarketPriceUpdate]) {
        let mut markets = self.markets.write().unwrap_or_else(PoisonError::into_inner);
        for update in updates {
            markets
                .entry(update.market_id)
                .or_insert_with(|| ExchangeToPrice::new(update.market_id))
                .update_prices(&update.exchange_prices);
        }
    }

    /// Snapshot of every cached observation, grouped by exchange and sorted by market id.
    pub fn get_all_prices(&self) -> BTreeMap<ExchangeId, Vec<MarketPriceTimestamp>> {
        let markets = self.markets.read().unwrap_or_else(PoisonError::into_inner);
        let mut by_exchange: BTreeMap<ExchangeId, Vec<MarketPriceTimestamp>> = BTreeMap::new();

        for (market_id, exchange_to_price) in markets.iter() {
            for (exchange_id, price) in exchange_to_price.iter() {
                by_exchange
                    .entry(exchange_id.clone())
                    .or_default()
                    .push(MarketPriceTimestamp::new(*market_id, price.price, price.last_update_time));
            }
        }
        for prices in by_exchange.values_mut() {
            prices.sort_by_key(|p| p.market_id);
        }
        by_exchange
    }

    /// Median of the valid prices of each requested market.
    ///
    /// A price is valid when it comes from an accepted exchange and is no older
    /// than `max_price_age` at `read_time`. Markets with fewer valid prices than
    /// `min_exchanges` are left out of the result.
    pub fn get_valid_median_prices(
        &self,
        validations: &[MarketPriceValidation],
        read_time: Timestamp,
    ) -> HashMap<MarketId, u64> {
        let cutoff = read_time - self.max_price_age;
        let markets = self.markets.read().unwrap_or_else(PoisonError::into_inner);
        let mut median_prices = HashMap::with_capacity(validations.len());

        for validation in validations {
            let Some(exchange_to_price) = markets.get(&validation.market_id) else {
                continue;
            };

            let valid_prices = exchange_to_price.valid_prices(&validation.accepted_exchanges, cutoff);
            if valid_prices.len() < validation.min_exchanges as usize {
                tracing::debug!(
                    market_id = %validation.market_id,
                    valid = valid_prices.len(),
                    min_exchanges = validation.min_exchanges,
                    "Not enough valid prices to compute median"
                );
                continue;
            }

            if let Some(price) = median(&valid_prices) {
                median_prices.insert(validation.market_id, price);
            }
        }

        median_prices
    }

    /// Median over every exchange's valid price for one market.
    pub fn get_valid_median_price(&self, market_id: MarketId, read_time: Timestamp) -> Option<u64> {
        let cutoff = read_time - self.max_price_age;
        let markets = self.markets.read().unwrap_or_else(PoisonError::into_inner);
        markets
            .get(&market_id)
            .and_then(|etp| median(&etp.all_valid_prices(cutoff)))
    }

    pub fn market_count(&self) -> usize {
        self.markets.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
