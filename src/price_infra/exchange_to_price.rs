use std::collections::{HashMap, HashSet};
use crate::types::ids::{ExchangeId, MarketId};
use crate::types::price::{ExchangePrice, PriceTimestamp};
use crate::types::timestamp::Timestamp;

/// Latest price per exchange for a single market.
#[derive(Clone, Debug)]
pub struct ExchangeToPrice {
    market_id: MarketId,
    exchange_prices: HashMap<ExchangeId, PriceTimestamp>,
}

impl ExchangeToPrice {
    pub fn new(market_id: MarketId) -> Self {
        ExchangeToPrice {
            market_id,
            exchange_prices: HashMap::new(),
        }
    }

    pub fn market_id(&self) -> MarketId {
        self.market_id
    }

    /// Stores `update` if it is strictly newer than the stored price for the
    /// exchange. Returns whether the update was applied.
    pub fn update_price(&mut self, exchange_id: &ExchangeId, update: PriceTimestamp) -> bool {
        if update.price == 0 {
            tracing::debug!(
                market_id = %self.market_id,
                exchange = %exchange_id,
                "Dropping zero price update"
            );
            return false;
        }

        match self.exchange_prices.get_mut(exchange_id) {
            Some(existing) if update.last_update_time <= existing.last_update_time => false,
            Some(existing) => {
                *existing = update;
                true
            }
            None => {
                self.exchange_prices.insert(exchange_id.clone(), update);
                true
            }
        }
    }

    pub fn update_prices(&mut self, updates: &[ExchangePrice]) {
        for update in updates {
            self.update_price(
                &update.exchange_id,
                PriceTimestamp {
                    price: update.price,
                    last_update_time: update.last_update_time,
                },
            );
        }
    }

    /// Prices from `accepted_exchanges` updated at or after `cutoff`.
    pub fn valid_prices(
        &self,
        accepted_exchanges: &HashSet<ExchangeId>,
        cutoff: Timestamp,
    ) -> Vec<u64> {
        self.exchange_prices
            .iter()
            .filter(|(exchange_id, _)| accepted_exchanges.contains(*exchange_id))
            .filter(|(_, p)| p.last_update_time >= cutoff)
            .map(|(_, p)| p.price)
            .collect()
    }

    /// Prices from every exchange updated at or after `cutoff`.
    pub fn all_valid_prices(&self, cutoff: Timestamp) -> Vec<u64> {
        self.exchange_prices
            .values()
            .filter(|p| p.last_update_time >= cutoff)
            .map(|p| p.price)
            .collect()
    }

    pub fn get(&self, exchange_id: &ExchangeId) -> Option<&PriceTimestamp> {
        self.exchange_prices.get(exchange_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ExchangeId, &PriceTimestamp)> {
        self.exchange_prices.iter()
    }

    pub fn len(&self) -> usize {
        self.exchange_prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchange_prices.is_empty()
    }
}
