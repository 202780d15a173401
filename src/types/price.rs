use serde::{Deserialize, Serialize};
use crate::types::ids::{ExchangeId, MarketId};
use crate::types::market::MarketParam;
use crate::types::timestamp::Timestamp;

/// A single normalized observation from one exchange.
///
/// `price` is a fixed-point integer scaled by the market exponent. Zero is
/// never a valid price.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPriceTimestamp {
    pub market_id: MarketId,
    pub price: u64,
    pub last_update_time: Timestamp,
}

impl MarketPriceTimestamp {
    pub fn new(market_id: MarketId, price: u64, last_update_time: Timestamp) -> Self {
        MarketPriceTimestamp {
            market_id,
            price,
            last_update_time,
        }
    }
}

/// Latest price of a market on one exchange, as held by the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTimestamp {
    pub price: u64,
    pub last_update_time: Timestamp,
}

/// Wire representation of one exchange price inside a batch update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePrice {
    pub exchange_id: ExchangeId,
    pub price: u64,
    pub last_update_time: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPriceUpdate {
    pub market_id: MarketId,
    pub exchange_prices: Vec<ExchangePrice>,
}

/// Batch request sent by the price updater to the price feed service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMarketPricesRequest {
    pub market_price_updates: Vec<MarketPriceUpdate>,
}

impl UpdateMarketPricesRequest {
    pub fn is_empty(&self) -> bool {
        self.market_price_updates.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMarketPricesResponse {}

/// Query for the validated median price of each listed market.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedianPricesRequest {
    pub market_params: Vec<MarketParam>,
    /// Defaults to the time the request is served.
    #[serde(default)]
    pub read_time: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPrice {
    pub market_id: MarketId,
    pub price: u64,
}

/// Markets without enough valid prices are absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedianPricesResponse {
    pub market_prices: Vec<MarketPrice>,
}
