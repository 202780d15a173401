use async_trait::async_trait;
use crate::error::Result;
use crate::types::price::{UpdateMarketPricesRequest, UpdateMarketPricesResponse};

/// Downstream service that receives the daemon's per-exchange prices.
#[async_trait]
pub trait PriceFeedServiceClient: Send + Sync {
    /// Delivers one batch. The whole batch is accepted or the call errors.
    async fn update_market_prices(&self, request: UpdateMarketPricesRequest) -> Result<UpdateMarketPricesResponse>;
}
