pub mod aggregator;
pub mod connectors;
pub mod encoder;
pub mod exchange_to_price;
pub mod fetcher;
pub mod market_configs;
pub mod query_handler;

pub use aggregator::{MarketPriceValidation, MarketToExchangePrices};
pub use market_configs::MutableMarketConfigs;
