pub mod market_params_client;
pub mod price_feed_client;

pub use market_params_client::{MarketParamsPage, MarketParamsQueryClient, PageRequest};
pub use price_feed_client::PriceFeedServiceClient;
