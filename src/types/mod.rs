pub mod ids;
pub mod timestamp;
pub mod price;
pub mod market;
pub mod exchange;

pub use ids::{ExchangeId, MarketId};
pub use timestamp::Timestamp;
