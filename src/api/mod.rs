pub mod rest;
pub mod service;

pub use rest::create_router;
pub use service::{LocalPriceFeedService, PriceFeedService};
