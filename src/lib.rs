pub mod utils;
pub mod types;
pub mod price_infra;
pub mod client;
pub mod health;
pub mod error;
pub mod config;
pub mod observability;
pub mod interfaces;
pub mod api;
