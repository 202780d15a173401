use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use crate::types::ids::ExchangeId;

/// Installs the global subscriber. `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}

pub fn trace_price_fetcher(exchange_id: &ExchangeId) -> Span {
    tracing::info_span!("price_fetcher", exchange = %exchange_id)
}

pub fn trace_price_encoder(exchange_id: &ExchangeId) -> Span {
    tracing::info_span!("price_encoder", exchange = %exchange_id)
}

pub fn trace_price_updater() -> Span {
    tracing::info_span!("price_updater")
}

pub fn trace_market_param_updater() -> Span {
    tracing::info_span!("market_param_updater")
}
