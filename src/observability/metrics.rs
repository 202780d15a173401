use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use crate::error::Result;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Fetcher metrics
    pub static ref EXCHANGE_QUERIES: IntCounterVec = IntCounterVec::new(
        Opts::new("pricefeed_exchange_queries_total", "Exchange queries issued, by outcome"),
        &["exchange", "outcome"]
    ).unwrap();

    pub static ref EXCHANGE_QUERY_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "pricefeed_exchange_query_latency_seconds",
            "Exchange query latency"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["exchange"]
    ).unwrap();

    pub static ref FETCHER_QUEUE_FULL: IntCounterVec = IntCounterVec::new(
        Opts::new("pricefeed_fetcher_queue_full_total", "Pushes that found the encoder queue full"),
        &["exchange"]
    ).unwrap();

    // Encoder metrics
    pub static ref ENCODER_PRICE_UPDATES: IntCounterVec = IntCounterVec::new(
        Opts::new("pricefeed_encoder_price_updates_total", "Prices written to the cache"),
        &["exchange"]
    ).unwrap();

    pub static ref ENCODER_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("pricefeed_encoder_errors_total", "Failed fetch results, by error kind"),
        &["exchange", "kind"]
    ).unwrap();

    // Market config metrics
    pub static ref CONFIGURED_MARKETS: IntGauge = IntGauge::new(
        "pricefeed_configured_markets",
        "Markets with a valid configuration"
    ).unwrap();

    pub static ref CONFIGURED_MARKETS_PER_EXCHANGE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pricefeed_configured_markets_per_exchange", "Markets queried on each exchange"),
        &["exchange"]
    ).unwrap();

    pub static ref MARKET_PARAM_REFRESHES: IntCounterVec = IntCounterVec::new(
        Opts::new("pricefeed_market_param_refreshes_total", "Market param refreshes, by outcome"),
        &["outcome"]
    ).unwrap();

    pub static ref INVALID_MARKET_PARAMS: IntCounter = IntCounter::new(
        "pricefeed_invalid_market_params_total",
        "Market params rejected during refresh"
    ).unwrap();

    // Updater metrics
    pub static ref PRICE_UPDATES_SENT: IntCounter = IntCounter::new(
        "pricefeed_price_updates_sent_total",
        "Price update batches delivered downstream"
    ).unwrap();

    pub static ref PRICE_UPDATE_MARKETS: IntGauge = IntGauge::new(
        "pricefeed_price_update_markets",
        "Markets included in the last price update batch"
    ).unwrap();

    pub static ref PRICE_UPDATE_SEND_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "pricefeed_price_update_send_latency_seconds",
            "Latency of delivering a price update batch"
        ).buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0])
    ).unwrap();

    pub static ref PRICE_UPDATER_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("pricefeed_price_updater_errors_total", "Price updater failures, by reason"),
        &["reason"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("pricefeed_health_check_failures_total", "Failed health checks per service"),
        &["service"]
    ).unwrap();

    // Price feed service metrics
    pub static ref SERVICE_MARKET_PRICES_RECEIVED: IntCounter = IntCounter::new(
        "pricefeed_service_market_prices_received_total",
        "Market price updates accepted by the price feed service"
    ).unwrap();
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Registers every pricefeed collector. Calling it again is a no-op.
pub fn register_metrics() -> Result<()> {
    register(Box::new(EXCHANGE_QUERIES.clone()))?;
    register(Box::new(EXCHANGE_QUERY_LATENCY.clone()))?;
    register(Box::new(FETCHER_QUEUE_FULL.clone()))?;
    register(Box::new(ENCODER_PRICE_UPDATES.clone()))?;
    register(Box::new(ENCODER_ERRORS.clone()))?;
    register(Box::new(CONFIGURED_MARKETS.clone()))?;
    register(Box::new(CONFIGURED_MARKETS_PER_EXCHANGE.clone()))?;
    register(Box::new(MARKET_PARAM_REFRESHES.clone()))?;
    register(Box::new(INVALID_MARKET_PARAMS.clone()))?;
    register(Box::new(PRICE_UPDATES_SENT.clone()))?;
    register(Box::new(PRICE_UPDATE_MARKETS.clone()))?;
    register(Box::new(PRICE_UPDATE_SEND_LATENCY.clone()))?;
    register(Box::new(PRICE_UPDATER_ERRORS.clone()))?;
    register(Box::new(HEALTH_CHECK_FAILURES.clone()))?;
    register(Box::new(SERVICE_MARKET_PRICES_RECEIVED.clone()))?;
    Ok(())
}

/// Text exposition of the registry.
pub fn gather_metrics() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| crate::error::Error::MetricsError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice_and_gather() {
        register_metrics().unwrap();
        register_metrics().unwrap();

        PRICE_UPDATES_SENT.inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("pricefeed_price_updates_sent_total"));
    }
}
