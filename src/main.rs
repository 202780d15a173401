use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use tokio::sync::Notify;
use tracing::{error, info};
use pricefeed::api::{create_router, PriceFeedService};
use pricefeed::client::{HttpDaemonConnector, PriceDaemon, SubTaskRunnerImpl};
use pricefeed::config::AppConfig;
use pricefeed::error::Error;
use pricefeed::health::HealthMonitor;
use pricefeed::health::monitor::UnhealthyCallback;
use pricefeed::observability::{metrics, tracing::init_tracing};
use pricefeed::price_infra::aggregator::MarketToExchangePrices;
use pricefeed::price_infra::connectors::static_exchange_details;
use pricefeed::price_infra::query_handler::ReqwestRequestHandler;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::args().nth(1).unwrap_or_else(|| "development".to_string());
    let config = AppConfig::load(&env).with_context(|| format!("failed to load config for {}", env))?;

    init_tracing(&config.logging.level, config.logging.json);
    metrics::register_metrics()?;
    info!(env = %env, "Starting price daemon");

    if config.service.enabled {
        let service = Arc::new(PriceFeedService::new(Arc::new(MarketToExchangePrices::new(
            config.daemon.max_price_age(),
        ))));
        let listener = tokio::net::TcpListener::bind(&config.service.listen_address)
            .await
            .with_context(|| format!("failed to bind {}", config.service.listen_address))?;
        info!(address = %config.service.listen_address, "Price feed service listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, create_router(service)).await {
                error!(error = %e, "Price feed service exited");
            }
        });
    }

    let daemon = Arc::new(PriceDaemon::new(config.daemon.clone(), Arc::new(SubTaskRunnerImpl)));
    let connector = HttpDaemonConnector::new(
        config.daemon.price_feed_address.clone(),
        config.daemon.market_params_address.clone(),
        CONNECTION_TIMEOUT,
    );
    let request_handler = Arc::new(ReqwestRequestHandler::new(config.daemon.max_connections_per_host)?);

    // Failing to start is unrecoverable for this process.
    daemon
        .start(&connector, &static_exchange_details(), request_handler)
        .await
        .context("failed to start price daemon")?;

    let unhealthy = Arc::new(Notify::new());
    let panic_on_unhealthy = config.health.panic_on_unhealthy;
    let notify = unhealthy.clone();
    let on_unhealthy: UnhealthyCallback = Arc::new(move |service: &str, err: &Error| {
        error!(service = %service, error = %err, "Service has been unhealthy for too long");
        if panic_on_unhealthy {
            notify.notify_one();
        }
    });

    let monitor = Arc::new(HealthMonitor::new(
        config.health.startup_grace_period(),
        config.health.polling_interval(),
        on_unhealthy,
    ));
    for checkable in daemon.health_checkables() {
        monitor.register_service(checkable, config.health.max_unhealthy_duration())?;
    }
    let monitor_handle = tokio::spawn(monitor.clone().run());

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            Ok(())
        }
        _ = unhealthy.notified() => Err(anyhow::anyhow!("price daemon was unhealthy for too long")),
    };

    monitor.stop();
    daemon.stop().await;
    monitor_handle.await.context("health monitor task failed")?;
    result
}
