use axum::{
    Router,
    routing::{get, post},
    extract::{State, Json},
    http::StatusCode,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use crate::api::service::PriceFeedService;
use crate::client::connections::{HEALTH_PATH, MARKET_PRICES_PATH, MEDIAN_PRICES_PATH};
use crate::error::Error;
use crate::observability::metrics::gather_metrics;
use crate::types::price::{
    MarketPrice, MedianPricesRequest, MedianPricesResponse, UpdateMarketPricesRequest, UpdateMarketPricesResponse,
};
use crate::types::timestamp::Timestamp;

pub fn create_router(service: Arc<PriceFeedService>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_check))
        .route(MARKET_PRICES_PATH, post(update_market_prices))
        .route(MEDIAN_PRICES_PATH, get(median_prices))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn update_market_prices(
    State(service): State<Arc<PriceFeedService>>,
    Json(request): Json<UpdateMarketPricesRequest>,
) -> Result<Json<UpdateMarketPricesResponse>, (StatusCode, String)> {
    match service.update_market_prices(&request) {
        Ok(response) => Ok(Json(response)),
        Err(e @ Error::EmptyMarketPriceUpdate) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to apply market price updates");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn median_prices(
    State(service): State<Arc<PriceFeedService>>,
    Json(request): Json<MedianPricesRequest>,
) -> Json<MedianPricesResponse> {
    let read_time = request.read_time.unwrap_or_else(Timestamp::now);
    let mut market_prices: Vec<MarketPrice> = service
        .get_valid_median_prices(&request.market_params, read_time)
        .into_iter()
        .map(|(market_id, price)| MarketPrice { market_id, price })
        .collect();
    market_prices.sort_by_key(|p| p.market_id);
    Json(MedianPricesResponse { market_prices })
}

async fn metrics() -> Result<String, (StatusCode, String)> {
    gather_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use std::time::Duration;
    use tower::ServiceExt;
    use crate::price_infra::aggregator::MarketToExchangePrices;
    use crate::types::ids::{ExchangeId, MarketId};
    use crate::types::price::MarketPriceTimestamp;

    fn router() -> (Router, Arc<MarketToExchangePrices>) {
        let prices = Arc::new(MarketToExchangePrices::new(Duration::from_secs(30)));
        (create_router(Arc::new(PriceFeedService::new(prices.clone()))), prices)
    }

    fn post_prices(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(MARKET_PRICES_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = router();
        let response = router
            .oneshot(Request::builder().uri(HEALTH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_market_prices() {
        let (router, prices) = router();
        let body = r#"{"market_price_updates":[{"market_id":1,"exchange_prices":[{"exchange_id":"Binance","price":100,"last_update_time":1000}]}]}"#;

        let response = router.oneshot(post_prices(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(prices.market_count(), 1);
    }

    #[tokio::test]
    async fn test_update_market_prices_empty_rejected() {
        let (router, prices) = router();

        let response = router.oneshot(post_prices(r#"{"market_price_updates":[]}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(prices.market_count(), 0);
    }

    #[tokio::test]
    async fn test_median_prices() {
        let (router, prices) = router();
        for (exchange, price) in [("Binance", 1001), ("Kraken", 2002)] {
            prices.update_price(&ExchangeId::from(exchange), MarketPriceTimestamp::new(MarketId(0), price, Timestamp(5_000)));
        }
        let body = r#"{"read_time":5000,"market_params":[{"id":0,"pair":"BTC-USD","exponent":-5,"min_exchanges":2,"min_price_change_ppm":50,"exchange_config_json":"{\"exchanges\":[{\"exchangeName\":\"Binance\",\"ticker\":\"BTCUSDT\"},{\"exchangeName\":\"Kraken\",\"ticker\":\"XXBTZUSD\"}]}"}]}"#;
        let request = Request::builder()
            .method("GET")
            .uri(MEDIAN_PRICES_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: MedianPricesResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            parsed.market_prices,
            vec![MarketPrice { market_id: MarketId(0), price: 1502 }]
        );
    }
}
