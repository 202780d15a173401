use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, Instrument};
use crate::error::{Error, QueryErrorKind};
use crate::observability::{metrics, tracing::trace_price_encoder};
use crate::price_infra::aggregator::MarketToExchangePrices;
use crate::price_infra::fetcher::FetchResult;
use crate::types::ids::{ExchangeId, MarketId};

/// Drains one exchange's fetch results into the shared price cache.
pub struct PriceEncoder {
    exchange_id: ExchangeId,
    prices: Arc<MarketToExchangePrices>,
    receiver: mpsc::Receiver<FetchResult>,
}

impl PriceEncoder {
    pub fn new(
        exchange_id: ExchangeId,
        prices: Arc<MarketToExchangePrices>,
        receiver: mpsc::Receiver<FetchResult>,
    ) -> Self {
        PriceEncoder {
            exchange_id,
            prices,
            receiver,
        }
    }

    /// Runs until the fetcher side of the queue is dropped.
    pub async fn run(mut self) {
        let span = trace_price_encoder(&self.exchange_id);
        async {
            while let Some(fetched) = self.receiver.recv().await {
                self.process(fetched);
            }
        }
        .instrument(span)
        .await;
        info!(exchange = %self.exchange_id, "Price encoder stopped");
    }

    pub fn process(&self, fetched: FetchResult) {
        match fetched.result {
            Ok(price) => {
                self.prices.update_price(&self.exchange_id, price);
                metrics::ENCODER_PRICE_UPDATES
                    .with_label_values(&[self.exchange_id.as_str()])
                    .inc();
            }
            Err(e) => self.handle_error(fetched.market_id, &e),
        }
    }

    fn handle_error(&self, market_id: MarketId, err: &Error) {
        let kind = err.classify();
        let label = match err {
            Error::ZeroPrice { .. } => "zero_price",
            _ => kind.as_str(),
        };
        metrics::ENCODER_ERRORS
            .with_label_values(&[self.exchange_id.as_str(), label])
            .inc();

        let message = match kind {
            QueryErrorKind::Timeout => "Exchange query timed out",
            QueryErrorKind::ExchangeServerError => "Exchange returned a server error",
            QueryErrorKind::ConnectionReset => "Exchange connection reset",
            QueryErrorKind::MarketUnavailable => "Market unavailable on exchange",
            QueryErrorKind::Other => "Failed to update exchange price",
        };
        if kind.is_routine() {
            info!(exchange = %self.exchange_id, market_id = %market_id, error = %err, "{}", message);
        } else {
            error!(exchange = %self.exchange_id, market_id = %market_id, error = %err, "{}", message);
        }
    }
}
