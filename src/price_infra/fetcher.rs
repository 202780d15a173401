use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};
use crate::error::{Error, Result};
use crate::health::HealthCheckable;
use crate::observability::{metrics, tracing::trace_price_fetcher};
use crate::price_infra::market_configs::ExchangeMarketSnapshot;
use crate::price_infra::query_handler::{ExchangeQueryHandler, QueryOutput};
use crate::types::exchange::{ExchangeQueryConfig, ExchangeQueryDetails};
use crate::types::ids::{ExchangeId, MarketId};
use crate::types::price::MarketPriceTimestamp;

/// One fetched price, or the reason a market could not be priced this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub market_id: MarketId,
    pub result: Result<MarketPriceTimestamp>,
}

/// Fixed ordered set of markets visited in rotation, resuming where the
/// previous pass stopped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MarketRing {
    markets: Vec<MarketId>,
    next: usize,
}

impl MarketRing {
    pub fn new(markets: Vec<MarketId>) -> Self {
        MarketRing { markets, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn markets(&self) -> &[MarketId] {
        &self.markets
    }

    /// Next `n` markets of the rotation, never repeating one within a call.
    pub fn take(&mut self, n: usize) -> Vec<MarketId> {
        if self.markets.is_empty() {
            return Vec::new();
        }
        let n = n.min(self.markets.len());
        let taken = (0..n)
            .map(|i| self.markets[(self.next + i) % self.markets.len()])
            .collect();
        self.next = (self.next + n) % self.markets.len();
        taken
    }
}

/// Polls one exchange on a fixed interval and pushes one result per queried
/// market into the encoder queue.
pub struct PriceFetcher {
    exchange_id: ExchangeId,
    query_config: ExchangeQueryConfig,
    details: ExchangeQueryDetails,
    query_handler: Arc<dyn ExchangeQueryHandler>,
    configs: watch::Receiver<Arc<ExchangeMarketSnapshot>>,
    snapshot: Arc<ExchangeMarketSnapshot>,
    ring: MarketRing,
    sender: mpsc::Sender<FetchResult>,
    health: Arc<dyn HealthCheckable>,
}

impl PriceFetcher {
    pub fn new(
        query_config: ExchangeQueryConfig,
        details: ExchangeQueryDetails,
        query_handler: Arc<dyn ExchangeQueryHandler>,
        mut configs: watch::Receiver<Arc<ExchangeMarketSnapshot>>,
        sender: mpsc::Sender<FetchResult>,
        health: Arc<dyn HealthCheckable>,
    ) -> Self {
        let snapshot = configs.borrow_and_update().clone();
        let ring = MarketRing::new(snapshot.exchange_config.market_ids());
        PriceFetcher {
            exchange_id: query_config.exchange_id.clone(),
            query_config,
            details,
            query_handler,
            configs,
            snapshot,
            ring,
            sender,
            health,
        }
    }

    pub fn ring(&self) -> &MarketRing {
        &self.ring
    }

    /// Runs until `stop` flips to true. Dropping the fetcher on return closes
    /// the encoder queue.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.query_config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let span = trace_price_fetcher(&self.exchange_id);

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = stop.changed() => {}
                _ = ticker.tick() => {
                    if !self.run_sub_task().instrument(span.clone()).await {
                        break;
                    }
                }
            }
        }
        info!(exchange = %self.exchange_id, "Price fetcher stopped");
    }

    fn refresh_config(&mut self) {
        if !self.configs.has_changed().unwrap_or(false) {
            return;
        }
        self.snapshot = self.configs.borrow_and_update().clone();
        let markets = self.snapshot.exchange_config.market_ids();
        if markets != self.ring.markets() {
            info!(exchange = %self.exchange_id, markets = markets.len(), "Rebuilding market ring");
            self.ring = MarketRing::new(markets);
        }
    }

    /// One tick. Returns false once the encoder queue has closed.
    pub async fn run_sub_task(&mut self) -> bool {
        self.refresh_config();
        if self.ring.is_empty() {
            debug!(exchange = %self.exchange_id, "No markets configured, skipping tick");
            return true;
        }

        let batches: Vec<Vec<MarketId>> = if self.details.is_multi_market {
            vec![self.ring.markets().to_vec()]
        } else {
            self.ring
                .take(self.query_config.max_queries as usize)
                .into_iter()
                .map(|market_id| vec![market_id])
                .collect()
        };

        let this = &*self;
        let timeout = this.query_config.timeout();
        let queries = batches.iter().map(|market_ids| {
            let started = Instant::now();
            async move {
                let result = match time::timeout(
                    timeout,
                    this.query_handler.query(
                        &this.details,
                        &this.snapshot.exchange_config,
                        market_ids,
                        &this.snapshot.market_configs,
                    ),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::QueryTimeout {
                        exchange: this.exchange_id.clone(),
                        timeout,
                    }),
                };
                metrics::EXCHANGE_QUERY_LATENCY
                    .with_label_values(&[this.exchange_id.as_str()])
                    .observe(started.elapsed().as_secs_f64());
                result
            }
        });
        let outcomes = join_all(queries).await;

        let mut succeeded = 0usize;
        let mut last_error = None;
        let mut results = Vec::new();
        for (market_ids, outcome) in batches.iter().zip(outcomes) {
            match outcome {
                Ok(output) => {
                    succeeded += 1;
                    metrics::EXCHANGE_QUERIES
                        .with_label_values(&[self.exchange_id.as_str(), "success"])
                        .inc();
                    results.extend(results_for_output(market_ids, output));
                }
                Err(e) => {
                    metrics::EXCHANGE_QUERIES
                        .with_label_values(&[self.exchange_id.as_str(), e.classify().as_str()])
                        .inc();
                    results.extend(market_ids.iter().map(|market_id| FetchResult {
                        market_id: *market_id,
                        result: Err(e.clone()),
                    }));
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => self.health.report_failure(e),
            _ => self.health.report_success(),
        }

        for result in results {
            if !self.push(result).await {
                return false;
            }
        }
        true
    }

    async fn push(&self, result: FetchResult) -> bool {
        match self.sender.try_send(result) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(result)) => {
                warn!(
                    exchange = %self.exchange_id,
                    capacity = self.sender.max_capacity(),
                    "Encoder queue is full, price encoder is falling behind"
                );
                metrics::FETCHER_QUEUE_FULL
                    .with_label_values(&[self.exchange_id.as_str()])
                    .inc();
                self.sender.send(result).await.is_ok()
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Exactly one result per queried market: its price, the reason it was
/// unavailable, or a zero-price rejection.
fn results_for_output(market_ids: &[MarketId], mut output: QueryOutput) -> Vec<FetchResult> {
    let mut results = Vec::with_capacity(market_ids.len());
    let mut priced = HashSet::with_capacity(output.prices.len());

    for price in output.prices {
        if !market_ids.contains(&price.market_id) || !priced.insert(price.market_id) {
            continue;
        }
        let result = if price.price == 0 {
            Err(Error::ZeroPrice { market_id: price.market_id })
        } else {
            Ok(price)
        };
        results.push(FetchResult {
            market_id: price.market_id,
            result,
        });
    }

    for market_id in market_ids {
        if priced.contains(market_id) {
            continue;
        }
        let err = output
            .unavailable_markets
            .remove(market_id)
            .unwrap_or_else(|| Error::MarketUnavailable {
                market_id: *market_id,
                reason: "missing from exchange response".to_string(),
            });
        results.push(FetchResult {
            market_id: *market_id,
            result: Err(err),
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use async_trait::async_trait;
    use crate::health::TimeBoundedHealthChecker;
    use crate::price_infra::connectors::binance::BinancePriceFunction;
    use crate::types::market::{MarketConfig, MutableExchangeMarketConfig, MutableMarketConfig};
    use crate::types::timestamp::Timestamp;

    const EXCHANGE: &str = "TestExchange";

    /// Answers every market with its id as the price; records each call.
    struct FakeQueryHandler {
        calls: Mutex<Vec<Vec<MarketId>>>,
        fail: Option<Error>,
        delay: Option<Duration>,
    }

    impl FakeQueryHandler {
        fn new() -> Arc<Self> {
            Arc::new(FakeQueryHandler { calls: Mutex::new(Vec::new()), fail: None, delay: None })
        }

        fn calls(&self) -> Vec<Vec<MarketId>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExchangeQueryHandler for FakeQueryHandler {
        async fn query(
            &self,
            _details: &ExchangeQueryDetails,
            _exchange_config: &MutableExchangeMarketConfig,
            market_ids: &[MarketId],
            _market_configs: &HashMap<MarketId, MutableMarketConfig>,
        ) -> Result<QueryOutput> {
            self.calls.lock().unwrap().push(market_ids.to_vec());
            if let Some(delay) = self.delay {
                time::sleep(delay).await;
            }
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            Ok(QueryOutput {
                prices: market_ids
                    .iter()
                    .map(|id| MarketPriceTimestamp::new(*id, id.value() as u64, Timestamp(1_000)))
                    .collect(),
                unavailable_markets: HashMap::new(),
            })
        }
    }

    fn snapshot(markets: &[u32]) -> Arc<ExchangeMarketSnapshot> {
        let mut exchange_config = MutableExchangeMarketConfig::new(ExchangeId::from(EXCHANGE));
        let mut market_configs = HashMap::new();
        for id in markets {
            exchange_config.market_to_market_config.insert(
                MarketId(*id),
                MarketConfig { ticker: format!("T{}", id), adjust_by_market: None, invert: false },
            );
            market_configs.insert(
                MarketId(*id),
                MutableMarketConfig { id: MarketId(*id), pair: format!("P{}", id), exponent: -5, min_exchanges: 1 },
            );
        }
        Arc::new(ExchangeMarketSnapshot { exchange_config, market_configs })
    }

    struct Harness {
        fetcher: PriceFetcher,
        receiver: mpsc::Receiver<FetchResult>,
        config_tx: watch::Sender<Arc<ExchangeMarketSnapshot>>,
        health: Arc<TimeBoundedHealthChecker>,
    }

    fn harness(handler: Arc<FakeQueryHandler>, markets: &[u32], max_queries: u32, multi_market: bool) -> Harness {
        let (config_tx, config_rx) = watch::channel(snapshot(markets));
        let (sender, receiver) = mpsc::channel(64);
        let health = Arc::new(TimeBoundedHealthChecker::new("fetcher", Duration::from_secs(60)));
        let details = ExchangeQueryDetails {
            exchange: ExchangeId::from(EXCHANGE),
            url: "https://test/$".into(),
            is_multi_market: multi_market,
            price_function: Arc::new(BinancePriceFunction),
        };
        let fetcher = PriceFetcher::new(
            ExchangeQueryConfig::new(EXCHANGE, 100, 50, max_queries),
            details,
            handler,
            config_rx,
            sender,
            health.clone(),
        );
        Harness { fetcher, receiver, config_tx, health }
    }

    fn drain(receiver: &mut mpsc::Receiver<FetchResult>) -> Vec<FetchResult> {
        let mut results = Vec::new();
        while let Ok(result) = receiver.try_recv() {
            results.push(result);
        }
        results
    }

    #[test]
    fn test_market_ring_rotation() {
        let mut ring = MarketRing::new(vec![MarketId(7), MarketId(8), MarketId(9)]);
        assert_eq!(ring.take(2), vec![MarketId(7), MarketId(8)]);
        assert_eq!(ring.take(2), vec![MarketId(9), MarketId(7)]);
        assert_eq!(ring.take(5), vec![MarketId(8), MarketId(9), MarketId(7)]);
        assert!(MarketRing::default().take(3).is_empty());
    }

    #[tokio::test]
    async fn test_single_market_round_robin_across_ticks() {
        let handler = FakeQueryHandler::new();
        let mut h = harness(handler.clone(), &[7, 8, 9], 2, false);

        assert!(h.fetcher.run_sub_task().await);
        assert!(h.fetcher.run_sub_task().await);

        assert_eq!(
            handler.calls(),
            vec![vec![MarketId(7)], vec![MarketId(8)], vec![MarketId(9)], vec![MarketId(7)]]
        );
        let results = drain(&mut h.receiver);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.result.is_ok()));
    }

    #[tokio::test]
    async fn test_single_market_fewer_markets_than_max_queries() {
        let handler = FakeQueryHandler::new();
        let mut h = harness(handler.clone(), &[7], 2, false);

        h.fetcher.run_sub_task().await;
        h.fetcher.run_sub_task().await;

        assert_eq!(handler.calls(), vec![vec![MarketId(7)], vec![MarketId(7)]]);
    }

    #[tokio::test]
    async fn test_multi_market_single_query_per_tick() {
        let handler = FakeQueryHandler::new();
        let mut h = harness(handler.clone(), &[7, 8, 9], 1, true);

        h.fetcher.run_sub_task().await;

        assert_eq!(handler.calls(), vec![vec![MarketId(7), MarketId(8), MarketId(9)]]);
        let results = drain(&mut h.receiver);
        assert_eq!(results.len(), 3);
        assert!(h.health.health_check().is_ok());
    }

    #[tokio::test]
    async fn test_zero_price_is_rejected() {
        let handler = FakeQueryHandler::new();
        let mut h = harness(handler, &[0, 5], 2, true);

        h.fetcher.run_sub_task().await;

        let results = drain(&mut h.receiver);
        let zero = results.iter().find(|r| r.market_id == MarketId(0)).unwrap();
        assert_eq!(zero.result, Err(Error::ZeroPrice { market_id: MarketId(0) }));
        let five = results.iter().find(|r| r.market_id == MarketId(5)).unwrap();
        assert!(five.result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_reports_each_market() {
        let handler = Arc::new(FakeQueryHandler {
            calls: Mutex::new(Vec::new()),
            fail: None,
            delay: Some(Duration::from_secs(10)),
        });
        let mut h = harness(handler, &[1, 2], 2, false);

        h.fetcher.run_sub_task().await;

        let results = drain(&mut h.receiver);
        assert_eq!(results.len(), 2);
        for result in results {
            assert!(matches!(result.result, Err(Error::QueryTimeout { .. })));
        }
        assert!(matches!(h.health.health_check(), Err(Error::NoSuccessfulUpdate)));
    }

    #[tokio::test]
    async fn test_failed_tick_reports_health_failure() {
        let handler = Arc::new(FakeQueryHandler {
            calls: Mutex::new(Vec::new()),
            fail: Some(Error::ExchangeServerError { status: 502 }),
            delay: None,
        });
        let mut h = harness(handler, &[1], 1, false);
        h.health.report_success();

        h.fetcher.run_sub_task().await;

        assert!(matches!(h.health.health_check(), Err(Error::LastUpdateFailed { .. })));
        let results = drain(&mut h.receiver);
        assert_eq!(results[0].result, Err(Error::ExchangeServerError { status: 502 }));
    }

    #[tokio::test]
    async fn test_config_change_rebuilds_ring() {
        let handler = FakeQueryHandler::new();
        let mut h = harness(handler.clone(), &[1, 2, 3], 1, false);

        h.fetcher.run_sub_task().await;
        h.config_tx.send_replace(snapshot(&[4, 5]));
        h.fetcher.run_sub_task().await;

        assert_eq!(handler.calls(), vec![vec![MarketId(1)], vec![MarketId(4)]]);
        assert_eq!(h.fetcher.ring().markets(), &[MarketId(4), MarketId(5)]);
    }

    #[tokio::test]
    async fn test_no_markets_skips_tick() {
        let handler = FakeQueryHandler::new();
        let mut h = harness(handler.clone(), &[], 2, false);

        assert!(h.fetcher.run_sub_task().await);
        assert!(handler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_blocks_until_drained() {
        let handler = FakeQueryHandler::new();
        let (_config_tx, config_rx) = watch::channel(snapshot(&[1, 2]));
        let (sender, mut receiver) = mpsc::channel(1);
        let details = ExchangeQueryDetails {
            exchange: ExchangeId::from(EXCHANGE),
            url: "https://test/$".into(),
            is_multi_market: true,
            price_function: Arc::new(BinancePriceFunction),
        };
        let mut fetcher = PriceFetcher::new(
            ExchangeQueryConfig::new(EXCHANGE, 100, 50, 2),
            details,
            handler,
            config_rx,
            sender,
            Arc::new(TimeBoundedHealthChecker::new("fetcher", Duration::from_secs(60))),
        );

        let task = tokio::spawn(async move { fetcher.run_sub_task().await });
        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert!(task.await.unwrap());
        assert_eq!(first.market_id, MarketId(1));
        assert_eq!(second.market_id, MarketId(2));
    }

    #[tokio::test]
    async fn test_run_closes_queue_on_stop() {
        let handler = FakeQueryHandler::new();
        let mut h = harness(handler, &[1], 1, false);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(h.fetcher.run(stop_rx));
        assert!(h.receiver.recv().await.is_some());
        stop_tx.send_replace(true);
        task.await.unwrap();

        drain(&mut h.receiver);
        assert!(h.receiver.recv().await.is_none());
    }
}
