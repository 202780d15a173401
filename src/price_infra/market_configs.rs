use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::types::ids::{ExchangeId, MarketId};
use crate::types::market::{MarketConfig, MarketParam, MutableExchangeMarketConfig, MutableMarketConfig};

/// Everything a fetcher needs to query one exchange: its market configs plus
/// the market configs of every market it reads or adjusts by.
#[derive(Clone, Debug, PartialEq)]
pub struct ExchangeMarketSnapshot {
    pub exchange_config: MutableExchangeMarketConfig,
    pub market_configs: HashMap<MarketId, MutableMarketConfig>,
}

impl ExchangeMarketSnapshot {
    fn empty(id: ExchangeId) -> Self {
        ExchangeMarketSnapshot {
            exchange_config: MutableExchangeMarketConfig::new(id),
            market_configs: HashMap::new(),
        }
    }

    fn build(
        exchange_config: &MutableExchangeMarketConfig,
        market_configs: &HashMap<MarketId, MutableMarketConfig>,
    ) -> Self {
        let mut needed = HashMap::new();
        for (market_id, config) in &exchange_config.market_to_market_config {
            for id in std::iter::once(*market_id).chain(config.adjust_by_market) {
                if let Some(market_config) = market_configs.get(&id) {
                    needed.insert(id, market_config.clone());
                }
            }
        }
        ExchangeMarketSnapshot {
            exchange_config: exchange_config.clone(),
            market_configs: needed,
        }
    }
}

#[derive(Default)]
struct ConfigState {
    exchange_configs: HashMap<ExchangeId, MutableExchangeMarketConfig>,
    market_configs: HashMap<MarketId, MutableMarketConfig>,
}

/// Validated params, ready to be swapped in.
pub struct TransformedParams {
    pub exchange_configs: HashMap<ExchangeId, MutableExchangeMarketConfig>,
    pub market_configs: HashMap<MarketId, MutableMarketConfig>,
    pub market_param_errors: HashMap<MarketId, Error>,
}

/// Current market configuration for every known exchange.
///
/// The set of exchanges is fixed at construction. Market assignments change
/// through `update_markets`, and every exchange whose configuration changed
/// gets a new snapshot pushed to its subscribers.
pub struct MutableMarketConfigs {
    state: RwLock<ConfigState>,
    // Exchanges a market's config json may name. A superset of the subscribed ones.
    known_exchanges: HashSet<ExchangeId>,
    subscriptions: HashMap<ExchangeId, watch::Sender<Arc<ExchangeMarketSnapshot>>>,
}

impl MutableMarketConfigs {
    /// Every exchange is both known and queried.
    pub fn new(exchange_ids: impl IntoIterator<Item = ExchangeId>) -> Self {
        let exchange_ids: Vec<ExchangeId> = exchange_ids.into_iter().collect();
        Self::with_known_exchanges(exchange_ids.clone(), exchange_ids)
    }

    /// Only `active_exchanges` can be subscribed to. Markets may still list
    /// any of `known_exchanges` without being rejected.
    pub fn with_known_exchanges(
        active_exchanges: impl IntoIterator<Item = ExchangeId>,
        known_exchanges: impl IntoIterator<Item = ExchangeId>,
    ) -> Self {
        let mut known_exchanges: HashSet<ExchangeId> = known_exchanges.into_iter().collect();
        let mut state = ConfigState::default();
        let mut subscriptions = HashMap::new();

        for id in active_exchanges {
            known_exchanges.insert(id.clone());
            let (tx, _rx) = watch::channel(Arc::new(ExchangeMarketSnapshot::empty(id.clone())));
            subscriptions.insert(id, tx);
        }
        for id in &known_exchanges {
            state
                .exchange_configs
                .insert(id.clone(), MutableExchangeMarketConfig::new(id.clone()));
        }

        MutableMarketConfigs {
            state: RwLock::new(state),
            known_exchanges,
            subscriptions,
        }
    }

    pub fn exchange_ids(&self) -> Vec<ExchangeId> {
        let mut ids: Vec<_> = self.subscriptions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Receiver of configuration snapshots for one exchange.
    pub fn subscribe(&self, exchange_id: &ExchangeId) -> Result<watch::Receiver<Arc<ExchangeMarketSnapshot>>> {
        self.subscriptions
            .get(exchange_id)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| Error::UnknownExchange(exchange_id.clone()))
    }

    /// Validates each market param independently. Invalid markets are reported
    /// in `market_param_errors` and left out. Only a duplicated market id fails
    /// the whole batch.
    pub fn validate_and_transform_params(&self, market_params: &[MarketParam]) -> Result<TransformedParams> {
        let known_exchanges = &self.known_exchanges;
        let mut market_param_errors = HashMap::new();

        let mut seen = HashSet::with_capacity(market_params.len());
        for param in market_params {
            if !seen.insert(param.id) {
                return Err(Error::DuplicateMarketId(param.id));
            }
        }

        let market_name_to_id: HashMap<String, MarketId> = market_params
            .iter()
            .map(|p| (p.pair.clone(), p.id))
            .collect();

        let mut candidates = BTreeMap::new();
        for param in market_params {
            let parsed = param.validate().and_then(|_| {
                let exchange_config = param.parse_exchange_config()?;
                exchange_config.validate(param.id, known_exchanges, &market_name_to_id)?;
                Ok(exchange_config)
            });
            match parsed {
                Ok(exchange_config) => {
                    candidates.insert(param.id, (param, exchange_config));
                }
                Err(e) => {
                    market_param_errors.insert(param.id, e);
                }
            }
        }

        // Drop markets adjusted by a market that was itself dropped, until stable.
        loop {
            let dropped: Vec<(MarketId, String)> = candidates
                .iter()
                .filter_map(|(id, (_, exchange_config))| {
                    exchange_config
                        .exchanges
                        .iter()
                        .filter(|e| !e.adjust_by_market.is_empty())
                        .find(|e| {
                            market_name_to_id
                                .get(&e.adjust_by_market)
                                .is_none_or(|adjust_id| !candidates.contains_key(adjust_id))
                        })
                        .map(|e| (*id, e.adjust_by_market.clone()))
                })
                .collect();
            if dropped.is_empty() {
                break;
            }
            for (id, adjust_by_market) in dropped {
                candidates.remove(&id);
                market_param_errors.insert(
                    id,
                    Error::InvalidExchangeConfigJson {
                        market_id: id,
                        reason: format!("adjustByMarket '{}' is not a valid market", adjust_by_market),
                    },
                );
            }
        }

        let mut exchange_configs: HashMap<ExchangeId, MutableExchangeMarketConfig> = known_exchanges
            .iter()
            .map(|id| (id.clone(), MutableExchangeMarketConfig::new(id.clone())))
            .collect();
        let mut market_configs = HashMap::with_capacity(candidates.len());

        for (market_id, (param, exchange_config)) in candidates {
            for exchange in exchange_config.exchanges {
                let adjust_by_market = if exchange.adjust_by_market.is_empty() {
                    None
                } else {
                    market_name_to_id.get(&exchange.adjust_by_market).copied()
                };
                let config = exchange_configs
                    .get_mut(&exchange.exchange_name)
                    .ok_or_else(|| Error::UnknownExchange(exchange.exchange_name.clone()))?;
                config.market_to_market_config.insert(
                    market_id,
                    MarketConfig {
                        ticker: exchange.ticker,
                        adjust_by_market,
                        invert: exchange.invert,
                    },
                );
            }
            market_configs.insert(
                market_id,
                MutableMarketConfig {
                    id: market_id,
                    pair: param.pair.clone(),
                    exponent: param.exponent,
                    min_exchanges: param.min_exchanges,
                },
            );
        }

        Ok(TransformedParams {
            exchange_configs,
            market_configs,
            market_param_errors,
        })
    }

    /// Applies a refreshed set of market params. Returns the per-market errors
    /// of markets that were left out.
    pub fn update_markets(&self, market_params: &[MarketParam]) -> Result<HashMap<MarketId, Error>> {
        let transformed = self.validate_and_transform_params(market_params)?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.exchange_configs = transformed.exchange_configs;
        state.market_configs = transformed.market_configs;

        for (exchange_id, tx) in &self.subscriptions {
            let Some(exchange_config) = state.exchange_configs.get(exchange_id) else {
                continue;
            };
            let snapshot = ExchangeMarketSnapshot::build(exchange_config, &state.market_configs);
            let changed = tx.send_if_modified(|current| {
                if **current == snapshot {
                    return false;
                }
                *current = Arc::new(snapshot);
                true
            });
            if changed {
                tracing::info!(
                    exchange = %exchange_id,
                    markets = exchange_config.market_to_market_config.len(),
                    "Exchange market config updated"
                );
            }
        }

        emit_config_metrics(&state);
        Ok(transformed.market_param_errors)
    }

    pub fn get_exchange_market_config(&self, id: &ExchangeId) -> Result<MutableExchangeMarketConfig> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .exchange_configs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownExchange(id.clone()))
    }

    /// Market configs in the order requested.
    pub fn get_market_configs(&self, markets: &[MarketId]) -> Result<Vec<MutableMarketConfig>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        markets
            .iter()
            .map(|id| {
                state
                    .market_configs
                    .get(id)
                    .cloned()
                    .ok_or(Error::UnknownMarket(*id))
            })
            .collect()
    }
}

fn emit_config_metrics(state: &ConfigState) {
    metrics::CONFIGURED_MARKETS.set(state.market_configs.len() as i64);
    for (exchange_id, config) in &state.exchange_configs {
        metrics::CONFIGURED_MARKETS_PER_EXCHANGE
            .with_label_values(&[exchange_id.as_str()])
            .set(config.market_to_market_config.len() as i64);
    }
}
