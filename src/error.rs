use std::time::Duration;
use thiserror::Error;
use crate::types::ids::{ExchangeId, MarketId};
use crate::types::timestamp::Timestamp;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Configuration Errors
    #[error("exchangeIds must not be empty")]
    NoExchanges,

    #[error("duplicate exchange id: {0}")]
    DuplicateExchangeId(ExchangeId),

    #[error("no exchange details exists for exchangeId: {0}")]
    MissingExchangeDetails(ExchangeId),

    #[error("exchange not found: {0}")]
    UnknownExchange(ExchangeId),

    #[error("market not found: {0}")]
    UnknownMarket(MarketId),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Connection Errors
    #[error("Failed to create connection to {target}: {reason}")]
    ConnectionFailed {
        target: String,
        reason: String,
    },

    // Exchange Query Errors
    #[error("exchange {exchange} query timed out after {timeout:?}")]
    QueryTimeout {
        exchange: ExchangeId,
        timeout: Duration,
    },

    #[error("Unexpected response status code of: {status}")]
    ExchangeServerError { status: u16 },

    #[error("connection reset by peer: {0}")]
    ConnectionReset(String),

    #[error("market {market_id} unavailable on exchange: {reason}")]
    MarketUnavailable {
        market_id: MarketId,
        reason: String,
    },

    #[error("invalid price of 0 for market {market_id}")]
    ZeroPrice { market_id: MarketId },

    #[error("exchange error: {0}")]
    ExchangeError(String),

    #[error("Unexpected response status code of: {0}")]
    UnexpectedStatus(u16),

    #[error("Deserialization failed: {0}")]
    DeserializationError(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Overflow in {operation}")]
    Overflow { operation: String },

    // Market Param Errors
    #[error("invalid market param {market_id}: {reason}")]
    InvalidMarketParam {
        market_id: MarketId,
        reason: String,
    },

    #[error("invalid exchange config json for market param {market_id}: {reason}")]
    InvalidExchangeConfigJson {
        market_id: MarketId,
        reason: String,
    },

    #[error("invalid market params: duplicate market id {0}")]
    DuplicateMarketId(MarketId),

    // Downstream Errors
    #[error("Market price update has length of 0")]
    EmptyMarketPriceUpdate,

    #[error("rpc error: {0}")]
    RpcError(String),

    // Health Errors
    #[error("no successful update has occurred")]
    NoSuccessfulUpdate,

    #[error("last update failed at {timestamp}: {error}")]
    LastUpdateFailed {
        timestamp: Timestamp,
        error: String,
    },

    #[error("last successful update occurred at {last_success}, which is more than {max_delay:?} ago")]
    StaleUpdate {
        last_success: Timestamp,
        max_delay: Duration,
    },

    #[error("service {0} already registered")]
    ServiceAlreadyRegistered(String),

    #[error("health monitor has been stopped")]
    MonitorStopped,

    // Lifecycle Errors
    #[error("daemon already started")]
    AlreadyStarted,

    #[error("daemon has been stopped")]
    DaemonStopped,

    #[error("task {name} failed: {reason}")]
    TaskFailed { name: String, reason: String },

    #[error("Metrics error: {0}")]
    MetricsError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failed exchange query, used to pick log severity and
/// telemetry labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    Timeout,
    ExchangeServerError,
    ConnectionReset,
    MarketUnavailable,
    Other,
}

impl QueryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::Timeout => "timeout",
            QueryErrorKind::ExchangeServerError => "exchange_server_error",
            QueryErrorKind::ConnectionReset => "connection_reset",
            QueryErrorKind::MarketUnavailable => "market_unavailable",
            QueryErrorKind::Other => "other",
        }
    }

    /// Routine failures are expected from public exchange APIs and are not
    /// logged as errors.
    pub fn is_routine(&self) -> bool {
        !matches!(self, QueryErrorKind::Other)
    }
}

// Substrings of error messages that exchanges return when they are having
// transient server-side trouble.
const GENERIC_EXCHANGE_ERROR_MARKERS: [&str; 4] = [
    "server sent GOAWAY and closed the connection",
    "internal error",
    "internal_error",
    "unexpected response status code of: 5",
];

pub fn is_generic_exchange_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    GENERIC_EXCHANGE_ERROR_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

impl Error {
    pub fn classify(&self) -> QueryErrorKind {
        match self {
            Error::QueryTimeout { .. } => QueryErrorKind::Timeout,
            Error::ExchangeServerError { .. } => QueryErrorKind::ExchangeServerError,
            Error::ConnectionReset(_) => QueryErrorKind::ConnectionReset,
            Error::MarketUnavailable { .. } => QueryErrorKind::MarketUnavailable,
            Error::ExchangeError(msg) if is_generic_exchange_error(msg) => {
                QueryErrorKind::ExchangeServerError
            }
            Error::ExchangeError(msg) if msg.to_lowercase().contains("connection reset") => {
                QueryErrorKind::ConnectionReset
            }
            _ => QueryErrorKind::Other,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::ConfigError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DeserializationError(e.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(e: prometheus::Error) -> Self {
        Error::MetricsError(e.to_string())
    }
}
