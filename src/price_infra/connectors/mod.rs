pub mod binance;
pub mod coinbase;
pub mod kraken;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use crate::error::{Error, Result};
use crate::types::exchange::ExchangeQueryDetails;
use crate::types::ids::ExchangeId;
use crate::types::market::MAX_EXPONENT_MAGNITUDE;

pub const EXCHANGE_ID_BINANCE: &str = "Binance";
pub const EXCHANGE_ID_COINBASE_PRO: &str = "CoinbasePro";
pub const EXCHANGE_ID_KRAKEN: &str = "Kraken";

/// Prices parsed out of one exchange response, keyed by ticker.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PriceFunctionOutput {
    pub ticker_to_price: HashMap<String, Decimal>,
    /// Tickers that were requested but missing from the response, with the reason.
    pub unavailable_tickers: HashMap<String, String>,
}

/// Parses a raw exchange response into decimal prices.
pub trait PriceFunction: Send + Sync {
    fn parse(&self, body: &str, tickers: &[String]) -> Result<PriceFunctionOutput>;

    /// How several tickers are substituted into a multi-market url.
    fn format_tickers(&self, tickers: &[String]) -> String {
        tickers.join(",")
    }
}

/// Query details for every exchange this build knows how to query.
pub fn static_exchange_details() -> HashMap<ExchangeId, ExchangeQueryDetails> {
    let details = [
        ExchangeQueryDetails {
            exchange: ExchangeId::from(EXCHANGE_ID_BINANCE),
            url: "https://data-api.binance.vision/api/v3/ticker/24hr?symbols=[$]".to_string(),
            is_multi_market: true,
            price_function: Arc::new(binance::BinancePriceFunction),
        },
        ExchangeQueryDetails {
            exchange: ExchangeId::from(EXCHANGE_ID_COINBASE_PRO),
            url: "https://api.pro.coinbase.com/products/$/ticker".to_string(),
            is_multi_market: false,
            price_function: Arc::new(coinbase::CoinbasePriceFunction),
        },
        ExchangeQueryDetails {
            exchange: ExchangeId::from(EXCHANGE_ID_KRAKEN),
            url: "https://api.kraken.com/0/public/Ticker?pair=$".to_string(),
            is_multi_market: true,
            price_function: Arc::new(kraken::KrakenPriceFunction),
        },
    ];

    details
        .into_iter()
        .map(|d| (d.exchange.clone(), d))
        .collect()
}

/// Parses a strictly positive decimal string.
pub fn parse_positive_decimal(value: &str) -> Result<Decimal> {
    let parsed = Decimal::from_str(value.trim())
        .map_err(|e| Error::InvalidPrice(format!("{}: {}", value, e)))?;
    if parsed <= Decimal::ZERO {
        return Err(Error::InvalidPrice(format!("{} is not positive", value)));
    }
    Ok(parsed)
}

/// Median of a list of decimals, averaging the middle pair for even counts.
pub fn median_decimal(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / Decimal::TWO)
    } else {
        Some(sorted[mid])
    }
}

/// Median of the bid, ask and last prices reported for a ticker.
pub fn median_of_quotes(bid: &str, ask: &str, last: &str) -> Result<Decimal> {
    let quotes = [
        parse_positive_decimal(bid)?,
        parse_positive_decimal(ask)?,
        parse_positive_decimal(last)?,
    ];
    median_decimal(&quotes).ok_or_else(|| Error::InvalidPrice("no quotes".to_string()))
}

pub fn invert(value: Decimal) -> Result<Decimal> {
    Decimal::ONE
        .checked_div(value)
        .ok_or_else(|| Error::Overflow { operation: format!("invert {}", value) })
}

/// Converts a decimal price to the fixed-point integer representation used
/// on chain, i.e. `value * 10^(-exponent)` truncated towards zero.
pub fn to_fixed_point(value: Decimal, exponent: i32) -> Result<u64> {
    let overflow = || Error::Overflow {
        operation: format!("shift {} by exponent {}", value, exponent),
    };

    if exponent.unsigned_abs() > MAX_EXPONENT_MAGNITUDE {
        return Err(overflow());
    }
    let mut shifted = value;
    for _ in 0..exponent.unsigned_abs() {
        shifted = if exponent < 0 {
            shifted.checked_mul(Decimal::TEN)
        } else {
            shifted.checked_div(Decimal::TEN)
        }
        .ok_or_else(overflow)?;
    }

    if shifted.is_sign_negative() {
        return Err(Error::InvalidPrice(format!("{} is negative", value)));
    }
    shifted.trunc().to_u64().ok_or_else(overflow)
}

/// Converts a fixed-point integer price back to a decimal.
pub fn from_fixed_point(price: u64, exponent: i32) -> Result<Decimal> {
    to_decimal_shifted(Decimal::from(price), exponent)
}

fn to_decimal_shifted(value: Decimal, exponent: i32) -> Result<Decimal> {
    let overflow = || Error::Overflow {
        operation: format!("shift {} by exponent {}", value, exponent),
    };

    if exponent.unsigned_abs() > MAX_EXPONENT_MAGNITUDE {
        return Err(overflow());
    }
    let mut shifted = value;
    for _ in 0..exponent.unsigned_abs() {
        shifted = if exponent < 0 {
            shifted.checked_div(Decimal::TEN)
        } else {
            shifted.checked_mul(Decimal::TEN)
        }
        .ok_or_else(overflow)?;
    }
    Ok(shifted)
}

/// Marks every requested ticker absent from `output` as unavailable.
pub(crate) fn mark_missing_tickers(output: &mut PriceFunctionOutput, tickers: &[String]) {
    for ticker in tickers {
        if !output.ticker_to_price.contains_key(ticker)
            && !output.unavailable_tickers.contains_key(ticker)
        {
            output
                .unavailable_tickers
                .insert(ticker.clone(), "no listing found for ticker".to_string());
        }
    }
}
