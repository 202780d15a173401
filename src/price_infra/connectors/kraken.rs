use std::collections::HashMap;
use serde::Deserialize;
use crate::error::{Error, Result};
use crate::price_infra::connectors::{mark_missing_tickers, median_of_quotes, PriceFunction, PriceFunctionOutput};

/// Parses the Kraken public ticker endpoint.
pub struct KrakenPriceFunction;

#[derive(Deserialize)]
struct KrakenResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, KrakenTicker>,
}

// a = ask [price, whole lot volume, lot volume], b = bid, c = last trade [price, volume]
#[derive(Deserialize)]
struct KrakenTicker {
    a: Vec<String>,
    b: Vec<String>,
    c: Vec<String>,
}

impl KrakenTicker {
    fn first<'a>(field: &'a [String], name: &str) -> Result<&'a str> {
        field
            .first()
            .map(String::as_str)
            .ok_or_else(|| Error::InvalidPrice(format!("missing {} price", name)))
    }
}

impl PriceFunction for KrakenPriceFunction {
    fn parse(&self, body: &str, tickers: &[String]) -> Result<PriceFunctionOutput> {
        let data: KrakenResponse = serde_json::from_str(body)
            .map_err(|e| Error::DeserializationError(format!("kraken: {}", e)))?;

        if !data.error.is_empty() {
            return Err(Error::ExchangeError(format!("kraken: {}", data.error.join(", "))));
        }

        let mut output = PriceFunctionOutput::default();
        for (ticker, quote) in data.result {
            if !tickers.contains(&ticker) {
                continue;
            }
            let price = KrakenTicker::first(&quote.b, "bid").and_then(|bid| {
                let ask = KrakenTicker::first(&quote.a, "ask")?;
                let last = KrakenTicker::first(&quote.c, "last")?;
                median_of_quotes(bid, ask, last)
            });
            match price {
                Ok(price) => {
                    output.ticker_to_price.insert(ticker, price);
                }
                Err(e) => {
                    output.unavailable_tickers.insert(ticker, e.to_string());
                }
            }
        }

        mark_missing_tickers(&mut output, tickers);
        Ok(output)
    }
}
