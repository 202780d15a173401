use serde::Deserialize;
use crate::error::{Error, Result};
use crate::price_infra::connectors::{median_of_quotes, PriceFunction, PriceFunctionOutput};

/// Parses the Coinbase product ticker endpoint (one product per request).
pub struct CoinbasePriceFunction;

#[derive(Deserialize)]
struct CoinbaseTicker {
    price: String,
    bid: String,
    ask: String,
}

impl PriceFunction for CoinbasePriceFunction {
    fn parse(&self, body: &str, tickers: &[String]) -> Result<PriceFunctionOutput> {
        let [ticker] = tickers else {
            return Err(Error::ExchangeError(format!(
                "coinbase: expected exactly 1 ticker, got {}",
                tickers.len()
            )));
        };

        let data: CoinbaseTicker = serde_json::from_str(body)
            .map_err(|e| Error::DeserializationError(format!("coinbase: {}", e)))?;

        let mut output = PriceFunctionOutput::default();
        match median_of_quotes(&data.bid, &data.ask, &data.price) {
            Ok(price) => {
                output.ticker_to_price.insert(ticker.clone(), price);
            }
            Err(e) => {
                output.unavailable_tickers.insert(ticker.clone(), e.to_string());
            }
        }
        Ok(output)
    }
}
