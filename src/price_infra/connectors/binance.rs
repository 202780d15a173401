use serde::Deserialize;
use crate::error::{Error, Result};
use crate::price_infra::connectors::{mark_missing_tickers, median_of_quotes, PriceFunction, PriceFunctionOutput};

/// Parses the Binance 24h ticker endpoint, which answers for many symbols at once.
pub struct BinancePriceFunction;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTicker {
    symbol: String,
    last_price: String,
    bid_price: String,
    ask_price: String,
}

impl PriceFunction for BinancePriceFunction {
    fn parse(&self, body: &str, tickers: &[String]) -> Result<PriceFunctionOutput> {
        let data: Vec<BinanceTicker> = serde_json::from_str(body)
            .map_err(|e| Error::DeserializationError(format!("binance: {}", e)))?;

        let mut output = PriceFunctionOutput::default();
        for ticker in data {
            if !tickers.contains(&ticker.symbol) {
                continue;
            }
            match median_of_quotes(&ticker.bid_price, &ticker.ask_price, &ticker.last_price) {
                Ok(price) => {
                    output.ticker_to_price.insert(ticker.symbol, price);
                }
                Err(e) => {
                    output.unavailable_tickers.insert(ticker.symbol, e.to_string());
                }
            }
        }

        mark_missing_tickers(&mut output, tickers);
        Ok(output)
    }

    fn format_tickers(&self, tickers: &[String]) -> String {
        tickers
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(",")
    }
}
