//! Market data client for the Binance public REST API.
//!
//! Symbols are handled in "BASE/QUOTE" form everywhere else in the system and
//! translated to the exchange's compact form only at this boundary.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("ticker request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no ticker data returned")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct Ticker {
    pub last: f64,
    pub change_24h: Option<f64>,
    pub timestamp: Option<i64>,
}

#[async_trait::async_trait]
pub trait MarketData: Send + Sync {
    /// Fetch current tickers for the given "BASE/QUOTE" symbols. Partial
    /// results are acceptable; a total failure is an error.
    async fn fetch_tickers(&self, symbols: &[String]) -> Result<HashMap<String, Ticker>, MarketError>;
}

#[derive(Debug, Clone)]
pub struct BinanceMarketClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Binance24hTicker {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: Option<String>,
    #[serde(rename = "closeTime")]
    close_time: Option<i64>,
}

pub fn to_exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

impl BinanceMarketClient {
    pub fn new(base_url: &str) -> Self {
        BinanceMarketClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_batch(&self, exchange_symbols: &[String]) -> Result<Vec<Binance24hTicker>, MarketError> {
        let symbols_param = serde_json::to_string(exchange_symbols).unwrap_or_default();
        let response = self
            .client
            .get(format!("{}/api/v3/ticker/24hr", self.base_url))
            .query(&[("symbols", symbols_param)])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    async fn fetch_single(&self, exchange_symbol: &str) -> Result<Binance24hTicker, MarketError> {
        let response = self
            .client
            .get(format!("{}/api/v3/ticker/24hr", self.base_url))
            .query(&[("symbol", exchange_symbol)])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    /// Raw OHLCV rows as the exchange returns them:
    /// `[open_time, open, high, low, close, volume, close_time, ...]`.
    pub async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Vec<serde_json::Value>>, MarketError> {
        let response = self
            .client
            .get(format!("{}/api/v3/klines", self.base_url))
            .query(&[
                ("symbol", to_exchange_symbol(symbol)),
                ("interval", timeframe.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        if rows.is_empty() {
            return Err(MarketError::Empty);
        }
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl MarketData for BinanceMarketClient {
    async fn fetch_tickers(&self, symbols: &[String]) -> Result<HashMap<String, Ticker>, MarketError> {
        // Map the exchange's compact form back to the configured symbol.
        let reverse: HashMap<String, String> = symbols
            .iter()
            .map(|symbol| (to_exchange_symbol(symbol), symbol.clone()))
            .collect();
        let exchange_symbols: Vec<String> = reverse.keys().cloned().collect();

        let raw = match self.fetch_batch(&exchange_symbols).await {
            Ok(raw) => raw,
            Err(err) => {
                // One unknown symbol fails the whole batch request; retry each
                // symbol individually so the others still get a mark.
                warn!("Batch ticker fetch failed, falling back to per-symbol: {}", err);
                let mut collected = Vec::new();
                for exchange_symbol in &exchange_symbols {
                    match self.fetch_single(exchange_symbol).await {
                        Ok(ticker) => collected.push(ticker),
                        Err(err) => warn!("Ticker fetch failed for {}: {}", exchange_symbol, err),
                    }
                }
                collected
            }
        };

        let mut tickers = HashMap::new();
        for item in raw {
            let Some(symbol) = reverse.get(&item.symbol) else {
                continue;
            };
            let Ok(last) = item.last_price.parse::<f64>() else {
                continue;
            };
            let change_24h = item
                .price_change_percent
                .as_deref()
                .and_then(|raw| raw.parse::<f64>().ok());
            tickers.insert(
                symbol.clone(),
                Ticker {
                    last,
                    change_24h,
                    timestamp: item.close_time,
                },
            );
        }

        if tickers.is_empty() {
            return Err(MarketError::Empty);
        }

        Ok(tickers)
    }
}
