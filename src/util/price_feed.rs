/// Quote-asset USD price from the Binance spot ticker, cached for 30s

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::util::retry::{is_transient, RetryPolicy};

const CACHE_DURATION_SECS: u64 = 30;
const API_TIMEOUT_SECS: u64 = 30;

/// Market data used only to denominate entry prices in quote terms
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Last price of `symbol` against USDT, e.g. `SOL`
    async fn get_price(&self, symbol: &str) -> Result<f64>;
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

pub struct BinancePriceFeed {
    client: Client,
    api_url: String,
    cache: DashMap<String, (f64, Instant)>,
    cache_ttl: Duration,
    retry: RetryPolicy,
}

impl BinancePriceFeed {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(API_TIMEOUT_SECS))
                .build()
                .context("Failed to create HTTP client")?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            cache: DashMap::new(),
            cache_ttl: Duration::from_secs(CACHE_DURATION_SECS),
            retry: RetryPolicy::default(),
        })
    }

    /// `SOL` -> `SOLUSDT`
    pub fn ticker_symbol(symbol: &str) -> String {
        let base = symbol.trim().to_uppercase();
        let base = base.strip_suffix("/USDT").unwrap_or(&base);
        format!("{}USDT", base)
    }

    fn cached(&self, ticker: &str) -> Option<f64> {
        self.cache
            .get(ticker)
            .filter(|entry| entry.1.elapsed() < self.cache_ttl)
            .map(|entry| entry.0)
    }

    async fn fetch(&self, ticker: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price", self.api_url);
        let ticker_price: TickerPrice = self
            .client
            .get(&url)
            .query(&[("symbol", ticker)])
            .send()
            .await
            .context("Failed to request Binance ticker")?
            .error_for_status()
            .context("Binance ticker request rejected")?
            .json()
            .await
            .context("Failed to parse Binance ticker")?;

        parse_price(&ticker_price)
    }
}

fn parse_price(ticker: &TickerPrice) -> Result<f64> {
    let price: f64 = ticker
        .price
        .parse()
        .with_context(|| format!("invalid price {:?} for {}", ticker.price, ticker.symbol))?;
    anyhow::ensure!(price > 0.0, "non-positive price for {}", ticker.symbol);
    Ok(price)
}

#[async_trait]
impl PriceSource for BinancePriceFeed {
    async fn get_price(&self, symbol: &str) -> Result<f64> {
        let ticker = Self::ticker_symbol(symbol);
        if let Some(price) = self.cached(&ticker) {
            return Ok(price);
        }

        let price = self
            .retry
            .run("binance ticker", |_| self.fetch(&ticker), is_transient)
            .await?;
        self.cache.insert(ticker.clone(), (price, Instant::now()));
        debug!(%ticker, price, "💵 Quote price refreshed");
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_usdt_ticker() {
        assert_eq!(BinancePriceFeed::ticker_symbol("SOL"), "SOLUSDT");
        assert_eq!(BinancePriceFeed::ticker_symbol("sol/usdt"), "SOLUSDT");
    }

    #[test]
    fn parses_ticker_price() {
        let ticker: TickerPrice =
            serde_json::from_str(r#"{"symbol":"SOLUSDT","price":"139.87000000"}"#).unwrap();
        assert!((parse_price(&ticker).unwrap() - 139.87).abs() < 1e-9);

        let zero = TickerPrice {
            symbol: "SOLUSDT".into(),
            price: "0".into(),
        };
        assert!(parse_price(&zero).is_err());
    }

    #[tokio::test]
    async fn serves_fresh_cache_without_network() {
        let feed = BinancePriceFeed::new("http://127.0.0.1:9").unwrap();
        feed.cache.insert("SOLUSDT".into(), (150.0, Instant::now()));
        assert_eq!(feed.get_price("SOL").await.unwrap(), 150.0);
    }
}
