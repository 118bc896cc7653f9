use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::core::Bar;
use crate::util::retry::{is_transient, RetryPolicy};
use crate::util::schedule::KlineInterval;

/// USDT, the conversion currency for every CMC quote
const CONVERT_ID: &str = "2781";
const CMC_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000Z";
/// Upper bound on ohlcv pages per token and refresh
const MAX_PAGES: usize = 20;

/// Which bars to request for a pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchWindow {
    /// Page backwards from now until at least `min_count` bars are collected
    Full { min_count: usize },
    /// Page forwards from the given open time to now
    Since(DateTime<Utc>),
}

/// Pair resolution and kline backfill as seen by the refresh subsystem
#[async_trait]
pub trait PairDataSource: Send + Sync {
    /// Most liquid pair address trading `token`, if any
    async fn resolve_pair(&self, network: &str, token: &str) -> Result<Option<String>>;

    async fn fetch_bars(
        &self,
        network: &str,
        pair: &str,
        interval: KlineInterval,
        window: FetchWindow,
    ) -> Result<Vec<Bar>>;
}

#[derive(Debug, Deserialize)]
struct OhlcvSeries {
    #[serde(default)]
    quotes: Vec<OhlcvQuote>,
}

#[derive(Debug, Deserialize)]
struct OhlcvQuote {
    time_open: String,
    #[serde(default)]
    quote: Vec<OhlcvValues>,
}

#[derive(Debug, Deserialize)]
struct OhlcvValues {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotPair {
    pub contract_address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    quote: Vec<SpotPairQuote>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotPairQuote {
    #[serde(default)]
    liquidity: Option<f64>,
}

impl SpotPair {
    pub fn liquidity(&self) -> f64 {
        self.quote.first().and_then(|q| q.liquidity).unwrap_or(0.0)
    }
}

/// CoinMarketCap v4 DEX API client
pub struct CmcClient {
    client: Client,
    base_url: String,
    api_keys: Vec<String>,
    current_key: AtomicUsize,
    retry: RetryPolicy,
}

impl CmcClient {
    pub fn new(base_url: impl Into<String>, api_keys: Vec<String>) -> Result<Self> {
        if api_keys.is_empty() {
            bail!("at least one CMC API key is required");
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_keys,
            current_key: AtomicUsize::new(0),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One GET, rotating through the API keys while they are throttled
    async fn get_once(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut throttled = 0;
        loop {
            let index = self.current_key.load(Ordering::Relaxed) % self.api_keys.len();
            let response = self
                .client
                .get(&url)
                .header("X-CMC_PRO_API_KEY", &self.api_keys[index])
                .header("Accept", "application/json")
                .query(params)
                .send()
                .await
                .with_context(|| format!("Failed to request {}", endpoint))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS && throttled + 1 < self.api_keys.len() {
                throttled += 1;
                self.current_key.store(index + 1, Ordering::Relaxed);
                warn!(key_index = index, "🔑 CMC key throttled, rotating");
                continue;
            }

            let body: Value = response
                .error_for_status()
                .with_context(|| format!("CMC rejected {}", endpoint))?
                .json()
                .await
                .context("Failed to parse CMC response")?;
            if let Some(credits) = body.pointer("/status/credit_count").and_then(Value::as_u64) {
                debug!(endpoint, credits, "CMC credits consumed");
            }
            return Ok(body);
        }
    }

    async fn get(&self, endpoint: &str, params: Vec<(&str, String)>) -> Result<Value> {
        self.retry
            .run(endpoint, |_| self.get_once(endpoint, &params), is_transient)
            .await
    }

    /// Top spot pairs by liquidity where `token` is the base asset, falling
    /// back to pairs where it is the quote asset
    pub async fn spot_pairs(&self, network: &str, token: &str) -> Result<Vec<SpotPair>> {
        for side in ["base_asset_contract_address", "quote_asset_contract_address"] {
            let params = vec![
                ("network_slug", network.to_string()),
                ("convert_id", CONVERT_ID.to_string()),
                ("sort", "liquidity".to_string()),
                ("sort_dir", "desc".to_string()),
                ("limit", "2".to_string()),
                (side, token.to_string()),
            ];
            let body = self.get("/dex/spot-pairs/latest", params).await?;
            let pairs = parse_spot_pairs(&body)?;
            if !pairs.is_empty() {
                return Ok(pairs);
            }
        }
        Ok(Vec::new())
    }

    async fn ohlcv_page(
        &self,
        network: &str,
        pair: &str,
        interval: KlineInterval,
        page_size: usize,
        bound: (&'static str, DateTime<Utc>),
    ) -> Result<Vec<Bar>> {
        let label = interval.to_string();
        let params = vec![
            ("network_slug", network.to_string()),
            ("contract_address", pair.to_string()),
            ("interval", label.clone()),
            ("time_period", label),
            ("count", page_size.to_string()),
            ("convert_id", CONVERT_ID.to_string()),
            ("skip_invalid", "true".to_string()),
            (bound.0, bound.1.format(CMC_TIME_FORMAT).to_string()),
        ];
        let body = self.get("/dex/pairs/ohlcv/historical", params).await?;
        parse_ohlcv(&body)
    }

    /// Pages of `page_size` bars in the requested direction, ascending and
    /// de-duplicated by open time
    pub async fn ohlcv(
        &self,
        network: &str,
        pair: &str,
        interval: KlineInterval,
        window: FetchWindow,
        page_size: usize,
    ) -> Result<Vec<Bar>> {
        let step = interval.duration();
        let mut collected: Vec<Bar> = Vec::new();

        match window {
            FetchWindow::Since(start) => {
                let mut cursor = start;
                for _ in 0..MAX_PAGES {
                    let page = self
                        .ohlcv_page(network, pair, interval, page_size, ("time_start", cursor))
                        .await?;
                    let Some(last) = page.last().map(|b| b.candle_begin_time) else {
                        break;
                    };
                    collected = crate::util::time_series::merge_bars(collected, page);
                    if last + step <= cursor || last + step > Utc::now() {
                        break;
                    }
                    cursor = last + step;
                }
            }
            FetchWindow::Full { min_count } => {
                let mut cursor = Utc::now();
                for _ in 0..MAX_PAGES {
                    let page = self
                        .ohlcv_page(network, pair, interval, page_size, ("time_end", cursor))
                        .await?;
                    let Some(first) = page.first().map(|b| b.candle_begin_time) else {
                        break;
                    };
                    collected = crate::util::time_series::merge_bars(collected, page);
                    if collected.len() >= min_count || first - step >= cursor {
                        break;
                    }
                    cursor = first - step;
                }
            }
        }
        Ok(collected)
    }
}

/// Paired with a page size, the client is a full [`PairDataSource`]
pub struct CmcPairSource {
    client: CmcClient,
    page_size: usize,
}

impl CmcPairSource {
    pub fn new(client: CmcClient, page_size: usize) -> Self {
        Self { client, page_size }
    }
}

#[async_trait]
impl PairDataSource for CmcPairSource {
    async fn resolve_pair(&self, network: &str, token: &str) -> Result<Option<String>> {
        let pairs = self.client.spot_pairs(network, token).await?;
        let best = largest_liquidity(pairs);
        match &best {
            Some(pair) => info!(
                token,
                pair = %pair.contract_address,
                name = %pair.name,
                liquidity = pair.liquidity(),
                "🔗 Pair resolved"
            ),
            None => warn!(token, network, "No trading pair found"),
        }
        Ok(best.map(|p| p.contract_address))
    }

    async fn fetch_bars(
        &self,
        network: &str,
        pair: &str,
        interval: KlineInterval,
        window: FetchWindow,
    ) -> Result<Vec<Bar>> {
        self.client
            .ohlcv(network, pair, interval, window, self.page_size)
            .await
    }
}

pub fn parse_spot_pairs(body: &Value) -> Result<Vec<SpotPair>> {
    match body.get("data") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(data) => serde_json::from_value(data.clone()).context("unexpected spot pair schema"),
    }
}

pub fn largest_liquidity(pairs: Vec<SpotPair>) -> Option<SpotPair> {
    pairs
        .into_iter()
        .max_by(|a, b| a.liquidity().total_cmp(&b.liquidity()))
}

/// Bars from `data[0].quotes[].quote[0]`; quotes missing a price field are skipped
pub fn parse_ohlcv(body: &Value) -> Result<Vec<Bar>> {
    let Some(first) = body.get("data").and_then(Value::as_array).and_then(|d| d.first()) else {
        return Ok(Vec::new());
    };
    let series: OhlcvSeries =
        serde_json::from_value(first.clone()).context("unexpected ohlcv schema")?;

    let mut bars = Vec::with_capacity(series.quotes.len());
    for item in series.quotes {
        let begin = DateTime::parse_from_rfc3339(&item.time_open)
            .with_context(|| format!("bad time_open {:?}", item.time_open))?
            .with_timezone(&Utc);
        let Some(values) = item.quote.first() else {
            continue;
        };
        let (Some(open), Some(high), Some(low), Some(close)) =
            (values.open, values.high, values.low, values.close)
        else {
            debug!(time_open = %item.time_open, "Skipping incomplete quote");
            continue;
        };
        bars.push(Bar {
            candle_begin_time: begin,
            open,
            high,
            low,
            close,
            volume: values.volume.unwrap_or(0.0),
        });
    }
    bars.sort_by_key(|b| b.candle_begin_time);
    bars.dedup_by_key(|b| b.candle_begin_time);
    Ok(bars)
}

/// Bars of a full fetch are only useful back to this point
pub fn full_fetch_horizon(now: DateTime<Utc>, interval: KlineInterval, min_count: usize) -> DateTime<Utc> {
    now - Duration::minutes(interval.minutes() as i64 * min_count as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn parses_ohlcv_quotes() {
        let body = json!({
            "status": { "credit_count": 3 },
            "data": [{
                "name": "WIF/SOL",
                "contract_address": "pairX",
                "quotes": [
                    { "time_open": "2025-04-21T08:40:00.000Z",
                      "quote": [{ "open": 2.0, "high": 2.5, "low": 1.9, "close": 2.4, "volume": 10.0 }] },
                    { "time_open": "2025-04-21T08:35:00.000Z",
                      "quote": [{ "open": 1.0, "high": 2.1, "low": 0.9, "close": 2.0, "volume": 12.0 }] },
                    { "time_open": "2025-04-21T08:45:00.000Z",
                      "quote": [{ "open": null, "high": null, "low": null, "close": null }] }
                ]
            }]
        });
        let bars = parse_ohlcv(&body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(
            bars[0].candle_begin_time,
            Utc.with_ymd_and_hms(2025, 4, 21, 8, 35, 0).unwrap()
        );
        assert_eq!(bars[1].close, 2.4);
    }

    #[test]
    fn empty_ohlcv_data_is_no_bars() {
        assert!(parse_ohlcv(&json!({ "data": [] })).unwrap().is_empty());
        assert!(parse_ohlcv(&json!({ "status": {} })).unwrap().is_empty());
    }

    #[test]
    fn picks_most_liquid_pair() {
        let body = json!({
            "data": [
                { "contract_address": "thin", "name": "A/USDC", "quote": [{ "liquidity": 1200.0 }] },
                { "contract_address": "deep", "name": "A/SOL", "quote": [{ "liquidity": 95000.0 }] },
                { "contract_address": "bare", "name": "A/X" }
            ]
        });
        let pairs = parse_spot_pairs(&body).unwrap();
        let best = largest_liquidity(pairs).unwrap();
        assert_eq!(best.contract_address, "deep");
        assert!(largest_liquidity(Vec::new()).is_none());
    }

    #[test]
    fn requires_an_api_key() {
        assert!(CmcClient::new("https://pro-api.coinmarketcap.com/v4", Vec::new()).is_err());
    }

    #[test]
    fn full_horizon_covers_min_count() {
        let now = Utc.with_ymd_and_hms(2025, 4, 21, 10, 0, 0).unwrap();
        let interval: KlineInterval = "5m".parse().unwrap();
        assert_eq!(
            full_fetch_horizon(now, interval, 14),
            Utc.with_ymd_and_hms(2025, 4, 21, 8, 50, 0).unwrap()
        );
    }
}
