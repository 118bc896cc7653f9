use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::{PoolConfig, PoolKind};
use crate::core::PoolCandidate;
use crate::util::retry::{is_transient, RetryPolicy};

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// One GMGN rank row; hot and bluechip rows carry token fields directly
#[derive(Debug, Deserialize)]
struct RankRow {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    liquidity: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    holder_count: Option<u64>,
    #[serde(default)]
    open_timestamp: Option<i64>,
}

/// New-pair rows: the row address is the pair, token fields sit in `base_token_info`
#[derive(Debug, Deserialize)]
struct NewPairRow {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    open_timestamp: Option<i64>,
    base_token_info: RankRow,
}

/// Pool discovery against gmgn.ai
pub struct PoolScanner {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl PoolScanner {
    pub fn new(base_url: impl Into<String>, proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }
        Ok(Self {
            client: builder.build().context("Failed to create HTTP client")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn endpoint(&self, pool: &PoolConfig) -> String {
        match pool.kind {
            PoolKind::Hot => format!(
                "{}/defi/quotation/v1/rank/{}/swaps/{}",
                self.base_url, pool.chain, pool.period
            ),
            PoolKind::New => format!(
                "{}/defi/quotation/v1/pairs/{}/new_pairs/{}",
                self.base_url, pool.chain, pool.period
            ),
            PoolKind::Bluechip => format!("{}/api/v1/bluechip_rank/{}", self.base_url, pool.chain),
        }
    }

    pub fn query(pool: &PoolConfig) -> Vec<(String, String)> {
        let mut query = vec![
            ("orderby".to_string(), pool.order_by.clone()),
            ("direction".to_string(), pool.direction.clone()),
        ];
        query.extend(pool.filters.iter().map(|f| ("filters[]".to_string(), f.clone())));
        query.extend(
            pool.market_ranges
                .iter()
                .map(|(key, value)| (key.clone(), value.to_query())),
        );
        query
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        let agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(REFERER, HeaderValue::from_static("https://gmgn.ai/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://gmgn.ai"));
        headers
    }

    async fn fetch(&self, url: &str, query: &[(String, String)]) -> Result<Value> {
        self.client
            .get(url)
            .headers(Self::headers())
            .query(query)
            .send()
            .await
            .context("Failed to request GMGN pool")?
            .error_for_status()
            .context("GMGN pool request rejected")?
            .json()
            .await
            .context("Failed to parse GMGN pool response")
    }
}

/// Source of discovery snapshots for an account's pool config
#[async_trait]
pub trait PoolSource: Send + Sync {
    /// Fetch the pool described by `pool`; `chain` is the trading chain
    /// stamped on each candidate
    async fn scan(&self, pool: &PoolConfig, chain: &str) -> Result<Vec<PoolCandidate>>;
}

#[async_trait]
impl PoolSource for PoolScanner {
    #[instrument(skip(self, pool), fields(kind = pool.kind.as_str(), source = %pool.source))]
    async fn scan(&self, pool: &PoolConfig, chain: &str) -> Result<Vec<PoolCandidate>> {
        if pool.source != "gmgn" {
            bail!("unsupported pool source {:?}", pool.source);
        }
        let url = self.endpoint(pool);
        let query = Self::query(pool);
        let body = self
            .retry
            .run("gmgn pool", |_| self.fetch(&url, &query), is_transient)
            .await?;

        let candidates = parse_pool(pool.kind, &body, chain, Utc::now())?;
        info!(chain, pools = candidates.len(), "🔎 Pool fetched");
        Ok(candidates)
    }
}

/// Convert a GMGN response body into candidates, dropping rows without an address
pub fn parse_pool(
    kind: PoolKind,
    body: &Value,
    chain: &str,
    now: DateTime<Utc>,
) -> Result<Vec<PoolCandidate>> {
    let rows = match kind {
        PoolKind::Hot => body.pointer("/data/rank"),
        PoolKind::New => body.pointer("/data/pairs"),
        PoolKind::Bluechip => body.get("data"),
    }
    .filter(|rows| rows.is_array())
    .context("unexpected GMGN response shape")?;

    let mut candidates = Vec::new();
    for row in rows.as_array().into_iter().flatten() {
        let parsed = match kind {
            PoolKind::Hot | PoolKind::Bluechip => {
                serde_json::from_value::<RankRow>(row.clone()).map(|r| to_candidate(kind, r, None, None, chain, now))
            }
            PoolKind::New => serde_json::from_value::<NewPairRow>(row.clone()).map(|r| {
                let pair = r.address.filter(|a| !a.is_empty());
                let id = r.id;
                let mut token = r.base_token_info;
                token.open_timestamp = r.open_timestamp.or(token.open_timestamp);
                to_candidate(kind, token, id, pair, chain, now)
            }),
        };
        match parsed {
            Ok(Some(candidate)) => candidates.push(candidate),
            Ok(None) => debug!("Dropping pool row without address"),
            Err(e) => warn!(error = %e, "Dropping malformed pool row"),
        }
    }
    Ok(candidates)
}

fn to_candidate(
    kind: PoolKind,
    row: RankRow,
    id_override: Option<i64>,
    pair_address: Option<String>,
    chain: &str,
    now: DateTime<Utc>,
) -> Option<PoolCandidate> {
    let address = row.address.filter(|a| !a.is_empty())?;
    Some(PoolCandidate {
        update_time: now,
        pool_type: kind.as_str().to_string(),
        id: id_override.or(row.id).unwrap_or_default(),
        chain: chain.to_string(),
        symbol: row.symbol.unwrap_or_default(),
        address,
        pair_address,
        price: row.price.unwrap_or_default(),
        volume: row.volume.unwrap_or_default(),
        liquidity: row.liquidity.unwrap_or_default(),
        market_cap: row.market_cap.unwrap_or_default(),
        holder_count: row.holder_count.unwrap_or_default(),
        open_timestamp: row.open_timestamp.unwrap_or_default(),
    })
}
