/// Runtime configuration structures

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::algo::SignalStrategy;
use crate::core::{
    EngineError, EngineResult, DEFAULT_KLINE_MIN_COUNT, DEFAULT_MAX_POSITIONS,
    DEFAULT_QUOTE_DECIMALS, DEFAULT_TOKEN_DECIMALS,
};
use crate::util::schedule::KlineInterval;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub kline_interval: KlineInterval,
    #[serde(default = "default_kline_min_count")]
    pub kline_min_count: usize,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    pub wechat_webhook_url: Option<String>,
    /// HTTP(S) proxy applied to the pool-discovery client
    pub proxy: Option<String>,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub trade: BTreeMap<String, TradeConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Endpoints {
    #[serde(default = "default_jupiter")]
    pub jupiter: String,
    #[serde(default = "default_binance")]
    pub binance: String,
    #[serde(default = "default_gmgn")]
    pub gmgn: String,
    #[serde(default = "default_cmc")]
    pub cmc: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            jupiter: default_jupiter(),
            binance: default_binance(),
            gmgn: default_gmgn(),
            cmc: default_cmc(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_flag_retention")]
    pub flag_retention: usize,
    /// Names of the environment variables holding CMC API keys
    #[serde(default = "default_cmc_key_envs")]
    pub cmc_api_key_envs: Vec<String>,
    /// Bars requested per CMC ohlcv page
    #[serde(default = "default_kline_page_size")]
    pub kline_page_size: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            flag_retention: default_flag_retention(),
            cmc_api_key_envs: default_cmc_key_envs(),
            kline_page_size: default_kline_page_size(),
        }
    }
}

/// Per-chain execution parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradeConfig {
    #[serde(default = "default_true", alias = "status")]
    pub enabled: bool,
    /// Fractional slippage; 0 lets the swap venue pick its own default
    #[serde(default)]
    pub slippage: f64,
    pub quote_currency: String,
    pub quote_currency_address: String,
    #[serde(default = "default_quote_decimals")]
    pub quote_decimals: u32,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub name: String,
    pub address: String,
    /// Environment variable holding the base58 private key
    pub private_key_env: String,
    pub strategy_name: String,
    pub signal: SignalStrategy,
    pub chain: String,
    pub quote_coin_symbol: String,
    /// Quote-asset amount committed to each new position
    pub position_size: f64,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Hot,
    New,
    Bluechip,
}

impl PoolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolKind::Hot => "hot",
            PoolKind::New => "new",
            PoolKind::Bluechip => "bluechip",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_source")]
    pub source: String,
    /// Chain slug used by the discovery API (`sol`, `bsc`)
    pub chain: String,
    pub kind: PoolKind,
    #[serde(default = "default_pool_period")]
    pub period: String,
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub market_ranges: BTreeMap<String, RangeValue>,
}

/// Market range bound such as `min_liquidity = 50000` or `max_created = "50000m"`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RangeValue {
    Number(f64),
    Text(String),
}

impl RangeValue {
    pub fn to_query(&self) -> String {
        match self {
            RangeValue::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            RangeValue::Number(n) => n.to_string(),
            RangeValue::Text(s) => s.clone(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        use anyhow::Context;
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.max_positions == 0 {
            return Err(EngineError::config("max_positions", "must be at least 1"));
        }
        if self.kline_min_count == 0 {
            return Err(EngineError::config("kline_min_count", "must be at least 1"));
        }
        if self.refresh.concurrency == 0 {
            return Err(EngineError::config("refresh.concurrency", "must be at least 1"));
        }
        if self.refresh.kline_page_size == 0 {
            return Err(EngineError::config("refresh.kline_page_size", "must be at least 1"));
        }

        for (key, endpoint) in [
            ("endpoints.jupiter", &self.endpoints.jupiter),
            ("endpoints.binance", &self.endpoints.binance),
            ("endpoints.gmgn", &self.endpoints.gmgn),
            ("endpoints.cmc", &self.endpoints.cmc),
        ] {
            url::Url::parse(endpoint).map_err(|e| EngineError::config(key, e.to_string()))?;
        }
        if let Some(webhook) = &self.wechat_webhook_url {
            url::Url::parse(webhook)
                .map_err(|e| EngineError::config("wechat_webhook_url", e.to_string()))?;
        }

        for (chain, trade) in &self.trade {
            if !(trade.slippage.is_finite() && trade.slippage >= 0.0) {
                return Err(EngineError::config(
                    format!("trade.{}.slippage", chain),
                    "must be zero or positive",
                ));
            }
        }

        let mut names = std::collections::HashSet::new();
        for account in &self.accounts {
            if !names.insert(account.name.as_str()) {
                return Err(EngineError::config(
                    "accounts.name",
                    format!("duplicate account {}", account.name),
                ));
            }
            account
                .signal
                .validate()
                .map_err(|reason| EngineError::config(format!("accounts.{}.signal", account.name), reason))?;
            if !(account.position_size.is_finite() && account.position_size > 0.0) {
                return Err(EngineError::config(
                    format!("accounts.{}.position_size", account.name),
                    "must be positive",
                ));
            }
            if !self.trade.contains_key(&account.chain) {
                return Err(EngineError::config(
                    format!("accounts.{}.chain", account.name),
                    format!("no [trade.{}] section", account.chain),
                ));
            }
        }
        Ok(())
    }

    pub fn trade_for(&self, chain: &str) -> Option<&TradeConfig> {
        self.trade.get(chain)
    }

    /// Configured webhook, falling back to `WECHAT_WEBHOOK_URL`
    pub fn webhook_url(&self) -> Option<String> {
        self.wechat_webhook_url
            .clone()
            .or_else(|| std::env::var("WECHAT_WEBHOOK_URL").ok())
            .filter(|url| !url.trim().is_empty())
    }

    /// CMC keys resolved from the configured environment variables
    pub fn cmc_api_keys(&self) -> Vec<String> {
        self.refresh
            .cmc_api_key_envs
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty())
            .collect()
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data_feed")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_kline_min_count() -> usize {
    DEFAULT_KLINE_MIN_COUNT
}
fn default_max_positions() -> usize {
    DEFAULT_MAX_POSITIONS
}
fn default_jupiter() -> String {
    "https://lite-api.jup.ag".to_string()
}
fn default_binance() -> String {
    "https://api.binance.com".to_string()
}
fn default_gmgn() -> String {
    "https://gmgn.ai".to_string()
}
fn default_cmc() -> String {
    "https://pro-api.coinmarketcap.com/v4".to_string()
}
fn default_concurrency() -> usize {
    3
}
fn default_flag_retention() -> usize {
    100
}
fn default_cmc_key_envs() -> Vec<String> {
    vec!["CMC_API_KEY_1".to_string()]
}
fn default_kline_page_size() -> usize {
    50
}
fn default_true() -> bool {
    true
}
fn default_quote_decimals() -> u32 {
    DEFAULT_QUOTE_DECIMALS
}
fn default_token_decimals() -> u32 {
    DEFAULT_TOKEN_DECIMALS
}
fn default_pool_source() -> String {
    "gmgn".to_string()
}
fn default_pool_period() -> String {
    "5m".to_string()
}
fn default_order_by() -> String {
    "volume".to_string()
}
fn default_direction() -> String {
    "desc".to_string()
}
