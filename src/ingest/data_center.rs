/// Data refresh cycle: pools, pair addresses, klines, then the readiness flag

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use super::cmc_client::PairDataSource;
use super::klines::{KlineUpdater, RefreshSummary, TrackedToken};
use crate::config::{AccountConfig, Config};
use crate::core::{EngineResult, CYCLE_ERROR_BACKOFF_SECS, CYCLE_IDLE_SECS, KLINE_RETENTION_MARGIN};
use crate::execution::position::PositionStore;
use crate::scout::{PoolSource, PoolStore};
use crate::transport::{Alert, Notifier};
use crate::util::schedule::{idle_or_shutdown, sleep_until_run_time, write_data_flag, KlineInterval};
use crate::util::time_series::KlineStore;

/// Longest strategy lookback or fetch minimum, plus a margin
pub fn kline_retention(config: &Config) -> usize {
    config
        .accounts
        .iter()
        .map(|account| account.signal.lookback())
        .fold(config.kline_min_count, usize::max)
        + KLINE_RETENTION_MARGIN
}

pub struct DataCenter {
    accounts: Vec<AccountConfig>,
    interval: KlineInterval,
    flag_retention: usize,
    pool_source: Arc<dyn PoolSource>,
    pair_source: Arc<dyn PairDataSource>,
    pools: PoolStore,
    positions: PositionStore,
    klines: KlineUpdater,
    notifier: Arc<dyn Notifier>,
}

impl DataCenter {
    pub fn new(
        config: &Config,
        pool_source: Arc<dyn PoolSource>,
        pair_source: Arc<dyn PairDataSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let klines = KlineUpdater::new(
            pair_source.clone(),
            KlineStore::new(&config.data_dir),
            config.kline_interval,
            config.kline_min_count,
            kline_retention(config),
            config.refresh.concurrency,
        );
        Self {
            accounts: config.accounts.clone(),
            interval: config.kline_interval,
            flag_retention: config.refresh.flag_retention,
            pool_source,
            pair_source,
            pools: PoolStore::new(&config.data_dir),
            positions: PositionStore::new(&config.data_dir),
            klines,
            notifier,
        }
    }

    /// Accounts grouped by chain, chains in first-seen order
    fn accounts_by_chain(&self) -> Vec<(String, Vec<&AccountConfig>)> {
        let mut groups: Vec<(String, Vec<&AccountConfig>)> = Vec::new();
        for account in &self.accounts {
            match groups.iter_mut().find(|(chain, _)| *chain == account.chain) {
                Some((_, members)) => members.push(account),
                None => groups.push((account.chain.clone(), vec![account])),
            }
        }
        groups
    }

    /// One refresh for `run_time`. Each chain's flag is published once its
    /// klines were attempted, even if some tokens failed.
    #[instrument(skip(self))]
    pub async fn refresh(&self, run_time: DateTime<Utc>) -> EngineResult<BTreeMap<String, RefreshSummary>> {
        let today = run_time.date_naive();
        let mut report = BTreeMap::new();

        for (chain, accounts) in self.accounts_by_chain() {
            let mut tokens = Vec::new();
            for account in accounts {
                self.positions.ensure_account(&account.name)?;
                self.refresh_pools(account, today).await?;
                self.resolve_pairs(account).await?;
                tokens.extend(self.tracked_tokens(account)?);
            }

            let summary = self.klines.refresh_chain(&chain, tokens).await?;
            write_data_flag(&self.klines.store().flag_dir(&chain), run_time, self.flag_retention)?;
            report.insert(chain, summary);
        }
        Ok(report)
    }

    /// Replace the active snapshot and log it to today's history. A failed
    /// discovery keeps the previous snapshot.
    async fn refresh_pools(&self, account: &AccountConfig, today: chrono::NaiveDate) -> EngineResult<()> {
        let fetched = match self.pool_source.scan(&account.pool, &account.chain).await {
            Ok(pools) => pools,
            Err(e) => {
                error!(account = %account.name, error = %format!("{:#}", e), "❌ Pool discovery failed, keeping previous snapshot");
                return Ok(());
            }
        };
        let pools = self.pools.replace_active(&account.name, fetched, today)?;
        let added = self.pools.append_history(&account.name, &pools, today)?;
        info!(account = %account.name, pools = pools.len(), history_added = added, "🏊 Active pool refreshed");
        Ok(())
    }

    /// Look up pair addresses for snapshot rows that still lack one
    async fn resolve_pairs(&self, account: &AccountConfig) -> EngineResult<usize> {
        let pending: Vec<String> = self
            .pools
            .load_active(&account.name)?
            .into_iter()
            .filter(|p| p.resolved_pair().is_none())
            .map(|p| p.address)
            .collect();

        let mut resolved = HashMap::new();
        for address in pending {
            match self.pair_source.resolve_pair(&account.chain, &address).await {
                Ok(Some(pair)) => {
                    resolved.insert(address, pair);
                }
                Ok(None) => {}
                Err(e) => warn!(address = %address, error = %format!("{:#}", e), "Pair lookup failed"),
            }
        }
        self.pools.set_pairs(&account.name, &resolved)?;
        Ok(resolved.len())
    }

    /// Snapshot rows plus open positions; pairs known from the snapshot
    /// fill in positions that never recorded one
    fn tracked_tokens(&self, account: &AccountConfig) -> EngineResult<Vec<TrackedToken>> {
        let pools = self.pools.load_active(&account.name)?;
        let known: HashMap<&str, &str> = pools
            .iter()
            .filter_map(|p| p.resolved_pair().map(|pair| (p.address.as_str(), pair)))
            .collect();

        let mut tokens: Vec<TrackedToken> = pools
            .iter()
            .map(|p| TrackedToken {
                symbol: p.symbol.clone(),
                address: p.address.clone(),
                pair_address: p.resolved_pair().map(str::to_string),
            })
            .collect();

        for position in self.positions.load_active(&account.name)? {
            let pair = Some(position.pair_address.as_str())
                .filter(|p| !p.is_empty())
                .or_else(|| known.get(position.address.as_str()).copied())
                .map(str::to_string);
            tokens.push(TrackedToken {
                symbol: position.symbol,
                address: position.address,
                pair_address: pair,
            });
        }
        Ok(tokens)
    }

    /// Refresh loop: wait for the next run time, refresh, idle. Errors are
    /// reported and retried after a back-off.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>, debug: bool, once: bool) -> Result<()> {
        info!(accounts = self.accounts.len(), interval = %self.interval, "📡 Data center starting");
        loop {
            let run_time = tokio::select! {
                run_time = sleep_until_run_time(self.interval, debug) => run_time,
                _ = shutdown.recv() => break,
            };

            let started = std::time::Instant::now();
            match self.refresh(run_time).await {
                Ok(report) => {
                    let updated: usize = report.values().map(|s| s.updated).sum();
                    info!(%run_time, updated, elapsed_ms = started.elapsed().as_millis() as u64, "✅ Refresh finished");
                    if once || idle_or_shutdown(Duration::from_secs(CYCLE_IDLE_SECS), &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "💥 Refresh cycle failed");
                    self.notifier
                        .notify(Alert::system(format!("Data center refresh failed: {}", e)))
                        .await;
                    if once {
                        return Err(e.into());
                    }
                    if idle_or_shutdown(Duration::from_secs(CYCLE_ERROR_BACKOFF_SECS), &mut shutdown).await {
                        break;
                    }
                }
            }
        }
        info!("🛑 Data center stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::core::{Bar, PoolCandidate};
    use crate::ingest::cmc_client::FetchWindow;
    use crate::transport::AlertBus;
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};

    const CONFIG: &str = r#"
        data_dir = "unused"
        kline_interval = "5m"

        [trade.solana]
        quote_currency = "SOL"
        quote_currency_address = "So11111111111111111111111111111111111111112"

        [[accounts]]
        name = "account_1"
        address = "wallet1"
        private_key_env = "ACCOUNT_1_KEY"
        strategy_name = "sma_cross"
        signal = { kind = "sma", short = 2, long = 3 }
        chain = "solana"
        quote_coin_symbol = "SOL"
        position_size = 0.01
        [accounts.pool]
        chain = "sol"
        kind = "hot"
    "#;

    struct FixedPools {
        fail: bool,
    }

    #[async_trait]
    impl PoolSource for FixedPools {
        async fn scan(&self, _pool: &PoolConfig, chain: &str) -> Result<Vec<PoolCandidate>> {
            if self.fail {
                bail!("gmgn unavailable");
            }
            let candidate = |address: &str| PoolCandidate {
                update_time: Utc.with_ymd_and_hms(2025, 4, 21, 8, 35, 0).unwrap(),
                pool_type: "hot".into(),
                id: 1,
                chain: chain.to_string(),
                address: address.into(),
                symbol: address.to_uppercase(),
                pair_address: None,
                price: 1.0,
                volume: 1.0,
                liquidity: 1.0,
                market_cap: 1.0,
                holder_count: 1,
                open_timestamp: 0,
            };
            Ok(vec![candidate("mint_a"), candidate("mint_b")])
        }
    }

    struct FakeCmc;

    #[async_trait]
    impl PairDataSource for FakeCmc {
        async fn resolve_pair(&self, _network: &str, token: &str) -> Result<Option<String>> {
            Ok((token == "mint_a").then(|| "pair_a".to_string()))
        }

        async fn fetch_bars(
            &self,
            _network: &str,
            _pair: &str,
            _interval: KlineInterval,
            _window: FetchWindow,
        ) -> Result<Vec<Bar>> {
            let start = Utc::now() - ChronoDuration::minutes(10);
            Ok(vec![Bar {
                candle_begin_time: start,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            }])
        }
    }

    fn data_center(dir: &std::path::Path, fail_pools: bool) -> DataCenter {
        let mut config = Config::from_toml_str(CONFIG).unwrap();
        config.data_dir = dir.to_path_buf();
        DataCenter::new(
            &config,
            Arc::new(FixedPools { fail: fail_pools }),
            Arc::new(FakeCmc),
            Arc::new(AlertBus::new()),
        )
    }

    #[test]
    fn retention_covers_the_longest_lookback() {
        let mut config = Config::from_toml_str(CONFIG).unwrap();
        assert_eq!(kline_retention(&config), config.kline_min_count + KLINE_RETENTION_MARGIN);

        config.accounts[0].signal = crate::algo::SignalStrategy::Sma { short: 50, long: 600 };
        assert_eq!(kline_retention(&config), 600 + KLINE_RETENTION_MARGIN);
    }

    #[tokio::test]
    async fn refresh_resolves_pairs_fetches_klines_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let center = data_center(dir.path(), false);
        let run_time = Utc.with_ymd_and_hms(2025, 4, 21, 8, 40, 0).unwrap();

        let report = center.refresh(run_time).await.unwrap();
        assert_eq!(report["solana"], RefreshSummary { updated: 1, skipped: 1, failed: 0 });

        let pools = center.pools.load_active("account_1").unwrap();
        assert_eq!(pools[0].resolved_pair(), Some("pair_a"));
        assert_eq!(pools[1].resolved_pair(), None);
        assert_eq!(
            center
                .pools
                .load_history("account_1", run_time.date_naive())
                .unwrap()
                .len(),
            2
        );
        assert!(dir
            .path()
            .join("klines/solana/flags/2025-04-21_08_40.flag")
            .exists());
        assert!(dir.path().join("klines/solana/MINT_A_mint_a.csv").exists());
        assert!(dir.path().join("account_1/active_position.csv").exists());
    }

    #[tokio::test]
    async fn failed_discovery_still_publishes_flag() {
        let dir = tempfile::tempdir().unwrap();
        let center = data_center(dir.path(), true);
        let run_time = Utc.with_ymd_and_hms(2025, 4, 21, 8, 45, 0).unwrap();

        let report = center.refresh(run_time).await.unwrap();
        assert_eq!(report["solana"], RefreshSummary::default());
        assert!(dir
            .path()
            .join("klines/solana/flags/2025-04-21_08_45.flag")
            .exists());
    }
}
