/// Trading cycle: per account, sells then buys, then the ledger

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use super::allocation::CapitalAllocator;
use super::position::PositionStore;
use super::recorder::{LedgerContext, LifecycleRecorder};
use super::strategy::{AccountScope, SignalEngine};
use super::trading::ExecutionGateway;
use crate::config::{AccountConfig, Config, TradeConfig};
use crate::core::{EngineError, EngineResult, CYCLE_ERROR_BACKOFF_SECS, CYCLE_IDLE_SECS};
use crate::scout::PoolStore;
use crate::trading::SwapVenue;
use crate::transport::{Alert, Notifier};
use crate::util::schedule::{
    idle_or_shutdown, sleep_until_run_time, wait_for_data_flag, FlagWait, KlineInterval,
};
use crate::util::time_series::KlineStore;
use crate::util::{PriceSource, SeriesSource};

/// An account wired to its swap venue
pub struct TradingAccount {
    pub config: AccountConfig,
    pub trade: TradeConfig,
    ledger: LedgerContext,
    gateway: ExecutionGateway,
}

impl TradingAccount {
    pub fn new(
        config: AccountConfig,
        trade: TradeConfig,
        venue: Arc<dyn SwapVenue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ledger = LedgerContext::new(&config, &trade);
        let gateway = ExecutionGateway::new(venue, notifier, trade.clone());
        Self {
            config,
            trade,
            ledger,
            gateway,
        }
    }
}

/// What one account did in a cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountReport {
    pub account: String,
    pub sells: usize,
    pub buys: usize,
    pub filled: usize,
    pub failed: usize,
    pub open_positions: usize,
}

pub struct CycleRunner {
    accounts: Vec<TradingAccount>,
    engine: SignalEngine,
    allocator: CapitalAllocator,
    pools: PoolStore,
    recorder: LifecycleRecorder,
    prices: Arc<dyn PriceSource>,
    notifier: Arc<dyn Notifier>,
    klines: KlineStore,
    interval: KlineInterval,
    flag_wait: FlagWait,
}

impl CycleRunner {
    pub fn new(
        config: &Config,
        accounts: Vec<TradingAccount>,
        series: Arc<dyn SeriesSource>,
        prices: Arc<dyn PriceSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            accounts,
            engine: SignalEngine::new(series, config.kline_interval),
            allocator: CapitalAllocator::new(config.max_positions),
            pools: PoolStore::new(&config.data_dir),
            recorder: LifecycleRecorder::new(PositionStore::new(&config.data_dir), notifier.clone()),
            prices,
            notifier,
            klines: KlineStore::new(&config.data_dir),
            interval: config.kline_interval,
            flag_wait: FlagWait::default(),
        }
    }

    pub fn with_flag_wait(mut self, wait: FlagWait) -> Self {
        self.flag_wait = wait;
        self
    }

    pub fn positions(&self) -> &PositionStore {
        self.recorder.store()
    }

    /// One account end to end. Execution failures are reported in the
    /// results; only storage and price-lookup errors abort the account.
    #[instrument(skip(self, account), fields(account = %account.config.name))]
    pub async fn run_account(&self, account: &TradingAccount, run_time: DateTime<Utc>) -> EngineResult<AccountReport> {
        let name = account.config.name.as_str();
        let store = self.recorder.store();
        store.ensure_account(name)?;
        let positions = store.load_active(name)?;
        let scope = AccountScope {
            account: name,
            chain: &account.config.chain,
            strategy: &account.config.signal,
        };

        let sells = if positions.is_empty() {
            Vec::new()
        } else {
            let quote_price = self
                .prices
                .get_price(&account.config.quote_coin_symbol)
                .await
                .with_context(|| format!("{} price", account.config.quote_coin_symbol))?;
            self.engine
                .evaluate_positions(&scope, &positions, quote_price, run_time)
        };

        let pool = self.pools.load_active(name)?;
        let candidates = self.engine.evaluate_pool(&scope, &pool, &positions, run_time);
        let open_count = positions.iter().filter(|p| p.is_open()).count();
        let buys = self.allocator.allocate(
            candidates,
            open_count,
            sells.len(),
            account.config.position_size,
            &account.trade.quote_currency,
        );

        let mut report = AccountReport {
            account: name.to_string(),
            sells: sells.len(),
            buys: buys.len(),
            open_positions: open_count,
            ..AccountReport::default()
        };
        if sells.is_empty() && buys.is_empty() {
            info!(open_positions = open_count, pool = pool.len(), "💤 Nothing to trade");
            return Ok(report);
        }

        let results = account.gateway.execute_all(sells, buys).await;
        report.filled = results.iter().filter(|r| r.is_success()).count();
        report.failed = results.len() - report.filled;

        let update = self.recorder.record(&account.ledger, &results).await?;
        report.open_positions = update.active.len();
        info!(
            sells = report.sells,
            buys = report.buys,
            filled = report.filled,
            failed = report.failed,
            open_positions = report.open_positions,
            "📒 Account cycle recorded"
        );
        Ok(report)
    }

    /// Every enabled account in configuration order. One account failing
    /// does not stop the others; the cycle then reports a fatal error.
    pub async fn run_cycle(&self, run_time: DateTime<Utc>, debug: bool) -> EngineResult<Vec<AccountReport>> {
        let mut flagged = HashSet::new();
        let mut reports = Vec::new();
        let mut failures = Vec::new();

        for account in &self.accounts {
            let chain = account.config.chain.as_str();
            if !account.trade.enabled {
                warn!(account = %account.config.name, chain, "Trading disabled for chain, skipping account");
                continue;
            }
            if !debug && flagged.insert(chain.to_string()) {
                wait_for_data_flag(&self.klines.flag_dir(chain), run_time, self.flag_wait).await;
            }

            match self.run_account(account, run_time).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(account = %account.config.name, error = %e, "❌ Account cycle failed");
                    failures.push(format!("{}: {}", account.config.name, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(reports)
        } else {
            Err(EngineError::CycleFatal(anyhow!(
                "{} account(s) failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Trading loop. Shutdown is honoured only while sleeping, never in
    /// the middle of a cycle.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>, debug: bool, once: bool) -> Result<()> {
        info!(accounts = self.accounts.len(), interval = %self.interval, "🦉 Trading loop starting");
        loop {
            let run_time = tokio::select! {
                run_time = sleep_until_run_time(self.interval, debug) => run_time,
                _ = shutdown.recv() => break,
            };

            match self.run_cycle(run_time, debug).await {
                Ok(reports) => {
                    let filled: usize = reports.iter().map(|r| r.filled).sum();
                    info!(%run_time, accounts = reports.len(), filled, "✅ Cycle finished");
                    if once || idle_or_shutdown(Duration::from_secs(CYCLE_IDLE_SECS), &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "💥 Cycle failed");
                    self.notifier
                        .notify(Alert::system(format!("Trading cycle failed: {}", e)))
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
        info!("🛑 Trading loop stopped");
        Ok(())
    }
}
