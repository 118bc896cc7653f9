/// Per-cycle signal evaluation over open positions and pool candidates

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::risk::RiskEvaluator;
use crate::algo::SignalStrategy;
use crate::core::{
    BuyCandidate, EngineError, EngineResult, OrderIntent, OrderSide, PoolCandidate, Position,
    Signal, FRESHNESS_INTERVALS,
};
use crate::util::schedule::KlineInterval;
use crate::util::SeriesSource;

/// Signal at the last bar of a series that passed the freshness gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshSignal {
    pub signal: Option<Signal>,
    pub close: f64,
    pub bar_time: DateTime<Utc>,
}

/// What the engine needs to know about the account being evaluated
#[derive(Debug, Clone)]
pub struct AccountScope<'a> {
    pub account: &'a str,
    pub chain: &'a str,
    pub strategy: &'a SignalStrategy,
}

pub struct SignalEngine {
    series: Arc<dyn SeriesSource>,
    risk: RiskEvaluator,
    interval: KlineInterval,
}

impl SignalEngine {
    pub fn new(series: Arc<dyn SeriesSource>, interval: KlineInterval) -> Self {
        Self {
            series,
            risk: RiskEvaluator::default(),
            interval,
        }
    }

    pub fn with_risk(mut self, risk: RiskEvaluator) -> Self {
        self.risk = risk;
        self
    }

    /// Compute the last-bar signal and reject it when the bar is older than
    /// two intervals before `run_time`
    pub fn fresh_signal(
        &self,
        scope: &AccountScope<'_>,
        symbol: &str,
        address: &str,
        run_time: DateTime<Utc>,
    ) -> EngineResult<FreshSignal> {
        let bars = self.series.load(scope.chain, symbol, address)?;
        let signal = scope.strategy.evaluate(symbol, &bars)?;
        let last = bars.last().ok_or_else(|| EngineError::InsufficientData {
            symbol: symbol.to_string(),
            bars: 0,
            minimum: scope.strategy.lookback(),
        })?;

        let max_age = self.interval.duration() * FRESHNESS_INTERVALS;
        if run_time - last.candle_begin_time > max_age {
            return Err(EngineError::StaleSignal {
                symbol: symbol.to_string(),
                last_bar: last.candle_begin_time,
                run_time,
                max_age_minutes: max_age.num_minutes(),
            });
        }

        Ok(FreshSignal {
            signal,
            close: last.close,
            bar_time: last.candle_begin_time,
        })
    }

    /// Sell intents for open positions: strategy close signals plus risk exits
    pub fn evaluate_positions(
        &self,
        scope: &AccountScope<'_>,
        positions: &[Position],
        quote_price: f64,
        run_time: DateTime<Utc>,
    ) -> Vec<OrderIntent> {
        let mut intents = Vec::new();
        for position in positions.iter().filter(|p| p.is_open()) {
            if position.balance == 0 {
                warn!(
                    account = scope.account,
                    symbol = %position.symbol,
                    "Open position has no recorded balance, waiting for reconciliation"
                );
                continue;
            }
            let fresh = match self.fresh_signal(scope, &position.symbol, &position.address, run_time) {
                Ok(fresh) => fresh,
                Err(e) => {
                    skip_candidate(scope.account, &position.symbol, &e);
                    continue;
                }
            };

            let outcome = self.risk.evaluate(position, fresh.signal, fresh.close, quote_price);
            if outcome.take_profit {
                info!(account = scope.account, symbol = %position.symbol, close = fresh.close, "😎 Take profit triggered");
            }
            if outcome.stop_loss {
                info!(account = scope.account, symbol = %position.symbol, close = fresh.close, "🛑 Stop loss triggered");
            }
            if !outcome.forces_exit() {
                debug!(account = scope.account, symbol = %position.symbol, signal = ?fresh.signal, "Holding");
                continue;
            }

            intents.push(OrderIntent {
                account: scope.account.to_string(),
                symbol: position.symbol.clone(),
                address: position.address.clone(),
                pair_address: position.pair_address.clone(),
                price: fresh.close,
                signal_time: fresh.bar_time,
                side: OrderSide::Sell {
                    stop_loss: outcome.stop_loss,
                    take_profit: outcome.take_profit,
                    balance: position.balance,
                    pnl: position.pnl,
                },
            });
        }
        intents
    }

    /// Unfunded buy candidates from the pool, excluding assets already held
    pub fn evaluate_pool(
        &self,
        scope: &AccountScope<'_>,
        pool: &[PoolCandidate],
        positions: &[Position],
        run_time: DateTime<Utc>,
    ) -> Vec<BuyCandidate> {
        let held: HashSet<&str> = positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.address.as_str())
            .collect();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for token in pool {
            if held.contains(token.address.as_str()) || !seen.insert(token.address.as_str()) {
                continue;
            }
            let fresh = match self.fresh_signal(scope, &token.symbol, &token.address, run_time) {
                Ok(fresh) => fresh,
                Err(e) => {
                    skip_candidate(scope.account, &token.symbol, &e);
                    continue;
                }
            };
            if fresh.signal != Some(Signal::Open) {
                continue;
            }
            let Some(pair_address) = token.resolved_pair() else {
                warn!(account = scope.account, symbol = %token.symbol, "Open signal on token without pair address, skipping");
                continue;
            };

            candidates.push(BuyCandidate {
                account: scope.account.to_string(),
                symbol: token.symbol.clone(),
                address: token.address.clone(),
                pair_address: pair_address.to_string(),
                price: fresh.close,
                signal_time: fresh.bar_time,
            });
        }
        candidates
    }
}

fn skip_candidate(account: &str, symbol: &str, error: &EngineError) {
    match error {
        EngineError::StaleSignal { .. } => {
            warn!(account, symbol, error = %error, "⚠️ Stale signal discarded")
        }
        e if e.is_recoverable() => warn!(account, symbol, error = %e, "Skipping candidate"),
        e => warn!(account, symbol, error = %e, "Unexpected error evaluating candidate, skipping"),
    }
}
