/// Applies execution results to the position ledger
///
/// Results are applied in the order received. Each successful fill moves
/// exactly one position: a buy creates it, a take-profit leg halves it, and
/// a final exit closes it and archives it to history. A final exit that
/// sold less than the balance only reduces it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::position::PositionStore;
use crate::config::{AccountConfig, TradeConfig};
use crate::core::{
    EngineError, EngineResult, ExecutionResult, OrderSide, Position, PositionStatus, SwapFill,
    SOLSCAN_TX_URL,
};
use crate::transport::{Alert, AlertType, Notifier};

/// Static facts stamped onto positions created for an account
#[derive(Debug, Clone)]
pub struct LedgerContext {
    pub account: String,
    pub strategy: String,
    pub chain: String,
    pub quote_coin_symbol: String,
    pub quote_decimals: u32,
    pub token_decimals: u32,
}

impl LedgerContext {
    pub fn new(account: &AccountConfig, trade: &TradeConfig) -> Self {
        Self {
            account: account.name.clone(),
            strategy: account.strategy_name.clone(),
            chain: account.chain.clone(),
            quote_coin_symbol: account.quote_coin_symbol.clone(),
            quote_decimals: trade.quote_decimals,
            token_decimals: trade.token_decimals,
        }
    }

    fn quote_scale(&self) -> f64 {
        10f64.powi(self.quote_decimals as i32)
    }

    fn token_scale(&self) -> f64 {
        10f64.powi(self.token_decimals as i32)
    }

    /// Quote per token, both in display units
    pub fn price(&self, quote_units: u64, token_units: u64) -> Option<f64> {
        if token_units == 0 {
            return None;
        }
        Some((quote_units as f64 / self.quote_scale()) / (token_units as f64 / self.token_scale()))
    }
}

/// Ledger after a batch of results
#[derive(Debug, Clone, Default)]
pub struct LedgerUpdate {
    /// Every position still open, in ledger order
    pub active: Vec<Position>,
    /// Records that became terminal in this batch
    pub terminal: Vec<Position>,
    /// One alert per applied transition
    pub alerts: Vec<Alert>,
}

/// Pure transition function over the ledger
pub fn apply_results(
    ctx: &LedgerContext,
    positions: Vec<Position>,
    results: &[ExecutionResult],
) -> LedgerUpdate {
    let mut update = LedgerUpdate {
        active: positions,
        ..LedgerUpdate::default()
    };

    for result in results {
        let Some(fill) = result.fill() else {
            continue;
        };
        let applied = match &result.intent.side {
            OrderSide::Buy { .. } => apply_buy(ctx, &mut update, result, fill),
            OrderSide::Sell {
                stop_loss,
                take_profit,
                ..
            } => apply_sell(ctx, &mut update, result, fill, *take_profit, *stop_loss),
        };
        if let Err(e) = applied {
            warn!(error = %e, signature = %fill.signature, "Fill dropped");
        }
    }

    update.active.retain(Position::is_open);
    update
}

fn apply_buy(
    ctx: &LedgerContext,
    update: &mut LedgerUpdate,
    result: &ExecutionResult,
    fill: &SwapFill,
) -> EngineResult<()> {
    let intent = &result.intent;
    if update.active.iter().any(|p| p.is_open() && p.address == intent.address) {
        return Err(inconsistency(ctx, &intent.address, "buy filled for an asset that is already open"));
    }
    // An unreported amount still opens the position so the asset is held,
    // never bought twice, and waits for a manual balance fix.
    let received = fill.output_amount.filter(|&amount| amount > 0);
    let entry_price = received
        .and_then(|amount| ctx.price(fill.input_amount, amount))
        .unwrap_or_default();

    let position = Position {
        update_time: result.executed_at,
        account_name: ctx.account.clone(),
        strategy: ctx.strategy.clone(),
        chain: ctx.chain.clone(),
        symbol: intent.symbol.clone(),
        address: intent.address.clone(),
        pair_address: intent.pair_address.clone(),
        entry_time: result.executed_at,
        exit_time: None,
        entry_price,
        exit_price: None,
        initial_amount: received.unwrap_or(0),
        balance: received.unwrap_or(0),
        quote_coin_symbol: ctx.quote_coin_symbol.clone(),
        quote_coin_amount: fill.input_amount,
        quote_recovered: 0,
        take_profit: false,
        status: PositionStatus::Open,
        pnl: 0.0,
    };

    if received.is_none() {
        update.alerts.push(unreconciled_alert(
            ctx,
            &position,
            fill,
            "bought, tokens received not reported; set balance and entry_price in the active ledger",
        ));
        warn!(symbol = %position.symbol, signature = %fill.signature, "⚠️ Position opened with unknown balance");
        update.active.push(position);
        return Ok(());
    }

    update.alerts.push(Alert::new(
        AlertType::PositionOpened,
        Some(&ctx.account),
        format!(
            "🚀 Position opened\ntoken: {}\naddress: {}\nprice: {}\namount: {}\nspent: {} {}\n{}/{}",
            position.symbol,
            position.address,
            position.entry_price,
            position.initial_amount as f64 / ctx.token_scale(),
            position.quote_coin_amount as f64 / ctx.quote_scale(),
            ctx.quote_coin_symbol,
            SOLSCAN_TX_URL,
            fill.signature
        ),
    ));
    info!(symbol = %position.symbol, entry_price, "🚀 Position opened");
    update.active.push(position);
    Ok(())
}

/// Applies one sell leg.
///
/// A take-profit leg books `(received - committed / 2)` and keeps the
/// position open. Every later leg is rebased on the full original
/// commitment: `pnl = (quote_recovered + received - committed)`, where
/// `quote_recovered` already holds the take-profit proceeds. The total is
/// therefore the sum of everything received minus what was spent once.
///
/// A final leg that sold less than the balance leaves the remainder open.
/// A leg whose received amount was not reported still moves the balance,
/// but keeps the previous PnL and raises an unreconciled alert.
fn apply_sell(
    ctx: &LedgerContext,
    update: &mut LedgerUpdate,
    result: &ExecutionResult,
    fill: &SwapFill,
    take_profit: bool,
    stop_loss: bool,
) -> EngineResult<()> {
    let address = &result.intent.address;
    let position = update
        .active
        .iter_mut()
        .find(|p| p.is_open() && &p.address == address)
        .ok_or_else(|| inconsistency(ctx, address, "sell filled but no open position"))?;

    let sold = fill.input_amount.min(position.balance);
    let received = fill.output_amount;
    let at: DateTime<Utc> = result.executed_at;
    position.update_time = at;
    position.balance -= sold;
    position.quote_recovered = position
        .quote_recovered
        .saturating_add(received.unwrap_or(0));

    if take_profit && !stop_loss {
        position.take_profit = true;
        match received {
            Some(received) => {
                position.pnl =
                    (received as f64 - position.quote_coin_amount as f64 / 2.0) / ctx.quote_scale();
                update.alerts.push(Alert::new(
                    AlertType::TakeProfit,
                    Some(&ctx.account),
                    format!(
                        "😎 Take profit\ntoken: {}\naddress: {}\nsold: {}\nreceived: {} {}\npnl: {}\n{}/{}",
                        position.symbol,
                        position.address,
                        sold as f64 / ctx.token_scale(),
                        received as f64 / ctx.quote_scale(),
                        ctx.quote_coin_symbol,
                        position.pnl,
                        SOLSCAN_TX_URL,
                        fill.signature
                    ),
                ));
            }
            None => update.alerts.push(unreconciled_alert(
                ctx,
                position,
                fill,
                "take-profit sold, quote received not reported; pnl not updated",
            )),
        }
        info!(symbol = %position.symbol, pnl = position.pnl, balance = position.balance, "😎 Take profit leg recorded");
        return Ok(());
    }

    if let Some(received) = received {
        let recovered = position.quote_recovered as i128;
        position.pnl = (recovered - position.quote_coin_amount as i128) as f64 / ctx.quote_scale();
        if position.balance == 0 {
            position.exit_price = ctx.price(received, sold);
        }
    }

    if position.balance > 0 {
        update.alerts.push(Alert::new(
            AlertType::PartialFill,
            Some(&ctx.account),
            format!(
                "🧩 Partial exit\ntoken: {}\naddress: {}\nsold: {}\nremaining: {}\npnl so far: {}\n{}/{}",
                position.symbol,
                position.address,
                sold as f64 / ctx.token_scale(),
                position.balance as f64 / ctx.token_scale(),
                position.pnl,
                SOLSCAN_TX_URL,
                fill.signature
            ),
        ));
        warn!(symbol = %position.symbol, sold, remaining = position.balance, "🧩 Exit under-filled, remainder stays open");
        return Ok(());
    }

    position.exit_time = Some(at);
    position.status = if stop_loss {
        PositionStatus::StopLoss
    } else {
        PositionStatus::Closed
    };

    if received.is_none() {
        update.alerts.push(unreconciled_alert(
            ctx,
            position,
            fill,
            "closed, quote received not reported; pnl excludes this leg",
        ));
    }
    let (alert_type, headline) = if stop_loss {
        (AlertType::StopLoss, "😭 Stop loss")
    } else {
        (AlertType::PositionClosed, "🤑 Position closed")
    };
    update.alerts.push(Alert::new(
        alert_type,
        Some(&ctx.account),
        format!(
            "{}\ntoken: {}\naddress: {}\nprice: {}\nsold: {}\nreceived: {} {}\ntotal pnl: {}\n{}/{}",
            headline,
            position.symbol,
            position.address,
            position.exit_price.unwrap_or_default(),
            sold as f64 / ctx.token_scale(),
            received.unwrap_or(0) as f64 / ctx.quote_scale(),
            ctx.quote_coin_symbol,
            position.pnl,
            SOLSCAN_TX_URL,
            fill.signature
        ),
    ));
    info!(symbol = %position.symbol, status = %position.status, pnl = position.pnl, "{}", headline);
    update.terminal.push(position.clone());
    Ok(())
}

fn unreconciled_alert(ctx: &LedgerContext, position: &Position, fill: &SwapFill, what: &str) -> Alert {
    Alert::new(
        AlertType::FillUnreconciled,
        Some(&ctx.account),
        format!(
            "⚠️ Fill needs reconciliation: {}\ntoken: {}\naddress: {}\nbalance: {}\n{}/{}",
            what,
            position.symbol,
            position.address,
            position.balance,
            SOLSCAN_TX_URL,
            fill.signature
        ),
    )
}

fn inconsistency(ctx: &LedgerContext, address: &str, reason: &str) -> EngineError {
    EngineError::LedgerInconsistency {
        account: ctx.account.clone(),
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

/// Loads, transitions, persists and announces one account's results
pub struct LifecycleRecorder {
    store: PositionStore,
    notifier: Arc<dyn Notifier>,
}

impl LifecycleRecorder {
    pub fn new(store: PositionStore, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    #[instrument(skip(self, ctx, results), fields(account = %ctx.account, results = results.len()))]
    pub async fn record(&self, ctx: &LedgerContext, results: &[ExecutionResult]) -> EngineResult<LedgerUpdate> {
        if !results.iter().any(ExecutionResult::is_success) {
            return Ok(LedgerUpdate {
                active: self.store.load_active(&ctx.account)?,
                ..LedgerUpdate::default()
            });
        }

        let positions = self.store.load_active(&ctx.account)?;
        let update = apply_results(ctx, positions, results);
        self.store.commit(&ctx.account, &update.active, &update.terminal)?;

        for alert in &update.alerts {
            self.notifier.notify(alert.clone()).await;
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExecutionOutcome, OrderIntent};
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn ctx() -> LedgerContext {
        LedgerContext {
            account: "account_1".into(),
            strategy: "gmgn hot sma".into(),
            chain: "solana".into(),
            quote_coin_symbol: "SOL".into(),
            quote_decimals: 9,
            token_decimals: 6,
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 21, 12, minute, 0).unwrap()
    }

    fn result(side: OrderSide, input: u64, output: u64, minute: u32) -> ExecutionResult {
        reported(side, input, Some(output), minute)
    }

    fn reported(side: OrderSide, input: u64, output: Option<u64>, minute: u32) -> ExecutionResult {
        ExecutionResult {
            intent: OrderIntent {
                account: "account_1".into(),
                symbol: "WIF".into(),
                address: "mint".into(),
                pair_address: "pair".into(),
                price: 1.0,
                signal_time: at(minute),
                side,
            },
            executed_at: at(minute),
            outcome: ExecutionOutcome::Filled(SwapFill {
                input_mint: "in".into(),
                input_amount: input,
                output_mint: "out".into(),
                output_amount: output,
                signature: format!("sig{}", minute),
                slot: Some(1),
            }),
        }
    }

    fn buy() -> OrderSide {
        OrderSide::Buy {
            quote_amount: 0.01,
            quote_currency: "sol".into(),
        }
    }

    fn sell(take_profit: bool, stop_loss: bool) -> OrderSide {
        OrderSide::Sell {
            stop_loss,
            take_profit,
            balance: 0,
            pnl: 0.0,
        }
    }

    #[test]
    fn buy_creates_open_position_with_entry_price() {
        // 0.01 SOL for 20 tokens => 0.0005 SOL per token
        let update = apply_results(&ctx(), vec![], &[result(buy(), 10_000_000, 20_000_000, 0)]);
        assert_eq!(update.active.len(), 1);
        let position = &update.active[0];
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.balance, 20_000_000);
        assert_eq!(position.quote_coin_amount, 10_000_000);
        assert_relative_eq!(position.entry_price, 0.0005);
        assert_eq!(update.alerts[0].alert_type, AlertType::PositionOpened);
    }

    #[test]
    fn full_exit_without_take_profit() {
        let opened = apply_results(&ctx(), vec![], &[result(buy(), 10_000_000, 20_000_000, 0)]);
        let closed = apply_results(
            &ctx(),
            opened.active,
            &[result(sell(false, false), 20_000_000, 13_000_000, 5)],
        );

        assert!(closed.active.is_empty());
        assert_eq!(closed.terminal.len(), 1);
        let record = &closed.terminal[0];
        assert_eq!(record.status, PositionStatus::Closed);
        assert_eq!(record.balance, 0);
        assert_eq!(record.exit_time, Some(at(5)));
        assert_relative_eq!(record.pnl, 0.003);
        assert_relative_eq!(record.exit_price.unwrap(), 0.00065);
    }

    #[test]
    fn take_profit_then_stop_loss() {
        let opened = apply_results(&ctx(), vec![], &[result(buy(), 10_000_000, 20_000_000, 0)]);
        let half = apply_results(
            &ctx(),
            opened.active,
            &[result(sell(true, false), 10_000_000, 12_000_000, 5)],
        );
        assert_eq!(half.active.len(), 1);
        assert!(half.terminal.is_empty());
        let open = &half.active[0];
        assert!(open.take_profit);
        assert_eq!(open.balance, 10_000_000);
        assert_eq!(open.status, PositionStatus::Open);
        assert_relative_eq!(open.pnl, 0.007);

        let done = apply_results(
            &ctx(),
            half.active,
            &[result(sell(false, true), 10_000_000, 2_000_000, 10)],
        );
        let record = &done.terminal[0];
        assert_eq!(record.status, PositionStatus::StopLoss);
        assert_eq!(record.balance, 0);
        // (12_000_000 + 2_000_000 - 10_000_000) / 1e9
        assert_relative_eq!(record.pnl, 0.004);
        assert_eq!(done.alerts[0].alert_type, AlertType::StopLoss);
    }

    #[test]
    fn unreported_buy_output_still_opens_position() {
        let update = apply_results(&ctx(), vec![], &[reported(buy(), 10_000_000, None, 0)]);
        assert_eq!(update.active.len(), 1);
        let position = &update.active[0];
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.balance, 0);
        assert_eq!(position.quote_coin_amount, 10_000_000);
        assert_eq!(update.alerts.len(), 1);
        assert_eq!(update.alerts[0].alert_type, AlertType::FillUnreconciled);

        // the asset is held, so a second fill for it is still refused
        let again = apply_results(&ctx(), update.active, &[result(buy(), 10_000_000, 20_000_000, 1)]);
        assert_eq!(again.active.len(), 1);
        assert_eq!(again.active[0].balance, 0);
    }

    #[test]
    fn unreported_sell_output_keeps_prior_pnl() {
        let opened = apply_results(&ctx(), vec![], &[result(buy(), 10_000_000, 20_000_000, 0)]);
        let half = apply_results(
            &ctx(),
            opened.active,
            &[reported(sell(true, false), 10_000_000, None, 5)],
        );
        let open = &half.active[0];
        assert!(open.take_profit);
        assert_eq!(open.balance, 10_000_000);
        assert_eq!(open.pnl, 0.0);
        assert_eq!(half.alerts[0].alert_type, AlertType::FillUnreconciled);

        let done = apply_results(
            &ctx(),
            half.active,
            &[reported(sell(false, true), 10_000_000, None, 10)],
        );
        let record = &done.terminal[0];
        assert_eq!(record.status, PositionStatus::StopLoss);
        assert_eq!(record.balance, 0);
        assert_eq!(record.pnl, 0.0);
        assert_eq!(record.exit_price, None);
        let types: Vec<AlertType> = done.alerts.iter().map(|a| a.alert_type).collect();
        assert_eq!(types, vec![AlertType::FillUnreconciled, AlertType::StopLoss]);
    }

    #[test]
    fn under_filled_exit_leaves_remainder_open() {
        let opened = apply_results(&ctx(), vec![], &[result(buy(), 10_000_000, 20_000_000, 0)]);
        let partial = apply_results(
            &ctx(),
            opened.active,
            &[result(sell(false, true), 15_000_000, 3_000_000, 5)],
        );
        assert!(partial.terminal.is_empty());
        let open = &partial.active[0];
        assert_eq!(open.status, PositionStatus::Open);
        assert_eq!(open.balance, 5_000_000);
        assert_eq!(open.exit_time, None);
        assert_eq!(open.exit_price, None);
        assert_eq!(open.quote_recovered, 3_000_000);
        assert_relative_eq!(open.pnl, -0.007);
        assert_eq!(partial.alerts[0].alert_type, AlertType::PartialFill);

        let done = apply_results(
            &ctx(),
            partial.active,
            &[result(sell(false, true), 5_000_000, 1_000_000, 10)],
        );
        let record = &done.terminal[0];
        assert_eq!(record.status, PositionStatus::StopLoss);
        // (3_000_000 + 1_000_000 - 10_000_000) / 1e9
        assert_relative_eq!(record.pnl, -0.006);
    }

    #[test]
    fn sell_without_position_is_dropped() {
        let update = apply_results(&ctx(), vec![], &[result(sell(false, false), 1, 1, 0)]);
        assert!(update.active.is_empty());
        assert!(update.terminal.is_empty());
        assert!(update.alerts.is_empty());
    }

    #[test]
    fn duplicate_buy_is_dropped() {
        let update = apply_results(
            &ctx(),
            vec![],
            &[result(buy(), 10_000_000, 20_000_000, 0), result(buy(), 10_000_000, 30_000_000, 1)],
        );
        assert_eq!(update.active.len(), 1);
        assert_eq!(update.active[0].balance, 20_000_000);
    }

    #[test]
    fn failed_results_leave_ledger_untouched() {
        let mut failed = result(buy(), 1, 1, 0);
        failed.outcome = ExecutionOutcome::Failed {
            error: "slippage".into(),
            code: Some(-1),
        };
        let update = apply_results(&ctx(), vec![], &[failed]);
        assert!(update.active.is_empty());
        assert!(update.alerts.is_empty());
    }

    #[tokio::test]
    async fn record_persists_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path());
        let bus = crate::transport::AlertBus::new();
        let mut alerts = bus.subscribe();
        let recorder = LifecycleRecorder::new(store.clone(), Arc::new(bus));

        recorder
            .record(&ctx(), &[result(buy(), 10_000_000, 20_000_000, 0)])
            .await
            .unwrap();
        assert_eq!(store.load_active("account_1").unwrap().len(), 1);

        recorder
            .record(&ctx(), &[result(sell(false, false), 20_000_000, 11_000_000, 5)])
            .await
            .unwrap();
        assert!(store.load_active("account_1").unwrap().is_empty());
        let history = store
            .load_history("account_1", at(5).date_naive())
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, PositionStatus::Closed);

        assert_eq!(alerts.recv().await.unwrap().alert_type, AlertType::PositionOpened);
        assert_eq!(alerts.recv().await.unwrap().alert_type, AlertType::PositionClosed);
    }
}
