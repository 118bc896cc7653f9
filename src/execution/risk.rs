/// Stop-loss and take-profit rules for open positions

use crate::core::{Position, Signal, STOP_LOSS_RATIO, TAKE_PROFIT_MULTIPLIER};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RiskOutcome {
    pub take_profit: bool,
    pub stop_loss: bool,
    /// `Some(Close)` when a rule forces an exit
    pub override_signal: Option<Signal>,
}

impl RiskOutcome {
    pub fn forces_exit(&self) -> bool {
        self.override_signal == Some(Signal::Close)
    }
}

/// Stateless thresholds relative to the quote-denominated entry price
#[derive(Debug, Clone, Copy)]
pub struct RiskEvaluator {
    pub take_profit_multiplier: f64,
    pub stop_loss_ratio: f64,
}

impl Default for RiskEvaluator {
    fn default() -> Self {
        Self {
            take_profit_multiplier: TAKE_PROFIT_MULTIPLIER,
            stop_loss_ratio: STOP_LOSS_RATIO,
        }
    }
}

impl RiskEvaluator {
    /// `close` is the last bar's close (USD); `quote_price` converts the
    /// position's quote-per-token entry price into the same unit.
    pub fn evaluate(
        &self,
        position: &Position,
        signal: Option<Signal>,
        close: f64,
        quote_price: f64,
    ) -> RiskOutcome {
        let entry_price_quote = position.entry_price * quote_price;
        let mut outcome = RiskOutcome {
            override_signal: signal.filter(|s| *s == Signal::Close),
            ..RiskOutcome::default()
        };

        if !position.take_profit && close >= self.take_profit_multiplier * entry_price_quote {
            outcome.take_profit = true;
            outcome.override_signal = Some(Signal::Close);
        }

        if close < self.stop_loss_ratio * entry_price_quote {
            outcome.stop_loss = true;
            outcome.override_signal = Some(Signal::Close);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PositionStatus;
    use chrono::Utc;

    fn position(entry_price: f64, take_profit: bool) -> Position {
        let now = Utc::now();
        Position {
            update_time: now,
            account_name: "account_1".into(),
            strategy: "sma".into(),
            chain: "solana".into(),
            symbol: "WIF".into(),
            address: "mint".into(),
            pair_address: "pair".into(),
            entry_time: now,
            exit_time: None,
            entry_price,
            exit_price: None,
            initial_amount: 1_000_000,
            balance: 1_000_000,
            quote_coin_symbol: "SOL".into(),
            quote_coin_amount: 10_000_000,
            quote_recovered: 0,
            take_profit,
            status: PositionStatus::Open,
            pnl: 0.0,
        }
    }

    #[test]
    fn take_profit_at_double_entry() {
        let risk = RiskEvaluator::default();
        // 0.01 SOL per token at 150 USD per SOL => 1.5 USD entry
        let outcome = risk.evaluate(&position(0.01, false), None, 3.0, 150.0);
        assert!(outcome.take_profit);
        assert!(!outcome.stop_loss);
        assert!(outcome.forces_exit());

        let below = risk.evaluate(&position(0.01, false), None, 2.99, 150.0);
        assert_eq!(below, RiskOutcome::default());
    }

    #[test]
    fn take_profit_fires_once() {
        let risk = RiskEvaluator::default();
        let outcome = risk.evaluate(&position(1.0, true), None, 5.0, 1.0);
        assert!(!outcome.take_profit);
        assert_eq!(outcome.override_signal, None);
    }

    #[test]
    fn stop_loss_below_sixty_percent() {
        let risk = RiskEvaluator::default();
        let outcome = risk.evaluate(&position(1.0, false), None, 0.59, 1.0);
        assert!(outcome.stop_loss);
        assert_eq!(outcome.override_signal, Some(Signal::Close));

        let at_threshold = risk.evaluate(&position(1.0, false), None, 0.6, 1.0);
        assert!(!at_threshold.stop_loss);
    }

    #[test]
    fn stop_loss_still_checked_after_take_profit() {
        let risk = RiskEvaluator::default();
        let outcome = risk.evaluate(&position(1.0, true), Some(Signal::Open), 0.5, 1.0);
        assert!(outcome.stop_loss);
        assert!(!outcome.take_profit);
        assert!(outcome.forces_exit());
    }

    #[test]
    fn close_signal_passes_through() {
        let risk = RiskEvaluator::default();
        let outcome = risk.evaluate(&position(1.0, false), Some(Signal::Close), 1.0, 1.0);
        assert!(!outcome.take_profit && !outcome.stop_loss);
        assert_eq!(outcome.override_signal, Some(Signal::Close));

        let open = risk.evaluate(&position(1.0, false), Some(Signal::Open), 1.0, 1.0);
        assert_eq!(open.override_signal, None);
    }
}
