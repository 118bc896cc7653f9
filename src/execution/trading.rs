/// Order intents to swaps, one venue round trip per intent

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::config::TradeConfig;
use crate::core::{
    EngineError, ExecutionOutcome, ExecutionResult, OrderIntent, OrderSide, SwapFill,
    SOLSCAN_TX_URL,
};
use crate::trading::{OrderRequest, SwapVenue};
use crate::transport::{Alert, AlertType, Notifier};

/// Tokens to sell: half the balance on a first take-profit, everything otherwise
pub fn sell_amount(balance: u64, take_profit: bool, stop_loss: bool) -> u64 {
    if take_profit && !stop_loss {
        balance / 2
    } else {
        balance
    }
}

/// Fractional slippage to basis points; exactly zero means "venue default".
/// Any positive value is at least 1 bps.
pub fn slippage_bps(slippage: f64) -> Option<u32> {
    if slippage == 0.0 {
        return None;
    }
    Some((slippage * 10_000.0).round().max(1.0) as u32)
}

/// `position_size` quote units to base units
pub fn quote_base_units(quote_amount: f64, decimals: u32) -> u64 {
    (quote_amount * 10f64.powi(decimals as i32)).round() as u64
}

pub struct ExecutionGateway {
    venue: Arc<dyn SwapVenue>,
    notifier: Arc<dyn Notifier>,
    trade: TradeConfig,
}

impl ExecutionGateway {
    pub fn new(venue: Arc<dyn SwapVenue>, notifier: Arc<dyn Notifier>, trade: TradeConfig) -> Self {
        Self {
            venue,
            notifier,
            trade,
        }
    }

    /// Execute sells before buys, one at a time
    pub async fn execute_all(
        &self,
        sells: Vec<OrderIntent>,
        buys: Vec<OrderIntent>,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(sells.len() + buys.len());
        for intent in sells.into_iter().chain(buys) {
            results.push(self.execute(intent).await);
        }
        results
    }

    /// One swap attempt. Never retried here: a repeated submission may
    /// double-spend if the first one landed.
    #[instrument(skip(self, intent), fields(account = %intent.account, symbol = %intent.symbol, signal = %intent.signal()))]
    pub async fn execute(&self, intent: OrderIntent) -> ExecutionResult {
        let request = self.order_request(&intent);
        let outcome = match request {
            Ok(request) => self.swap(&intent, request).await,
            Err(e) => Err(e),
        };

        let outcome = match outcome {
            Ok(fill) => {
                info!(
                    signature = %fill.signature,
                    input_amount = fill.input_amount,
                    output_amount = ?fill.output_amount,
                    "✅ Swap confirmed: {}/{}",
                    SOLSCAN_TX_URL,
                    fill.signature
                );
                self.notifier
                    .notify(Alert::new(
                        AlertType::SwapConfirmed,
                        Some(&intent.account),
                        format!(
                            "✅ Swap confirmed: {} {}\n{} -> {}\n{}/{}",
                            intent.signal(),
                            intent.symbol,
                            fill.input_amount,
                            fill
                                .output_amount
                                .map_or_else(|| "unreported".to_string(), |a| a.to_string()),
                            SOLSCAN_TX_URL,
                            fill.signature
                        ),
                    ))
                    .await;
                ExecutionOutcome::Filled(fill)
            }
            Err((error, code)) => {
                let failure = EngineError::ExecutionFailure {
                    symbol: intent.symbol.clone(),
                    reason: error.clone(),
                };
                error!(error = %failure, code = ?code, "❌ Swap failed");
                self.notifier
                    .notify(Alert::new(
                        AlertType::SwapFailed,
                        Some(&intent.account),
                        format!(
                            "❌ Swap failed: {} {} ({})\nreason: {}{}",
                            intent.signal(),
                            intent.symbol,
                            intent.address,
                            error,
                            code.map(|c| format!(" code: {}", c)).unwrap_or_default()
                        ),
                    ))
                    .await;
                ExecutionOutcome::Failed { error, code }
            }
        };

        ExecutionResult {
            intent,
            executed_at: Utc::now(),
            outcome,
        }
    }

    pub fn order_request(&self, intent: &OrderIntent) -> Result<OrderRequest, (String, Option<i64>)> {
        let (input_mint, output_mint, amount) = match &intent.side {
            OrderSide::Buy { quote_amount, .. } => (
                self.trade.quote_currency_address.clone(),
                intent.address.clone(),
                quote_base_units(*quote_amount, self.trade.quote_decimals),
            ),
            OrderSide::Sell {
                stop_loss,
                take_profit,
                balance,
                ..
            } => (
                intent.address.clone(),
                self.trade.quote_currency_address.clone(),
                sell_amount(*balance, *take_profit, *stop_loss),
            ),
        };

        if amount == 0 {
            return Err(("order amount is zero".to_string(), None));
        }

        Ok(OrderRequest {
            input_mint,
            output_mint,
            amount,
            slippage_bps: slippage_bps(self.trade.slippage),
        })
    }

    async fn swap(
        &self,
        intent: &OrderIntent,
        request: OrderRequest,
    ) -> Result<SwapFill, (String, Option<i64>)> {
        info!(
            input = %request.input_mint,
            output = %request.output_mint,
            amount = request.amount,
            slippage_bps = ?request.slippage_bps,
            "🔄 Placing {} order for {}",
            intent.signal(),
            intent.symbol
        );

        let as_failure = |e: anyhow::Error| (format!("{:#}", e), None);
        let order = self.venue.get_order(&request).await.map_err(as_failure)?;
        let signed = self.venue.sign(&order).map_err(as_failure)?;
        let submission = self
            .venue
            .submit(&signed, &order.request_id)
            .await
            .map_err(as_failure)?;

        if !submission.is_success() {
            let reason = submission
                .error
                .unwrap_or_else(|| format!("venue status {}", submission.status));
            return Err((reason, submission.code));
        }
        let Some(signature) = submission.signature else {
            return Err(("venue reported success without a signature".to_string(), submission.code));
        };

        Ok(SwapFill {
            input_mint: request.input_mint,
            input_amount: submission
                .input_amount
                .or(order.in_amount)
                .unwrap_or(request.amount),
            output_mint: request.output_mint,
            output_amount: submission.output_amount.or(order.out_amount),
            signature,
            slot: submission.slot,
        })
    }
}
