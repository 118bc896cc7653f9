/// Position-count gate for new buys

use tracing::{debug, info};

use crate::core::{BuyCandidate, OrderIntent, OrderSide};

#[derive(Debug, Clone, Copy)]
pub struct CapitalAllocator {
    pub max_positions: usize,
}

impl CapitalAllocator {
    pub fn new(max_positions: usize) -> Self {
        Self { max_positions }
    }

    /// Slots left after counting open positions and those being closed this cycle
    pub fn available_slots(&self, open_count: usize, closing_count: usize) -> usize {
        self.max_positions
            .saturating_sub(open_count.saturating_add(closing_count))
    }

    /// Fund candidates in input order, each with the full `position_size`
    pub fn allocate(
        &self,
        candidates: Vec<BuyCandidate>,
        open_count: usize,
        closing_count: usize,
        position_size: f64,
        quote_currency: &str,
    ) -> Vec<OrderIntent> {
        let slots = self.available_slots(open_count, closing_count);
        if slots == 0 {
            if !candidates.is_empty() {
                info!(
                    open_count,
                    closing_count,
                    max_positions = self.max_positions,
                    skipped = candidates.len(),
                    "📦 No free position slots, skipping buys"
                );
            }
            return Vec::new();
        }

        let funded: Vec<OrderIntent> = candidates
            .into_iter()
            .take(slots)
            .map(|candidate| OrderIntent {
                account: candidate.account,
                symbol: candidate.symbol,
                address: candidate.address,
                pair_address: candidate.pair_address,
                price: candidate.price,
                signal_time: candidate.signal_time,
                side: OrderSide::Buy {
                    quote_amount: position_size,
                    quote_currency: quote_currency.to_string(),
                },
            })
            .collect();

        debug!(slots, funded = funded.len(), "Allocated buy intents");
        funded
    }
}
