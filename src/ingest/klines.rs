/// Kline backfill for every token a chain's accounts care about

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::cmc_client::{full_fetch_horizon, FetchWindow, PairDataSource};
use crate::core::EngineResult;
use crate::util::schedule::KlineInterval;
use crate::util::time_series::{merge_bars, retain_latest, KlineStore};

/// A token whose series should be refreshed
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedToken {
    pub symbol: String,
    pub address: String,
    pub pair_address: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Keep the first token seen for each address
pub fn dedup_tokens(tokens: impl IntoIterator<Item = TrackedToken>) -> Vec<TrackedToken> {
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .filter(|t| seen.insert(t.address.clone()))
        .collect()
}

/// Full fetch for an unknown or long-idle series, incremental otherwise
pub fn plan_fetch(
    last_bar: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: KlineInterval,
    min_count: usize,
) -> FetchWindow {
    match last_bar {
        Some(last) if last >= full_fetch_horizon(now, interval, min_count) => FetchWindow::Since(last),
        _ => FetchWindow::Full { min_count },
    }
}

enum TokenOutcome {
    Updated,
    Skipped,
    Failed,
}

pub struct KlineUpdater {
    source: Arc<dyn PairDataSource>,
    store: KlineStore,
    interval: KlineInterval,
    min_count: usize,
    /// Newest bars kept per series on rewrite
    retention: usize,
    concurrency: usize,
}

impl KlineUpdater {
    pub fn new(
        source: Arc<dyn PairDataSource>,
        store: KlineStore,
        interval: KlineInterval,
        min_count: usize,
        retention: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            store,
            interval,
            min_count,
            retention: retention.max(min_count),
            concurrency: concurrency.max(1),
        }
    }

    pub fn store(&self) -> &KlineStore {
        &self.store
    }

    /// Refresh every token of `chain` with bounded concurrency. A failing
    /// token is counted and logged, never fatal for the batch.
    #[instrument(skip(self, tokens), fields(tokens = tokens.len()))]
    pub async fn refresh_chain(&self, chain: &str, tokens: Vec<TrackedToken>) -> EngineResult<RefreshSummary> {
        self.store.ensure_dirs(chain)?;
        let tokens = dedup_tokens(tokens);

        let outcomes: Vec<TokenOutcome> = stream::iter(tokens)
            .map(|token| self.refresh_token(chain, token))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = RefreshSummary::default();
        for outcome in outcomes {
            match outcome {
                TokenOutcome::Updated => summary.updated += 1,
                TokenOutcome::Skipped => summary.skipped += 1,
                TokenOutcome::Failed => summary.failed += 1,
            }
        }
        info!(
            chain,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "📈 Klines refreshed"
        );
        Ok(summary)
    }

    async fn refresh_token(&self, chain: &str, token: TrackedToken) -> TokenOutcome {
        let Some(pair) = token.pair_address.as_deref().filter(|p| !p.is_empty()) else {
            warn!(symbol = %token.symbol, address = %token.address, "Token has no pair address, skipping");
            return TokenOutcome::Skipped;
        };

        let existing = match self.store.read_or_empty(chain, &token.symbol, &token.address) {
            Ok(bars) => bars,
            Err(e) => {
                error!(symbol = %token.symbol, error = %e, "Unreadable series, refetching");
                Vec::new()
            }
        };
        let window = plan_fetch(
            existing.last().map(|b| b.candle_begin_time),
            Utc::now(),
            self.interval,
            self.min_count,
        );
        if let FetchWindow::Full { .. } = window {
            if !existing.is_empty() {
                info!(symbol = %token.symbol, "Series too old for an incremental update, fetching in full");
            }
        }

        let fresh = match self.source.fetch_bars(chain, pair, self.interval, window).await {
            Ok(bars) => bars,
            Err(e) => {
                error!(symbol = %token.symbol, pair, error = %format!("{:#}", e), "❌ Kline fetch failed");
                return TokenOutcome::Failed;
            }
        };
        if fresh.is_empty() {
            warn!(symbol = %token.symbol, pair, "No klines returned");
            return TokenOutcome::Failed;
        }

        let fetched = fresh.len();
        let merged = retain_latest(merge_bars(existing, fresh), self.retention);
        match self.store.write(chain, &token.symbol, &token.address, &merged) {
            Ok(()) => {
                info!(symbol = %token.symbol, pair, fetched, total = merged.len(), "✅ Klines stored");
                TokenOutcome::Updated
            }
            Err(e) => {
                error!(symbol = %token.symbol, error = %e, "Failed to write series");
                TokenOutcome::Failed
            }
        }
    }
}
