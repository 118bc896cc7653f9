/// Error taxonomy for the position lifecycle engine

use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Series is shorter than the strategy lookback; the candidate is skipped
    #[error("insufficient data for {symbol}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    /// No series has been written for the asset yet; the candidate is skipped
    #[error("no kline series for {symbol} at {path}")]
    MissingSeries { symbol: String, path: String },

    /// Last bar is too far behind the run time; treated as no signal
    #[error("stale signal for {symbol}: last bar {last_bar} is more than {max_age_minutes}m behind {run_time}")]
    StaleSignal {
        symbol: String,
        last_bar: DateTime<Utc>,
        run_time: DateTime<Utc>,
        max_age_minutes: i64,
    },

    /// Swap collaborator rejected or failed the order; ledger untouched
    #[error("swap failed for {symbol}: {reason}")]
    ExecutionFailure { symbol: String, reason: String },

    /// A fill could not be matched against the ledger
    #[error("ledger inconsistency for {address} in {account}: {reason}")]
    LedgerInconsistency {
        account: String,
        address: String,
        reason: String,
    },

    #[error("invalid config value {key}: {reason}")]
    Config { key: String, reason: String },

    /// Anything unexpected escaping a cycle; the run loop backs off and retries
    #[error("cycle aborted: {0:#}")]
    CycleFatal(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl EngineError {
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Per-candidate and per-order failures never abort the batch
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData { .. }
                | EngineError::MissingSeries { .. }
                | EngineError::StaleSignal { .. }
                | EngineError::ExecutionFailure { .. }
                | EngineError::LedgerInconsistency { .. }
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
