/// Trading constants shared across the engine

/// Wrapped SOL mint, the quote asset on Solana
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Default decimal precision of the quote asset (SOL lamports)
pub const DEFAULT_QUOTE_DECIMALS: u32 = 9;

/// Default decimal precision of target tokens (pump-style SPL tokens)
pub const DEFAULT_TOKEN_DECIMALS: u32 = 6;

/// Take profit fires once close reaches this multiple of the quote-denominated entry
pub const TAKE_PROFIT_MULTIPLIER: f64 = 2.0;

/// Stop loss fires once close drops below this fraction of the quote-denominated entry
pub const STOP_LOSS_RATIO: f64 = 0.6;

/// A signal is stale when its bar is more than this many intervals behind the run time
pub const FRESHNESS_INTERVALS: i32 = 2;

/// Default cap on concurrently open positions per account
pub const DEFAULT_MAX_POSITIONS: usize = 5;

/// Default minimum number of klines fetched for a new series
pub const DEFAULT_KLINE_MIN_COUNT: usize = 14;

/// Bars kept beyond the longest strategy lookback when a series is rewritten
pub const KLINE_RETENTION_MARGIN: usize = 500;

/// Data flag polling
pub const FLAG_POLL_SECS: u64 = 1;
pub const FLAG_GIVE_UP_MINUTES: i64 = 5;
pub const FLAG_CRASH_SUSPECT_MINUTES: i64 = 30;

/// Run loop idle times
pub const CYCLE_IDLE_SECS: u64 = 10;
pub const CYCLE_ERROR_BACKOFF_SECS: u64 = 60;

/// Transaction explorer used in notifications
pub const SOLSCAN_TX_URL: &str = "https://solscan.io/tx";
