/// Records flowing through a run cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV bar, ascending by `candle_begin_time`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(with = "csv_time")]
    pub candle_begin_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Actionable signal value; `None` at the call site means no signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    Open,
    Close,
}

impl Signal {
    /// +1 for open, -1 for close
    pub fn value(self) -> i8 {
        match self {
            Signal::Open => 1,
            Signal::Close => -1,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Open => write!(f, "open"),
            Signal::Close => write!(f, "close"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    StopLoss,
}

impl PositionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PositionStatus::Open)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "open"),
            PositionStatus::Closed => write!(f, "closed"),
            PositionStatus::StopLoss => write!(f, "stop_loss"),
        }
    }
}

/// One open or closed trade. Amounts are in base units of their asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(with = "csv_time")]
    pub update_time: DateTime<Utc>,
    pub account_name: String,
    pub strategy: String,
    pub chain: String,
    pub symbol: String,
    pub address: String,
    pub pair_address: String,
    #[serde(with = "csv_time")]
    pub entry_time: DateTime<Utc>,
    #[serde(with = "csv_time::option")]
    pub exit_time: Option<DateTime<Utc>>,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub initial_amount: u64,
    pub balance: u64,
    pub quote_coin_symbol: String,
    pub quote_coin_amount: u64,
    /// Gross quote received by earlier take-profit legs
    #[serde(default)]
    pub quote_recovered: u64,
    pub take_profit: bool,
    pub status: PositionStatus,
    pub pnl: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// A tradable asset proposed by pool discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolCandidate {
    #[serde(with = "csv_time")]
    pub update_time: DateTime<Utc>,
    pub pool_type: String,
    #[serde(default)]
    pub id: i64,
    pub chain: String,
    pub address: String,
    pub symbol: String,
    pub pair_address: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub liquidity: f64,
    #[serde(default)]
    pub market_cap: f64,
    #[serde(default)]
    pub holder_count: u64,
    #[serde(default)]
    pub open_timestamp: i64,
}

impl PoolCandidate {
    pub fn resolved_pair(&self) -> Option<&str> {
        self.pair_address.as_deref().filter(|p| !p.is_empty())
    }
}

/// Open signal on a pool candidate, not yet funded
#[derive(Debug, Clone, PartialEq)]
pub struct BuyCandidate {
    pub account: String,
    pub symbol: String,
    pub address: String,
    pub pair_address: String,
    pub price: f64,
    pub signal_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderSide {
    /// Funded by the capital allocator
    Buy {
        quote_amount: f64,
        quote_currency: String,
    },
    /// Snapshot of the position being exited
    Sell {
        stop_loss: bool,
        take_profit: bool,
        balance: u64,
        pnl: f64,
    },
}

/// Ephemeral order produced by the signal engine and consumed by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub account: String,
    pub symbol: String,
    pub address: String,
    pub pair_address: String,
    /// Close of the bar that produced the signal
    pub price: f64,
    pub signal_time: DateTime<Utc>,
    pub side: OrderSide,
}

impl OrderIntent {
    pub fn signal(&self) -> Signal {
        match self.side {
            OrderSide::Buy { .. } => Signal::Open,
            OrderSide::Sell { .. } => Signal::Close,
        }
    }

    pub fn is_stop_loss(&self) -> bool {
        matches!(self.side, OrderSide::Sell { stop_loss: true, .. })
    }

    pub fn is_take_profit(&self) -> bool {
        matches!(self.side, OrderSide::Sell { take_profit: true, .. })
    }
}

/// Amounts actually moved by a confirmed swap
#[derive(Debug, Clone, PartialEq)]
pub struct SwapFill {
    pub input_mint: String,
    pub input_amount: u64,
    pub output_mint: String,
    /// `None` when neither the execution result nor the quote reported it
    pub output_amount: Option<u64>,
    pub signature: String,
    pub slot: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Filled(SwapFill),
    Failed { error: String, code: Option<i64> },
}

/// Outcome of one swap attempt, consumed exactly once by the lifecycle recorder
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub intent: OrderIntent,
    pub executed_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Filled(_))
    }

    pub fn fill(&self) -> Option<&SwapFill> {
        match &self.outcome {
            ExecutionOutcome::Filled(fill) => Some(fill),
            ExecutionOutcome::Failed { .. } => None,
        }
    }
}

/// `YYYY-mm-dd HH:MM:SS` UTC timestamps, the layout used by every ledger file
pub mod csv_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Accepts the ledger layout and RFC 3339 (as returned by market data APIs)
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        let raw = raw.trim();
        match NaiveDateTime::parse_from_str(raw, FORMAT) {
            Ok(naive) => Ok(naive.and_utc()),
            Err(err) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| err),
        }
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            time: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(time) => super::serialize(time, serializer),
                None => serializer.serialize_str(""),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(raw) => parse(raw).map(Some).map_err(serde::de::Error::custom),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn csv_time_accepts_ledger_and_rfc3339_layouts() {
        let expected = Utc.with_ymd_and_hms(2025, 4, 21, 8, 35, 0).unwrap();
        assert_eq!(csv_time::parse("2025-04-21 08:35:00").unwrap(), expected);
        assert_eq!(csv_time::parse("2025-04-21T08:35:00.000Z").unwrap(), expected);
        assert!(csv_time::parse("yesterday").is_err());
    }

    #[test]
    fn intent_side_maps_to_signal() {
        let intent = OrderIntent {
            account: "account_1".into(),
            symbol: "WIF".into(),
            address: "mint".into(),
            pair_address: "pair".into(),
            price: 1.0,
            signal_time: Utc::now(),
            side: OrderSide::Sell {
                stop_loss: true,
                take_profit: false,
                balance: 10,
                pnl: 0.0,
            },
        };
        assert_eq!(intent.signal(), Signal::Close);
        assert_eq!(intent.signal().value(), -1);
        assert!(intent.is_stop_loss());
        assert!(!intent.is_take_profit());
    }

    #[test]
    fn unresolved_pair_is_none() {
        let mut pool = PoolCandidate {
            update_time: Utc::now(),
            pool_type: "hot".into(),
            id: 1,
            chain: "solana".into(),
            address: "mint".into(),
            symbol: "WIF".into(),
            pair_address: Some(String::new()),
            price: 0.0,
            volume: 0.0,
            liquidity: 0.0,
            market_cap: 0.0,
            holder_count: 0,
            open_timestamp: 0,
        };
        assert_eq!(pool.resolved_pair(), None);
        pool.pair_address = Some("pair".into());
        assert_eq!(pool.resolved_pair(), Some("pair"));
    }
}
