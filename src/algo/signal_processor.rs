/// Pluggable signal strategies
///
/// The strategy set is closed: each variant is chosen when the config is
/// parsed, so an unknown strategy name fails at startup.

use serde::{Deserialize, Serialize};

use super::{bollinger, sma};
use crate::core::{Bar, EngineError, EngineResult, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalStrategy {
    /// Dual moving-average crossover
    Sma { short: usize, long: usize },
    /// Bollinger breakout above the upper band, exit below the middle band
    #[serde(alias = "bolling")]
    Bollinger { period: usize, width: f64 },
}

impl SignalStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SignalStrategy::Sma { .. } => "sma",
            SignalStrategy::Bollinger { .. } => "bollinger",
        }
    }

    /// Fewest bars the strategy accepts
    pub fn lookback(&self) -> usize {
        let window = match *self {
            SignalStrategy::Sma { short, long } => short.max(long),
            SignalStrategy::Bollinger { period, .. } => period,
        };
        window.max(2)
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            SignalStrategy::Sma { short, long } if short == 0 || long == 0 => {
                Err("sma windows must be positive".into())
            }
            SignalStrategy::Bollinger { period, .. } if period == 0 => {
                Err("bollinger period must be positive".into())
            }
            SignalStrategy::Bollinger { width, .. } if !(width.is_finite() && width > 0.0) => {
                Err("bollinger width must be a positive number".into())
            }
            _ => Ok(()),
        }
    }

    /// Deduplicated signal for every bar
    pub fn signal_series(&self, closes: &[f64]) -> Vec<Option<Signal>> {
        let raw = match *self {
            SignalStrategy::Sma { short, long } => sma::raw_signals(closes, short, long),
            SignalStrategy::Bollinger { period, width } => {
                bollinger::raw_signals(closes, period, width)
            }
        };
        dedup_signals(&raw)
    }

    /// Signal active at the last bar. Pure: no I/O, no clock.
    pub fn evaluate(&self, symbol: &str, series: &[Bar]) -> EngineResult<Option<Signal>> {
        let minimum = self.lookback();
        if series.len() < minimum {
            return Err(EngineError::InsufficientData {
                symbol: symbol.to_string(),
                bars: series.len(),
                minimum,
            });
        }
        let closes: Vec<f64> = series.iter().map(|bar| bar.close).collect();
        Ok(self.signal_series(&closes).last().copied().flatten())
    }
}

/// Keep a signal only where it differs from the previous non-empty signal
pub fn dedup_signals(raw: &[Option<Signal>]) -> Vec<Option<Signal>> {
    let mut last = None;
    raw.iter()
        .map(|signal| match signal {
            Some(s) if last != Some(*s) => {
                last = Some(*s);
                Some(*s)
            }
            _ => None,
        })
        .collect()
}

/// Crossing test shared by the strategies: true on the bar where `now` holds
/// and `before` held on the prior bar
pub(crate) fn crossed(now: bool, before: Option<bool>) -> bool {
    now && before.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_bars(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 4, 21, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                candle_begin_time: start + Duration::minutes(5 * i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 100.0,
            })
            .collect()
    }

    #[test]
    fn dedup_keeps_changes_only() {
        use Signal::*;
        let raw = vec![None, Some(Open), Some(Open), None, Some(Open), Some(Close), None, Some(Close), Some(Open)];
        let deduped = dedup_signals(&raw);
        assert_eq!(
            deduped,
            vec![None, Some(Open), None, None, None, Some(Close), None, None, Some(Open)]
        );
    }

    #[test]
    fn insufficient_history_is_an_error() {
        let strategy = SignalStrategy::Sma { short: 5, long: 10 };
        let err = strategy.evaluate("WIF", &make_bars(&[1.0; 9])).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData { bars: 9, minimum: 10, .. }
        ));
        assert!(strategy.evaluate("WIF", &make_bars(&[1.0; 10])).is_ok());
    }

    #[test]
    fn reports_only_last_bar() {
        let strategy = SignalStrategy::Sma { short: 2, long: 3 };
        let mut closes = vec![10.0, 10.0, 10.0, 10.0, 12.0];
        let opened = strategy.evaluate("X", &make_bars(&closes)).unwrap();
        assert_eq!(opened, Some(Signal::Open));

        closes.push(13.0);
        assert_eq!(strategy.evaluate("X", &make_bars(&closes)).unwrap(), None);
    }

    #[test]
    fn parses_tagged_variants() {
        #[derive(Deserialize)]
        struct Holder {
            signal: SignalStrategy,
        }
        let sma: Holder = toml::from_str("signal = { kind = \"sma\", short = 5, long = 10 }").unwrap();
        assert_eq!(sma.signal, SignalStrategy::Sma { short: 5, long: 10 });

        let boll: Holder =
            toml::from_str("signal = { kind = \"bolling\", period = 200, width = 2.0 }").unwrap();
        assert_eq!(boll.signal, SignalStrategy::Bollinger { period: 200, width: 2.0 });

        assert!(toml::from_str::<Holder>("signal = { kind = \"rsi\", period = 14 }").is_err());
    }

    #[test]
    fn validation_rejects_degenerate_parameters() {
        assert!(SignalStrategy::Sma { short: 0, long: 10 }.validate().is_err());
        assert!(SignalStrategy::Bollinger { period: 20, width: 0.0 }.validate().is_err());
        assert!(SignalStrategy::Bollinger { period: 20, width: 2.0 }.validate().is_ok());
    }
}
