/// Dual moving-average crossover
///
/// The long average is taken over the short average, not over raw closes.

use super::math_calculations::rolling_mean;
use super::signal_processor::crossed;
use crate::core::Signal;

/// Raw crossover signals before de-duplication
pub fn raw_signals(closes: &[f64], short: usize, long: usize) -> Vec<Option<Signal>> {
    let ma_short = rolling_mean(closes, short);
    let ma_long = rolling_mean(&ma_short, long);

    (0..closes.len())
        .map(|i| {
            let prev = i.checked_sub(1);
            let above = crossed(
                ma_short[i] > ma_long[i],
                prev.map(|p| ma_short[p] <= ma_long[p]),
            );
            let below = crossed(
                ma_short[i] < ma_long[i],
                prev.map(|p| ma_short[p] >= ma_long[p]),
            );
            if above {
                Some(Signal::Open)
            } else if below {
                Some(Signal::Close)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::SignalStrategy;

    fn rise_then_fall() -> Vec<f64> {
        let mut closes: Vec<f64> = vec![10.0; 12];
        closes.extend((1..=10).map(|i| 10.0 + i as f64));
        closes.extend((1..=15).map(|i| 20.0 - 1.5 * i as f64));
        closes
    }

    #[test]
    fn opens_on_upturn_and_closes_on_downturn() {
        let strategy = SignalStrategy::Sma { short: 5, long: 10 };
        let signals = strategy.signal_series(&rise_then_fall());

        let fired: Vec<(usize, Signal)> = signals
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|s| (i, s)))
            .collect();

        assert_eq!(fired.len(), 2, "expected one open and one close, got {:?}", fired);
        assert_eq!(fired[0], (12, Signal::Open));
        assert_eq!(fired[1].1, Signal::Close);
        assert!(fired[1].0 > 22, "close must come after the peak at bar 21");
    }

    #[test]
    fn flat_series_never_signals() {
        let signals = raw_signals(&[5.0; 30], 5, 10);
        assert!(signals.iter().all(Option::is_none));
    }
}
