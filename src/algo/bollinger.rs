/// Bollinger band breakout
///
/// Open when the close breaks above the upper band, close when it falls back
/// below the middle band. Bands use the population standard deviation.

use super::math_calculations::{rolling_mean, rolling_std};
use super::signal_processor::crossed;
use crate::core::Signal;

#[derive(Debug, Clone, PartialEq)]
pub struct Bands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bands(closes: &[f64], period: usize, width: f64) -> Bands {
    let middle = rolling_mean(closes, period);
    let std = rolling_std(closes, period);
    let upper = middle.iter().zip(&std).map(|(m, s)| m + width * s).collect();
    let lower = middle.iter().zip(&std).map(|(m, s)| m - width * s).collect();
    Bands { upper, middle, lower }
}

/// Raw breakout signals before de-duplication
pub fn raw_signals(closes: &[f64], period: usize, width: f64) -> Vec<Option<Signal>> {
    let Bands { upper, middle, .. } = bands(closes, period, width);

    (0..closes.len())
        .map(|i| {
            let prev = i.checked_sub(1);
            let breakout = crossed(closes[i] > upper[i], prev.map(|p| closes[p] <= upper[p]));
            let breakdown = crossed(closes[i] < middle[i], prev.map(|p| closes[p] >= middle[p]));
            if breakout {
                Some(Signal::Open)
            } else if breakdown {
                Some(Signal::Close)
            } else {
                None
            }
        })
        .collect()
}
