/// Rolling statistics over close prices
///
/// Both helpers use a partial window at the start of the series (a window of
/// `min(i + 1, period)` values), so every bar gets a value.

/// Rolling simple mean
pub fn rolling_mean(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= period {
            sum -= values[i - period];
        }
        let count = (i + 1).min(period);
        out.push(sum / count as f64);
    }
    out
}

/// Rolling population standard deviation (divides by N)
pub fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(period);
            let window = &values[start..=i];
            let n = window.len() as f64;
            let mean = window.iter().sum::<f64>() / n;
            let variance = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            variance.sqrt()
        })
        .collect()
}
