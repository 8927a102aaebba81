//! Technical indicators
//!
//! Full-series indicators computed once before a run and indexed by bar.
//! Values are `None` until the indicator has enough bars.

/// Calculate Exponential Moving Average (seeded with the SMA of the first `period` values)
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    if period == 0 {
        result.resize(values.len(), None);
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_value: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[0..period].iter().sum();
            ema_value = Some(sum / period as f64);
            result.push(ema_value);
        } else if let Some(prev_ema) = ema_value {
            let new_ema = (value - prev_ema) * multiplier + prev_ema;
            ema_value = Some(new_ema);
            result.push(Some(new_ema));
        }
    }

    result
}

/// Calculate RSI from simple rolling averages of gains and losses
///
/// Bar `i` averages the `period` close-to-close changes ending at `i`, so the
/// first value appears at index `period`. A window without losses reads 100,
/// a window without any movement reads 50.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut rsi_values = vec![None; values.len()];

    if period == 0 || values.len() <= period {
        return rsi_values;
    }

    let mut gains = Vec::with_capacity(values.len());
    let mut losses = Vec::with_capacity(values.len());
    gains.push(0.0);
    losses.push(0.0);

    for i in 1..values.len() {
        let change = values[i] - values[i - 1];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    for i in period..values.len() {
        let window = i + 1 - period..=i;
        let avg_gain = gains[window.clone()].iter().sum::<f64>() / period as f64;
        let avg_loss = losses[window].iter().sum::<f64>() / period as f64;

        let value = if avg_loss == 0.0 && avg_gain == 0.0 {
            50.0
        } else if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        };
        rsi_values[i] = Some(value);
    }

    rsi_values
}

/// Lowest and highest close over the `lookback` bars ending at `end` (inclusive)
pub fn swing_range(values: &[f64], end: usize, lookback: usize) -> Option<(f64, f64)> {
    if lookback == 0 || end >= values.len() {
        return None;
    }

    let start = (end + 1).saturating_sub(lookback);
    let window = &values[start..=end];
    let low = window.iter().copied().fold(f64::INFINITY, f64::min);
    let high = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((low, high))
}

/// Fibonacci retracement price `level` of the way up from `low` to `high`
pub fn fib_target(low: f64, high: f64, level: f64) -> f64 {
    low + (high - low) * level
}
