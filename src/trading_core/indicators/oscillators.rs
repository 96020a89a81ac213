//! MACD, RSI, KDJ and Momentum

use serde::Serialize;

use super::moving_average::{ema_alpha, ema_series, smooth};
use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    /// Histogram one bar earlier; needs one extra bar of history
    pub prev_histogram: Option<f64>,
}

/// MACD line `EMA(fast) - EMA(slow)`, signal line `EMA(macd, signal)`.
///
/// The MACD line only exists once the slow EMA has `slow` inputs, so a full
/// value needs `slow + signal - 1` closes.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdValue> {
    if fast == 0 || slow == 0 || signal == 0 || closes.len() < slow + signal - 1 {
        return None;
    }
    let fast_ema = ema_series(closes, fast)?;
    let slow_ema = ema_series(closes, slow)?;
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .skip(slow - 1)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = smooth(&line, ema_alpha(signal));
    let histogram_at = |i: usize| line[i] - signal_line[i];

    let last = line.len() - 1;
    Some(MacdValue {
        macd: line[last],
        signal: signal_line[last],
        histogram: histogram_at(last),
        prev_histogram: (line.len() > signal).then(|| histogram_at(last - 1)),
    })
}

/// Wilder RSI. The averages are seeded with the plain mean of the first
/// `period` changes.
///
/// A series with no movement at all reads 50; no losses reads 100.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = changes.split_at(period);

    let mut avg_gain = seed.iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = seed.iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;
    let p = period as f64;
    for change in rest {
        avg_gain = (avg_gain * (p - 1.0) + change.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-change).max(0.0)) / p;
    }

    Some(if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KdjValue {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

/// Stochastic KDJ.
///
/// RSV over an `n`-bar high/low window (50 when the window is flat), K and D
/// smoothed from 50 with `1/m1` and `1/m2`, `J = 3K - 2D`. K and D stay in
/// `[0, 100]`; J may overshoot.
pub fn kdj(bars: &[Bar], n: usize, m1: usize, m2: usize) -> Option<KdjValue> {
    if n == 0 || m1 == 0 || m2 == 0 || bars.len() < n {
        return None;
    }
    let (a1, a2) = (1.0 / m1 as f64, 1.0 / m2 as f64);
    let (mut k, mut d) = (50.0_f64, 50.0_f64);

    for window in bars.windows(n) {
        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let close = window[n - 1].close;
        let rsv = if highest > lowest {
            (close - lowest) / (highest - lowest) * 100.0
        } else {
            50.0
        };
        k = ((1.0 - a1) * k + a1 * rsv).clamp(0.0, 100.0);
        d = ((1.0 - a2) * d + a2 * k).clamp(0.0, 100.0);
    }

    Some(KdjValue { k, d, j: 3.0 * k - 2.0 * d })
}

/// Close minus the close `period` bars ago
pub fn momentum(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let last = closes.len() - 1;
    Some(closes[last] - closes[last - period])
}
