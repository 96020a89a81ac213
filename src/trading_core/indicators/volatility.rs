//! ATR and Supertrend

use serde::Serialize;

use super::TrendDirection;
use crate::types::Bar;

/// True range per bar; the first bar has no previous close and uses high - low
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let range = bar.high - bar.low;
            match i.checked_sub(1).map(|p| bars[p].close) {
                Some(prev_close) => range
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs()),
                None => range,
            }
        })
        .collect()
}

/// Wilder-smoothed ATR, seeded with the mean of the first `period` true ranges.
///
/// Element `k` of the result is the ATR at `bars[k + period - 1]`; the
/// first `period - 1` bars are warm-up and produce no value.
pub fn atr_series(bars: &[Bar], period: usize) -> Option<Vec<f64>> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let tr = true_range(bars);
    let n = period as f64;
    let seed = tr[..period].iter().sum::<f64>() / n;
    let mut out = Vec::with_capacity(tr.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &range in &tr[period..] {
        // ATR = (prev * (N - 1) + TR) / N
        prev = (prev * (n - 1.0) + range) / n;
        out.push(prev);
    }
    Some(out)
}

/// Latest ATR value
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    atr_series(bars, period).and_then(|series| series.last().copied())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SupertrendValue {
    /// Active band: lower band in an uptrend, upper band in a downtrend
    pub value: f64,
    pub direction: TrendDirection,
    /// Direction changed on the latest bar
    pub flipped: bool,
}

/// Supertrend over `hl2 ± multiplier * ATR`.
///
/// The final upper band only moves down (and the lower band only up) while
/// price stays inside it. Direction flips when the close crosses the final
/// band on the opposite side.
pub fn supertrend(bars: &[Bar], atr_period: usize, multiplier: f64) -> Option<SupertrendValue> {
    if atr_period == 0 || bars.len() < atr_period + 1 {
        return None;
    }
    let atr = atr_series(bars, atr_period)?;
    let offset = atr_period - 1;
    let basic_bands = |i: usize| {
        let bar = &bars[i];
        let hl2 = (bar.high + bar.low) / 2.0;
        let width = multiplier * atr[i - offset];
        (hl2 + width, hl2 - width)
    };

    let (mut upper, mut lower) = basic_bands(offset);
    let mut direction = if bars[offset].close <= upper {
        TrendDirection::Down
    } else {
        TrendDirection::Up
    };
    let mut flipped = false;

    for i in offset + 1..bars.len() {
        let (basic_upper, basic_lower) = basic_bands(i);
        let prev_close = bars[i - 1].close;
        if basic_upper < upper || prev_close > upper {
            upper = basic_upper;
        }
        if basic_lower > lower || prev_close < lower {
            lower = basic_lower;
        }

        let close = bars[i].close;
        let previous = direction;
        direction = match direction {
            TrendDirection::Down if close > upper => TrendDirection::Up,
            TrendDirection::Up if close < lower => TrendDirection::Down,
            unchanged => unchanged,
        };
        flipped = direction != previous;
    }

    let value = match direction {
        TrendDirection::Up => lower,
        TrendDirection::Down => upper,
    };
    Some(SupertrendValue {
        value,
        direction,
        flipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::indicators::test_support::{bars_from_closes, trending_bars};

    #[test]
    fn test_true_range_uses_previous_close_gap() {
        let bars = vec![
            Bar::new(0, 10.0, 11.0, 9.0, 10.0, 1.0),
            Bar::new(1, 14.0, 15.0, 13.0, 14.0, 1.0),
        ];
        assert_eq!(true_range(&bars), vec![2.0, 5.0]);
    }

    #[test]
    fn test_atr_constant_range() {
        // Every bar spans exactly 2.0 with no gaps
        let bars = bars_from_closes(&vec![100.0; 20], 1.0);
        let value = atr(&bars, 14).unwrap();
        assert!((value - 2.0).abs() < 1e-9);
        assert_eq!(atr_series(&bars, 14).unwrap().len(), 7);
    }

    #[test]
    fn test_atr_seeds_with_mean_true_range() {
        // First bar spans 10, the rest span 1 with no gaps
        let mut bars = vec![Bar::new(0, 100.0, 105.0, 95.0, 100.0, 1.0)];
        bars.extend((1..14).map(|i| Bar::new(i, 100.0, 100.5, 99.5, 100.0, 1.0)));
        let value = atr(&bars, 14).unwrap();
        assert!((value - 23.0 / 14.0).abs() < 1e-9);

        // One more bar applies a single Wilder step
        bars.push(Bar::new(14, 100.0, 101.5, 98.5, 100.0, 1.0));
        let next = atr(&bars, 14).unwrap();
        let expected = (23.0 / 14.0 * 13.0 + 3.0) / 14.0;
        assert!((next - expected).abs() < 1e-9);
    }

    #[test]
    fn test_atr_insufficient_data() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0], 0.5);
        assert_eq!(atr(&bars, 14), None);
        assert_eq!(atr(&bars, 0), None);
    }

    #[test]
    fn test_supertrend_follows_trend() {
        let up = supertrend(&trending_bars(60, 100.0, 1.0), 10, 3.0).unwrap();
        assert_eq!(up.direction, TrendDirection::Up);
        assert!(up.value < 160.0);

        let down = supertrend(&trending_bars(60, 200.0, -1.0), 10, 3.0).unwrap();
        assert_eq!(down.direction, TrendDirection::Down);
        assert!(down.value > 140.0);
    }

    #[test]
    fn test_supertrend_flips_on_band_cross() {
        let mut bars = trending_bars(40, 100.0, 1.0);
        let last = bars.last().unwrap().close;
        // Collapse far below the lower band
        bars.push(Bar::new(bars.len() as i64, last, last, last - 60.0, last - 55.0, 1.0));
        let st = supertrend(&bars, 10, 3.0).unwrap();
        assert_eq!(st.direction, TrendDirection::Down);
        assert!(st.flipped);
    }

    #[test]
    fn test_supertrend_insufficient_data() {
        assert_eq!(supertrend(&trending_bars(10, 100.0, 1.0), 10, 3.0), None);
    }
}
