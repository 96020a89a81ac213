//! Parabolic SAR and Williams Fractal

use serde::Serialize;

use super::TrendDirection;
use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SarValue {
    pub value: f64,
    pub direction: TrendDirection,
    /// Acceleration factor in effect after the latest bar
    pub acceleration: f64,
}

/// Wilder's Parabolic SAR.
///
/// The stop is never placed inside the previous two bars' range. A bar
/// trading through the stop flips direction, restarts from the extreme point
/// of the finished trend and resets the acceleration factor.
pub fn parabolic_sar(bars: &[Bar], initial_af: f64, step: f64, max_af: f64) -> Option<SarValue> {
    if bars.len() < 3 {
        return None;
    }
    let (first, second) = (&bars[0], &bars[1]);
    let mut direction = if second.close >= first.close {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };
    let (mut sar, mut extreme) = match direction {
        TrendDirection::Up => (first.low.min(second.low), first.high.max(second.high)),
        TrendDirection::Down => (first.high.max(second.high), first.low.min(second.low)),
    };
    let mut af = initial_af;

    for i in 2..bars.len() {
        let bar = &bars[i];
        let (prev1, prev2) = (&bars[i - 1], &bars[i - 2]);
        let projected = sar + af * (extreme - sar);

        match direction {
            TrendDirection::Up => {
                let projected = projected.min(prev1.low).min(prev2.low);
                if bar.low < projected {
                    direction = TrendDirection::Down;
                    sar = extreme;
                    extreme = bar.low;
                    af = initial_af;
                } else {
                    sar = projected;
                    if bar.high > extreme {
                        extreme = bar.high;
                        af = (af + step).min(max_af);
                    }
                }
            }
            TrendDirection::Down => {
                let projected = projected.max(prev1.high).max(prev2.high);
                if bar.high > projected {
                    direction = TrendDirection::Up;
                    sar = extreme;
                    extreme = bar.high;
                    af = initial_af;
                } else {
                    sar = projected;
                    if bar.low < extreme {
                        extreme = bar.low;
                        af = (af + step).min(max_af);
                    }
                }
            }
        }
    }

    Some(SarValue {
        value: sar,
        direction,
        acceleration: af,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FractalPoint {
    /// Position in the input series
    pub index: usize,
    pub open_time: i64,
    pub price: f64,
}

/// Most recent confirmed fractals on each side
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FractalValue {
    /// Swing high (bearish fractal)
    pub last_bearish: Option<FractalPoint>,
    /// Swing low (bullish fractal)
    pub last_bullish: Option<FractalPoint>,
}

/// Williams Fractal: a bar whose high (low) is strictly above (below) the
/// two bars on either side. The last two bars can never be confirmed.
pub fn williams_fractal(bars: &[Bar]) -> Option<FractalValue> {
    if bars.len() < 5 {
        return None;
    }
    let is_bearish = |i: usize| {
        let h = bars[i].high;
        [i - 2, i - 1, i + 1, i + 2].iter().all(|&j| h > bars[j].high)
    };
    let is_bullish = |i: usize| {
        let l = bars[i].low;
        [i - 2, i - 1, i + 1, i + 2].iter().all(|&j| l < bars[j].low)
    };
    let point = |i: usize, price: f64| FractalPoint {
        index: i,
        open_time: bars[i].open_time,
        price,
    };

    let mut candidates = (2..bars.len() - 2).rev();
    Some(FractalValue {
        last_bearish: candidates
            .clone()
            .find(|&i| is_bearish(i))
            .map(|i| point(i, bars[i].high)),
        last_bullish: candidates
            .find(|&i| is_bullish(i))
            .map(|i| point(i, bars[i].low)),
    })
}
