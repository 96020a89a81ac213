//! Fibonacci Retracement Analyzer
//!
//! Finds swing points over the recent lookback, keeps them strictly
//! alternating high/low, and measures retracements across the last swing
//! pair. When the high is the more recent extreme the move was up and levels
//! are measured down from the high; otherwise up from the low.

use serde::Serialize;

use super::indicators::TrendDirection;
use crate::types::Bar;

pub const RETRACEMENT_RATIOS: [f64; 5] = [0.236, 0.382, 0.5, 0.618, 0.786];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SwingPoint {
    pub kind: SwingKind,
    pub index: usize,
    pub open_time: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FibLevel {
    pub ratio: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FibonacciLevels {
    pub swing_high: SwingPoint,
    pub swing_low: SwingPoint,
    /// Up when the swing high is the more recent extreme
    pub direction: TrendDirection,
    pub levels: Vec<FibLevel>,
}

/// Swing points where a bar's high (low) is at least (at most) every other
/// high (low) within `order` bars on each side.
pub fn find_swings(bars: &[Bar], order: usize) -> Vec<SwingPoint> {
    let mut swings = Vec::new();
    if order == 0 || bars.len() < 2 * order + 1 {
        return swings;
    }
    for i in order..bars.len() - order {
        let window = &bars[i - order..=i + order];
        let bar = &bars[i];
        if window.iter().all(|b| bar.high >= b.high) {
            swings.push(SwingPoint {
                kind: SwingKind::High,
                index: i,
                open_time: bar.open_time,
                price: bar.high,
            });
        }
        if window.iter().all(|b| bar.low <= b.low) {
            swings.push(SwingPoint {
                kind: SwingKind::Low,
                index: i,
                open_time: bar.open_time,
                price: bar.low,
            });
        }
    }
    swings
}

/// Collapse runs of same-kind swings to their most extreme member (the later
/// one on ties) so highs and lows alternate.
pub fn alternate(swings: Vec<SwingPoint>) -> Vec<SwingPoint> {
    let mut out: Vec<SwingPoint> = Vec::with_capacity(swings.len());
    for swing in swings {
        match out.last_mut() {
            Some(last) if last.kind == swing.kind => {
                let more_extreme = match swing.kind {
                    SwingKind::High => swing.price >= last.price,
                    SwingKind::Low => swing.price <= last.price,
                };
                if more_extreme {
                    *last = swing;
                }
            }
            _ => out.push(swing),
        }
    }
    out
}

/// Retracement levels over the last `lookback` bars.
///
/// `None` when fewer than two alternating swings exist or the swing range is
/// empty.
pub fn analyze(bars: &[Bar], lookback: usize, order: usize) -> Option<FibonacciLevels> {
    let start = bars.len().saturating_sub(lookback);
    let swings = alternate(find_swings(&bars[start..], order));
    let [.., a, b] = swings.as_slice() else {
        return None;
    };
    let (swing_high, swing_low, direction) = match b.kind {
        SwingKind::High => (*b, *a, TrendDirection::Up),
        SwingKind::Low => (*a, *b, TrendDirection::Down),
    };

    let range = swing_high.price - swing_low.price;
    if range <= 0.0 {
        return None;
    }
    let levels = RETRACEMENT_RATIOS
        .iter()
        .map(|&ratio| FibLevel {
            ratio,
            price: match direction {
                TrendDirection::Up => swing_high.price - ratio * range,
                TrendDirection::Down => swing_low.price + ratio * range,
            },
        })
        .collect();

    // Indices are relative to the lookback window; report them against the full series
    let rebase = |p: SwingPoint| SwingPoint {
        index: p.index + start,
        ..p
    };
    Some(FibonacciLevels {
        swing_high: rebase(swing_high),
        swing_low: rebase(swing_low),
        direction,
        levels,
    })
}
