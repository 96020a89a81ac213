//! Indicator Engine
//!
//! Pure functions over a bar series. Every indicator returns `None` when the
//! series is shorter than its lookback plus warm-up; nothing here keeps
//! state between calls, so the same series always yields the same values.

pub mod moving_average;
pub mod oscillators;
pub mod reversal;
pub mod volatility;

use serde::Serialize;

use crate::config::IndicatorConfig;
use crate::types::Bar;

pub use moving_average::{ema, sma};
pub use oscillators::{kdj, macd, momentum, rsi, KdjValue, MacdValue};
pub use reversal::{parabolic_sar, williams_fractal, FractalPoint, FractalValue, SarValue};
pub use volatility::{atr, supertrend, true_range, SupertrendValue};

/// Direction of a trend-following indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendDirection {
    Up,
    Down,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Up => write!(f, "UP"),
            TrendDirection::Down => write!(f, "DOWN"),
        }
    }
}

/// Latest value of every indicator for one series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    /// Open time of the last bar in the series
    pub open_time: i64,
    pub close: f64,
    /// Bars the snapshot was computed from
    pub bars: usize,
    pub sma: Option<f64>,
    pub ema: Option<f64>,
    pub atr: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    pub supertrend: Option<SupertrendValue>,
    pub kdj: Option<KdjValue>,
    pub sar: Option<SarValue>,
    pub fractal: Option<FractalValue>,
    pub momentum: Option<f64>,
}

impl IndicatorSnapshot {
    /// Compute every indicator over `bars` (oldest first). `None` only for an
    /// empty series.
    pub fn compute(bars: &[Bar], config: &IndicatorConfig) -> Option<Self> {
        let last = bars.last()?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        Some(Self {
            open_time: last.open_time,
            close: last.close,
            bars: bars.len(),
            sma: sma(&closes, config.sma_period),
            ema: ema(&closes, config.ema_period),
            atr: atr(bars, config.atr_period),
            rsi: rsi(&closes, config.rsi_period),
            macd: macd(&closes, config.macd_fast, config.macd_slow, config.macd_signal),
            supertrend: supertrend(bars, config.supertrend_atr_period, config.supertrend_multiplier),
            kdj: kdj(bars, config.kdj_n, config.kdj_m1, config.kdj_m2),
            sar: parabolic_sar(bars, config.sar_initial_af, config.sar_af_step, config.sar_max_af),
            fractal: williams_fractal(bars),
            momentum: momentum(&closes, config.momentum_period),
        })
    }
}
