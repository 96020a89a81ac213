//! Confluence Assessment
//!
//! Maps raw indicator and level analysis to one qualitative state per
//! category:
//! - Trend: Supertrend position, neutralized when Parabolic SAR disagrees
//! - Momentum: MACD histogram sign and slope, checked against Momentum
//! - Oscillator: RSI bands first, then KDJ extremes with a K/D cross
//! - Volatility: ATR as a percentage of price (informational only)
//! - Fractal: close breaking the latest Williams fractal
//! - Support/Resistance: bounce or rejection at a pivot, Fibonacci or
//!   liquidity level
//!
//! Trend and momentum gate a signal; oscillator, fractal and S/R are the
//! supporting categories counted against `min_supporting`.

use serde::Serialize;

use super::fibonacci::FibonacciLevels;
use super::indicators::{
    FractalValue, IndicatorSnapshot, KdjValue, MacdValue, SarValue, SupertrendValue, TrendDirection,
};
use super::liquidity::LiquidityAnalysis;
use super::pivots::{PivotLevel, PivotLevels};
use crate::config::{ConfluenceConfig, ScoreWeights};
use crate::types::{Bar, Direction};

/// A qualitative state that can back one trade direction
pub trait DirectionalState {
    fn supports(&self, direction: Direction) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendState {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MomentumState {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OscillatorState {
    Overbought,
    Oversold,
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityState {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FractalState {
    Bullish,
    Bearish,
    Neutral,
}

/// Where a key price level came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum LevelSource {
    Pivot(PivotLevel),
    Fibonacci { ratio: f64 },
    /// Large resting bid; acts as support only
    BidLiquidity { qty: f64 },
    /// Large resting ask; acts as resistance only
    AskLiquidity { qty: f64 },
}

impl LevelSource {
    fn can_support(&self) -> bool {
        !matches!(self, LevelSource::AskLiquidity { .. })
    }

    fn can_resist(&self) -> bool {
        !matches!(self, LevelSource::BidLiquidity { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeyLevel {
    pub price: f64,
    pub source: LevelSource,
}

/// The level price reacted to
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelTouch {
    pub level: KeyLevel,
    /// |close - level| / close
    pub distance_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevelState {
    /// Came down to the level, held above it, closed up
    Bounce(LevelTouch),
    /// Came up to the level, held below it, closed down
    Rejection(LevelTouch),
    Neutral,
}

impl DirectionalState for TrendState {
    fn supports(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (TrendState::Bullish, Direction::Long) | (TrendState::Bearish, Direction::Short)
        )
    }
}

impl DirectionalState for MomentumState {
    fn supports(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (MomentumState::Bullish, Direction::Long) | (MomentumState::Bearish, Direction::Short)
        )
    }
}

impl DirectionalState for OscillatorState {
    fn supports(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => matches!(self, OscillatorState::Bullish | OscillatorState::Oversold),
            Direction::Short => matches!(self, OscillatorState::Bearish | OscillatorState::Overbought),
        }
    }
}

impl DirectionalState for FractalState {
    fn supports(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (FractalState::Bullish, Direction::Long) | (FractalState::Bearish, Direction::Short)
        )
    }
}

impl DirectionalState for LevelState {
    fn supports(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (LevelState::Bounce(_), Direction::Long) | (LevelState::Rejection(_), Direction::Short)
        )
    }
}

/// Price vs Supertrend, neutralized when SAR points the other way
pub fn assess_trend(close: f64, supertrend: Option<SupertrendValue>, sar: Option<SarValue>) -> TrendState {
    let Some(st) = supertrend else {
        return TrendState::Neutral;
    };
    let state = match st.direction {
        TrendDirection::Up if close > st.value => TrendState::Bullish,
        TrendDirection::Down if close < st.value => TrendState::Bearish,
        _ => TrendState::Neutral,
    };
    match (state, sar.map(|s| s.direction)) {
        (TrendState::Bullish, Some(TrendDirection::Down)) => TrendState::Neutral,
        (TrendState::Bearish, Some(TrendDirection::Up)) => TrendState::Neutral,
        (state, _) => state,
    }
}

/// Positive and non-falling histogram is bullish, negative and non-rising
/// bearish. A momentum reading on the other side of zero cancels either.
pub fn assess_momentum(macd: Option<MacdValue>, momentum: Option<f64>) -> MomentumState {
    let Some(m) = macd else {
        return MomentumState::Neutral;
    };
    let rising = m.prev_histogram.map_or(true, |prev| m.histogram >= prev);
    let falling = m.prev_histogram.map_or(true, |prev| m.histogram <= prev);

    let state = if m.histogram > 0.0 && rising {
        MomentumState::Bullish
    } else if m.histogram < 0.0 && falling {
        MomentumState::Bearish
    } else {
        MomentumState::Neutral
    };
    match (state, momentum) {
        (MomentumState::Bullish, Some(mom)) if mom < 0.0 => MomentumState::Neutral,
        (MomentumState::Bearish, Some(mom)) if mom > 0.0 => MomentumState::Neutral,
        (state, _) => state,
    }
}

pub fn assess_oscillator(rsi: Option<f64>, kdj: Option<KdjValue>, config: &ConfluenceConfig) -> OscillatorState {
    if let Some(rsi) = rsi {
        if rsi >= config.rsi_overbought {
            return OscillatorState::Overbought;
        }
        if rsi <= config.rsi_oversold {
            return OscillatorState::Oversold;
        }
    }
    if let Some(k) = kdj {
        if k.j < config.kdj_oversold && k.k > k.d {
            return OscillatorState::Bullish;
        }
        if k.j > config.kdj_overbought && k.k < k.d {
            return OscillatorState::Bearish;
        }
    }
    match rsi {
        Some(rsi) if rsi > 50.0 => OscillatorState::Bullish,
        Some(rsi) if rsi < 50.0 => OscillatorState::Bearish,
        _ => OscillatorState::Neutral,
    }
}

pub fn assess_volatility(atr: Option<f64>, close: f64, config: &ConfluenceConfig) -> Option<VolatilityState> {
    let atr = atr?;
    if close <= 0.0 {
        return None;
    }
    let pct = atr / close * 100.0;
    Some(if pct < config.low_volatility_pct {
        VolatilityState::Low
    } else if pct > config.high_volatility_pct {
        VolatilityState::High
    } else {
        VolatilityState::Normal
    })
}

/// Close above the last swing-high fractal is bullish, below the last
/// swing-low fractal bearish. When both hold the more recent fractal wins.
pub fn assess_fractal(close: f64, fractal: Option<FractalValue>) -> FractalState {
    let Some(f) = fractal else {
        return FractalState::Neutral;
    };
    let broke_high = f.last_bearish.filter(|p| close > p.price);
    let broke_low = f.last_bullish.filter(|p| close < p.price);
    match (broke_high, broke_low) {
        (Some(high), Some(low)) if low.index > high.index => FractalState::Bearish,
        (Some(_), _) => FractalState::Bullish,
        (None, Some(_)) => FractalState::Bearish,
        (None, None) => FractalState::Neutral,
    }
}

/// Gather every key level from the available analyses
pub fn collect_levels(
    pivots: Option<&PivotLevels>,
    fibonacci: Option<&FibonacciLevels>,
    liquidity: Option<&LiquidityAnalysis>,
) -> Vec<KeyLevel> {
    let mut levels = Vec::new();
    if let Some(p) = pivots {
        levels.extend(p.levels().into_iter().map(|(name, price)| KeyLevel {
            price,
            source: LevelSource::Pivot(name),
        }));
    }
    if let Some(fib) = fibonacci {
        levels.extend(fib.levels.iter().map(|l| KeyLevel {
            price: l.price,
            source: LevelSource::Fibonacci { ratio: l.ratio },
        }));
    }
    if let Some(liq) = liquidity {
        levels.extend(liq.significant_bids.iter().map(|l| KeyLevel {
            price: l.price,
            source: LevelSource::BidLiquidity { qty: l.qty },
        }));
        levels.extend(liq.significant_asks.iter().map(|l| KeyLevel {
            price: l.price,
            source: LevelSource::AskLiquidity { qty: l.qty },
        }));
    }
    levels
}

/// Bounce or rejection at the nearest level within `tolerance_pct` of the
/// close. Approach direction comes from the previous close; confirmation
/// from the latest bar's candle colour.
pub fn assess_levels(bar: &Bar, prev_close: Option<f64>, levels: &[KeyLevel], tolerance_pct: f64) -> LevelState {
    let Some(prev_close) = prev_close else {
        return LevelState::Neutral;
    };
    let close = bar.close;
    if close <= 0.0 {
        return LevelState::Neutral;
    }

    let mut best: Option<(f64, LevelState)> = None;
    for level in levels {
        let distance_pct = (close - level.price).abs() / close;
        if distance_pct > tolerance_pct {
            continue;
        }
        let touch = LevelTouch {
            level: *level,
            distance_pct,
        };
        let state = if level.source.can_support()
            && prev_close >= level.price
            && close >= level.price
            && bar.is_bullish()
        {
            LevelState::Bounce(touch)
        } else if level.source.can_resist()
            && prev_close <= level.price
            && close <= level.price
            && bar.is_bearish()
        {
            LevelState::Rejection(touch)
        } else {
            continue;
        };
        if best.map_or(true, |(d, _)| distance_pct < d) {
            best = Some((distance_pct, state));
        }
    }
    best.map_or(LevelState::Neutral, |(_, state)| state)
}

/// Qualitative view of one bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfluenceAssessment {
    pub trend: TrendState,
    pub momentum: MomentumState,
    pub oscillator: OscillatorState,
    pub volatility: Option<VolatilityState>,
    pub fractal: FractalState,
    pub support_resistance: LevelState,
}

impl ConfluenceAssessment {
    /// Direction both hard-gate categories agree on
    pub fn gate_direction(&self) -> Option<Direction> {
        [Direction::Long, Direction::Short]
            .into_iter()
            .find(|&d| self.trend.supports(d) && self.momentum.supports(d))
    }

    /// Supporting categories (oscillator, fractal, S/R) backing `direction`
    pub fn supporting_count(&self, direction: Direction) -> usize {
        [
            self.oscillator.supports(direction),
            self.fractal.supports(direction),
            self.support_resistance.supports(direction),
        ]
        .into_iter()
        .filter(|s| *s)
        .count()
    }

    /// Confluent direction, if the gates agree and enough support is present
    pub fn confluence(&self, min_supporting: usize) -> Option<Direction> {
        self.gate_direction()
            .filter(|&d| self.supporting_count(d) >= min_supporting)
    }

    /// Weighted share (0-100) of supporting categories backing `direction`
    pub fn readiness_pct(&self, direction: Direction, weights: &ScoreWeights) -> f64 {
        let total = weights.total();
        if total <= 0.0 {
            return 0.0;
        }
        let satisfied: f64 = [
            (self.oscillator.supports(direction), weights.oscillator),
            (self.fractal.supports(direction), weights.fractal),
            (self.support_resistance.supports(direction), weights.support_resistance),
        ]
        .iter()
        .filter(|(ok, _)| *ok)
        .map(|(_, w)| w)
        .sum();
        satisfied / total * 100.0
    }
}

/// Everything the assessor looks at for one bar
#[derive(Debug, Clone, Copy)]
pub struct AssessmentInputs<'a> {
    pub snapshot: &'a IndicatorSnapshot,
    pub bar: &'a Bar,
    pub prev_close: Option<f64>,
    pub pivots: Option<&'a PivotLevels>,
    pub fibonacci: Option<&'a FibonacciLevels>,
    pub liquidity: Option<&'a LiquidityAnalysis>,
}

#[derive(Debug, Clone)]
pub struct ConfluenceAssessor {
    config: ConfluenceConfig,
}

impl ConfluenceAssessor {
    pub fn new(config: ConfluenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConfluenceConfig {
        &self.config
    }

    pub fn assess(&self, inputs: &AssessmentInputs<'_>) -> ConfluenceAssessment {
        let snap = inputs.snapshot;
        let levels = collect_levels(inputs.pivots, inputs.fibonacci, inputs.liquidity);

        ConfluenceAssessment {
            trend: assess_trend(snap.close, snap.supertrend, snap.sar),
            momentum: assess_momentum(snap.macd, snap.momentum),
            oscillator: assess_oscillator(snap.rsi, snap.kdj, &self.config),
            volatility: assess_volatility(snap.atr, snap.close, &self.config),
            fractal: assess_fractal(snap.close, snap.fractal),
            support_resistance: assess_levels(
                inputs.bar,
                inputs.prev_close,
                &levels,
                self.config.level_tolerance_pct,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::indicators::FractalPoint;

    fn st(value: f64, direction: TrendDirection) -> Option<SupertrendValue> {
        Some(SupertrendValue {
            value,
            direction,
            flipped: false,
        })
    }

    fn sar(direction: TrendDirection) -> Option<SarValue> {
        Some(SarValue {
            value: 0.0,
            direction,
            acceleration: 0.02,
        })
    }

    fn macd(histogram: f64, prev: Option<f64>) -> Option<MacdValue> {
        Some(MacdValue {
            macd: histogram,
            signal: 0.0,
            histogram,
            prev_histogram: prev,
        })
    }

    fn kdj(k: f64, d: f64) -> Option<KdjValue> {
        Some(KdjValue { k, d, j: 3.0 * k - 2.0 * d })
    }

    fn fractal_point(index: usize, price: f64) -> Option<FractalPoint> {
        Some(FractalPoint {
            index,
            open_time: index as i64,
            price,
        })
    }

    #[test]
    fn test_trend_from_supertrend() {
        assert_eq!(assess_trend(105.0, st(100.0, TrendDirection::Up), None), TrendState::Bullish);
        assert_eq!(assess_trend(95.0, st(100.0, TrendDirection::Down), None), TrendState::Bearish);
        assert_eq!(assess_trend(95.0, st(100.0, TrendDirection::Up), None), TrendState::Neutral);
        assert_eq!(assess_trend(105.0, None, None), TrendState::Neutral);
    }

    #[test]
    fn test_trend_neutralized_by_sar_disagreement() {
        let up = st(100.0, TrendDirection::Up);
        assert_eq!(assess_trend(105.0, up, sar(TrendDirection::Up)), TrendState::Bullish);
        assert_eq!(assess_trend(105.0, up, sar(TrendDirection::Down)), TrendState::Neutral);
    }

    #[test]
    fn test_momentum_sign_and_slope() {
        assert_eq!(assess_momentum(macd(0.5, Some(0.3)), None), MomentumState::Bullish);
        assert_eq!(assess_momentum(macd(0.5, None), Some(1.0)), MomentumState::Bullish);
        // Positive but fading
        assert_eq!(assess_momentum(macd(0.5, Some(0.8)), None), MomentumState::Neutral);
        assert_eq!(assess_momentum(macd(-0.5, Some(-0.2)), None), MomentumState::Bearish);
        assert_eq!(assess_momentum(macd(-0.5, Some(-0.9)), None), MomentumState::Neutral);
        // Momentum on the other side of zero cancels
        assert_eq!(assess_momentum(macd(0.5, Some(0.3)), Some(-2.0)), MomentumState::Neutral);
        assert_eq!(assess_momentum(None, Some(5.0)), MomentumState::Neutral);
    }

    #[test]
    fn test_oscillator_bands_and_kdj() {
        let config = ConfluenceConfig::default();
        assert_eq!(assess_oscillator(Some(75.0), None, &config), OscillatorState::Overbought);
        assert_eq!(assess_oscillator(Some(25.0), None, &config), OscillatorState::Oversold);
        // J = 16 with K over D; J = 84 with K under D
        assert_eq!(assess_oscillator(Some(45.0), kdj(12.0, 10.0), &config), OscillatorState::Bullish);
        assert_eq!(assess_oscillator(Some(55.0), kdj(88.0, 90.0), &config), OscillatorState::Bearish);
        assert_eq!(assess_oscillator(Some(55.0), kdj(50.0, 50.0), &config), OscillatorState::Bullish);
        assert_eq!(assess_oscillator(None, None, &config), OscillatorState::Neutral);

        assert!(OscillatorState::Oversold.supports(Direction::Long));
        assert!(OscillatorState::Overbought.supports(Direction::Short));
        assert!(!OscillatorState::Overbought.supports(Direction::Long));
    }

    #[test]
    fn test_volatility_bands() {
        let config = ConfluenceConfig::default();
        assert_eq!(assess_volatility(Some(0.1), 100.0, &config), Some(VolatilityState::Low));
        assert_eq!(assess_volatility(Some(1.0), 100.0, &config), Some(VolatilityState::Normal));
        assert_eq!(assess_volatility(Some(3.0), 100.0, &config), Some(VolatilityState::High));
        assert_eq!(assess_volatility(None, 100.0, &config), None);
    }

    #[test]
    fn test_fractal_breaks() {
        let f = |high, low| {
            Some(FractalValue {
                last_bearish: high,
                last_bullish: low,
            })
        };
        assert_eq!(
            assess_fractal(110.0, f(fractal_point(5, 108.0), fractal_point(3, 95.0))),
            FractalState::Bullish
        );
        assert_eq!(
            assess_fractal(90.0, f(fractal_point(5, 108.0), fractal_point(3, 95.0))),
            FractalState::Bearish
        );
        assert_eq!(
            assess_fractal(100.0, f(fractal_point(5, 108.0), fractal_point(3, 95.0))),
            FractalState::Neutral
        );
        // Both broken: the newer swing low wins
        assert_eq!(
            assess_fractal(100.0, f(fractal_point(3, 98.0), fractal_point(6, 101.0))),
            FractalState::Bearish
        );
        assert_eq!(assess_fractal(100.0, None), FractalState::Neutral);
    }

    #[test]
    fn test_level_bounce_and_rejection() {
        let support = [KeyLevel {
            price: 100.0,
            source: LevelSource::Fibonacci { ratio: 0.618 },
        }];
        let up_bar = Bar::new(0, 100.0, 100.8, 99.9, 100.3, 1.0);
        match assess_levels(&up_bar, Some(100.6), &support, 0.005) {
            LevelState::Bounce(touch) => assert_eq!(touch.level.price, 100.0),
            other => panic!("expected bounce, got {:?}", other),
        }

        let down_bar = Bar::new(0, 100.2, 100.3, 99.4, 99.7, 1.0);
        assert!(matches!(
            assess_levels(&down_bar, Some(99.5), &support, 0.005),
            LevelState::Rejection(_)
        ));

        // Too far away
        let far = Bar::new(0, 104.0, 105.5, 103.8, 105.0, 1.0);
        assert_eq!(assess_levels(&far, Some(104.5), &support, 0.005), LevelState::Neutral);
        // No approach information
        assert_eq!(assess_levels(&up_bar, None, &support, 0.005), LevelState::Neutral);
    }

    #[test]
    fn test_liquidity_side_restricts_role() {
        let ask_wall = [KeyLevel {
            price: 100.0,
            source: LevelSource::AskLiquidity { qty: 50.0 },
        }];
        let up_bar = Bar::new(0, 100.0, 100.8, 99.9, 100.3, 1.0);
        // An ask wall never acts as support
        assert_eq!(assess_levels(&up_bar, Some(100.6), &ask_wall, 0.005), LevelState::Neutral);
    }

    #[test]
    fn test_nearest_level_wins() {
        let levels = [
            KeyLevel {
                price: 99.8,
                source: LevelSource::Pivot(PivotLevel::S1),
            },
            KeyLevel {
                price: 100.1,
                source: LevelSource::BidLiquidity { qty: 30.0 },
            },
        ];
        let bar = Bar::new(0, 100.0, 100.5, 99.9, 100.2, 1.0);
        match assess_levels(&bar, Some(100.4), &levels, 0.005) {
            LevelState::Bounce(touch) => {
                assert_eq!(touch.level.source, LevelSource::BidLiquidity { qty: 30.0 })
            }
            other => panic!("expected bounce, got {:?}", other),
        }
    }

    fn assessment() -> ConfluenceAssessment {
        ConfluenceAssessment {
            trend: TrendState::Bullish,
            momentum: MomentumState::Bullish,
            oscillator: OscillatorState::Oversold,
            volatility: Some(VolatilityState::Normal),
            fractal: FractalState::Bullish,
            support_resistance: LevelState::Neutral,
        }
    }

    #[test]
    fn test_confluence_requires_gates_and_support() {
        let a = assessment();
        assert_eq!(a.gate_direction(), Some(Direction::Long));
        assert_eq!(a.supporting_count(Direction::Long), 2);
        assert_eq!(a.confluence(2), Some(Direction::Long));
        assert_eq!(a.confluence(3), None);

        let split = ConfluenceAssessment {
            momentum: MomentumState::Bearish,
            ..assessment()
        };
        assert_eq!(split.gate_direction(), None);
        assert_eq!(split.confluence(0), None);
    }

    #[test]
    fn test_readiness_is_weighted_and_independent() {
        let weights = ScoreWeights {
            oscillator: 2.0,
            fractal: 1.0,
            support_resistance: 1.0,
        };
        let a = ConfluenceAssessment {
            momentum: MomentumState::Bearish,
            fractal: FractalState::Bearish,
            ..assessment()
        };
        // Long: oscillator (2) of 4; short: fractal (1) of 4
        assert!((a.readiness_pct(Direction::Long, &weights) - 50.0).abs() < 1e-9);
        assert!((a.readiness_pct(Direction::Short, &weights) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_readiness_ignores_gate_categories() {
        let gates_only = ConfluenceAssessment {
            oscillator: OscillatorState::Neutral,
            fractal: FractalState::Neutral,
            ..assessment()
        };
        assert_eq!(gates_only.gate_direction(), Some(Direction::Long));
        assert_eq!(gates_only.readiness_pct(Direction::Long, &ScoreWeights::default()), 0.0);

        // All three supporting categories without the gates still reads 100
        let support_only = ConfluenceAssessment {
            trend: TrendState::Neutral,
            momentum: MomentumState::Neutral,
            support_resistance: LevelState::Bounce(LevelTouch {
                level: KeyLevel {
                    price: 100.0,
                    source: LevelSource::Pivot(PivotLevel::S1),
                },
                distance_pct: 0.001,
            }),
            ..assessment()
        };
        assert_eq!(support_only.gate_direction(), None);
        assert!((support_only.readiness_pct(Direction::Long, &ScoreWeights::default()) - 100.0).abs() < 1e-9);
    }
}
