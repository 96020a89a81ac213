//! Configuration for the confluence strategy engine
//!
//! Read-only for the lifetime of an engine instance. Defaults mirror the
//! settings the strategy was tuned with; `validate` is the only place a
//! configuration can fail.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};

/// Bar interval, stored in milliseconds.
///
/// Parsed from strings such as `"1m"`, `"15m"`, `"1h"`, `"4h"`, `"1d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    millis: i64,
}

impl Timeframe {
    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    pub const fn minutes(n: i64) -> Self {
        Self::from_millis(n * 60_000)
    }

    pub const fn hours(n: i64) -> Self {
        Self::from_millis(n * 3_600_000)
    }

    pub fn as_millis(&self) -> i64 {
        self.millis
    }

    /// Start of the calendar-aligned period containing `ts` (epoch ms)
    pub fn period_start(&self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.millis)
    }
}

impl FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || EngineError::InvalidConfiguration(format!("invalid timeframe '{}'", s));
        if s.len() < 2 || !s.is_char_boundary(s.len() - 1) {
            return Err(invalid());
        }
        let (digits, unit) = s.split_at(s.len() - 1);
        let n: i64 = digits.parse().map_err(|_| invalid())?;
        if n <= 0 {
            return Err(invalid());
        }
        let unit_ms = match unit {
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            _ => return Err(invalid()),
        };
        let millis = n.checked_mul(unit_ms).ok_or_else(invalid)?;
        Ok(Self::from_millis(millis))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const UNITS: [(i64, &str); 4] = [(86_400_000, "d"), (3_600_000, "h"), (60_000, "m"), (1_000, "s")];
        for (unit_ms, suffix) in UNITS {
            if self.millis % unit_ms == 0 {
                return write!(f, "{}{}", self.millis / unit_ms, suffix);
            }
        }
        write!(f, "{}ms", self.millis)
    }
}

/// Indicator periods and multipliers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub sma_period: usize,
    pub ema_period: usize,
    /// ATR used for volatility state and TP/SL distances
    pub atr_period: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub supertrend_atr_period: usize,
    pub supertrend_multiplier: f64,
    /// RSV window for KDJ
    pub kdj_n: usize,
    /// K smoothing
    pub kdj_m1: usize,
    /// D smoothing
    pub kdj_m2: usize,
    pub sar_initial_af: f64,
    pub sar_af_step: f64,
    pub sar_max_af: f64,
    pub momentum_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_period: 20,
            ema_period: 50,
            atr_period: 14,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            supertrend_atr_period: 10,
            supertrend_multiplier: 3.0,
            kdj_n: 9,
            kdj_m1: 3,
            kdj_m2: 3,
            sar_initial_af: 0.02,
            sar_af_step: 0.02,
            sar_max_af: 0.2,
            momentum_period: 10,
        }
    }
}

/// Weights of the supporting categories in the consolidation readiness score.
///
/// Trend and momentum are hard gates and carry no weight here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub oscillator: f64,
    pub fractal: f64,
    pub support_resistance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            oscillator: 1.0,
            fractal: 1.0,
            support_resistance: 1.0,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.oscillator + self.fractal + self.support_resistance
    }
}

/// Thresholds mapping raw indicator values to qualitative states
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub kdj_overbought: f64,
    pub kdj_oversold: f64,
    /// Max relative distance |close - level| / close to count as "at level"
    pub level_tolerance_pct: f64,
    /// ATR as percent of close below which volatility is LOW
    pub low_volatility_pct: f64,
    /// ATR as percent of close above which volatility is HIGH
    pub high_volatility_pct: f64,
    /// Supporting categories (oscillator, fractal, S/R) that must agree
    pub min_supporting: usize,
    pub weights: ScoreWeights,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            kdj_overbought: 80.0,
            kdj_oversold: 20.0,
            level_tolerance_pct: 0.005,
            low_volatility_pct: 0.2,
            high_volatility_pct: 2.0,
            min_supporting: 2,
            weights: ScoreWeights::default(),
        }
    }
}

/// Take-profit / stop-loss placement and R:R gating
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub tp_atr_multiplier: f64,
    pub sl_atr_multiplier: f64,
    pub min_risk_reward: f64,
    /// TP distance as a fraction of entry when ATR is unavailable
    pub fallback_tp_pct: f64,
    /// SL distance as a fraction of entry when ATR is unavailable
    pub fallback_sl_pct: f64,
    pub min_tp_distance_pct: f64,
    pub min_sl_distance_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            tp_atr_multiplier: 2.0,
            sl_atr_multiplier: 1.5,
            min_risk_reward: 1.2,
            fallback_tp_pct: 0.01,
            fallback_sl_pct: 0.01,
            min_tp_distance_pct: 0.005,
            min_sl_distance_pct: 0.005,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FibonacciConfig {
    /// Coarse bars searched for swings
    pub lookback: usize,
    /// Bars on each side a swing point must dominate
    pub swing_order: usize,
}

impl Default for FibonacciConfig {
    fn default() -> Self {
        Self {
            lookback: 60,
            swing_order: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityConfig {
    /// Minimum resting quantity for a level to be significant
    pub qty_threshold: f64,
    /// Significant levels kept per side
    pub max_levels: usize,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            qty_threshold: 10.0,
            max_levels: 10,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Interval of the incoming fine bars
    pub base_interval: Timeframe,
    /// Decision timeframe the fine bars are aggregated into
    pub strategy_timeframe: Timeframe,
    /// Finalized coarse bars retained
    pub retention_cap: usize,
    /// Finalized coarse bars required before evaluating confluence
    pub min_bars: usize,
    /// IANA timezone in which the pivot trading day rolls over
    pub session_timezone: String,
    pub indicators: IndicatorConfig,
    pub confluence: ConfluenceConfig,
    pub risk: RiskConfig,
    pub fibonacci: FibonacciConfig,
    pub liquidity: LiquidityConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            base_interval: Timeframe::minutes(1),
            strategy_timeframe: Timeframe::hours(1),
            retention_cap: 100,
            min_bars: 40,
            session_timezone: "UTC".to_string(),
            indicators: IndicatorConfig::default(),
            confluence: ConfluenceConfig::default(),
            risk: RiskConfig::default(),
            fibonacci: FibonacciConfig::default(),
            liquidity: LiquidityConfig::default(),
        }
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> EngineResult<()> {
    if condition {
        Ok(())
    } else {
        Err(EngineError::InvalidConfiguration(message()))
    }
}

impl StrategyConfig {
    /// Parse the session timezone
    pub fn session_tz(&self) -> EngineResult<Tz> {
        self.session_timezone.parse::<Tz>().map_err(|_| {
            EngineError::InvalidConfiguration(format!(
                "unknown session timezone '{}'",
                self.session_timezone
            ))
        })
    }

    /// Check every period, threshold and lookback. Called once at engine construction.
    pub fn validate(&self) -> EngineResult<()> {
        let base = self.base_interval.as_millis();
        let coarse = self.strategy_timeframe.as_millis();
        ensure(base > 0 && coarse > 0, || "timeframes must be positive".into())?;
        ensure(coarse >= base, || {
            format!(
                "strategy timeframe {} is smaller than base interval {}",
                self.strategy_timeframe, self.base_interval
            )
        })?;
        ensure(coarse % base == 0, || {
            format!(
                "strategy timeframe {} is not a multiple of base interval {}",
                self.strategy_timeframe, self.base_interval
            )
        })?;
        ensure(self.retention_cap > 0, || "retention_cap must be positive".into())?;
        ensure(self.min_bars > 0, || "min_bars must be positive".into())?;
        self.session_tz()?;

        let ind = &self.indicators;
        let periods = [
            ("sma_period", ind.sma_period),
            ("ema_period", ind.ema_period),
            ("atr_period", ind.atr_period),
            ("rsi_period", ind.rsi_period),
            ("macd_fast", ind.macd_fast),
            ("macd_slow", ind.macd_slow),
            ("macd_signal", ind.macd_signal),
            ("supertrend_atr_period", ind.supertrend_atr_period),
            ("kdj_n", ind.kdj_n),
            ("kdj_m1", ind.kdj_m1),
            ("kdj_m2", ind.kdj_m2),
            ("momentum_period", ind.momentum_period),
        ];
        for (name, period) in periods {
            ensure(period > 0, || format!("{} must be positive", name))?;
        }
        ensure(ind.macd_fast < ind.macd_slow, || "macd_fast must be below macd_slow".into())?;
        ensure(ind.supertrend_multiplier > 0.0, || "supertrend_multiplier must be positive".into())?;
        ensure(ind.sar_initial_af > 0.0 && ind.sar_af_step > 0.0, || {
            "SAR acceleration factors must be positive".into()
        })?;
        ensure(ind.sar_initial_af <= ind.sar_max_af, || "sar_initial_af exceeds sar_max_af".into())?;

        // Every lookback must fit inside the retained history
        let lookbacks = [
            ("min_bars", self.min_bars),
            ("macd_slow + macd_signal", ind.macd_slow + ind.macd_signal),
            ("rsi_period + 1", ind.rsi_period + 1),
            ("supertrend_atr_period + 1", ind.supertrend_atr_period + 1),
            ("momentum_period + 1", ind.momentum_period + 1),
            ("sma_period", ind.sma_period),
            ("ema_period", ind.ema_period),
            ("atr_period", ind.atr_period),
            ("kdj_n", ind.kdj_n),
            ("fibonacci.lookback", self.fibonacci.lookback),
        ];
        for (name, lookback) in lookbacks {
            ensure(lookback <= self.retention_cap, || {
                format!(
                    "{} ({}) exceeds retention_cap ({})",
                    name, lookback, self.retention_cap
                )
            })?;
        }

        let conf = &self.confluence;
        ensure(
            0.0 < conf.rsi_oversold && conf.rsi_oversold < conf.rsi_overbought && conf.rsi_overbought < 100.0,
            || "RSI thresholds must satisfy 0 < oversold < overbought < 100".into(),
        )?;
        ensure(conf.kdj_oversold < conf.kdj_overbought, || "KDJ oversold must be below overbought".into())?;
        ensure(conf.level_tolerance_pct >= 0.0, || "level_tolerance_pct must not be negative".into())?;
        ensure(conf.low_volatility_pct <= conf.high_volatility_pct, || {
            "low_volatility_pct exceeds high_volatility_pct".into()
        })?;
        ensure(conf.min_supporting <= 3, || "min_supporting cannot exceed the 3 supporting categories".into())?;
        let w = &conf.weights;
        ensure(
            [w.oscillator, w.fractal, w.support_resistance]
                .iter()
                .all(|v| *v >= 0.0)
                && w.total() > 0.0,
            || "score weights must be non-negative with a positive total".into(),
        )?;

        let risk = &self.risk;
        ensure(risk.tp_atr_multiplier > 0.0 && risk.sl_atr_multiplier > 0.0, || {
            "ATR TP/SL multipliers must be positive".into()
        })?;
        ensure(risk.min_risk_reward >= 0.0, || "min_risk_reward must not be negative".into())?;
        ensure(
            [
                risk.fallback_tp_pct,
                risk.fallback_sl_pct,
                risk.min_tp_distance_pct,
                risk.min_sl_distance_pct,
            ]
            .iter()
            .all(|p| *p > 0.0 && *p < 1.0),
            || "risk percentages must lie in (0, 1)".into(),
        )?;

        ensure(self.fibonacci.swing_order > 0, || "fibonacci.swing_order must be positive".into())?;
        ensure(self.fibonacci.lookback > 2 * self.fibonacci.swing_order, || {
            "fibonacci.lookback must exceed 2 * swing_order".into()
        })?;
        ensure(self.liquidity.qty_threshold >= 0.0, || "liquidity.qty_threshold must not be negative".into())?;
        ensure(self.liquidity.max_levels > 0, || "liquidity.max_levels must be positive".into())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StrategyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::minutes(1));
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::hours(4));
        assert_eq!("1d".parse::<Timeframe>().unwrap().as_millis(), 86_400_000);
        assert!("0m".parse::<Timeframe>().is_err());
        assert!("h".parse::<Timeframe>().is_err());
        assert!("5x".parse::<Timeframe>().is_err());
        assert!(matches!(
            "99999999999999999d".parse::<Timeframe>(),
            Err(EngineError::InvalidConfiguration(_))
        ));
        assert!(serde_json::from_str::<StrategyConfig>(r#"{"strategy_timeframe": "99999999999999999d"}"#).is_err());
        assert_eq!(Timeframe::minutes(90).to_string(), "90m");
        assert_eq!(Timeframe::hours(24).to_string(), "1d");
    }

    #[test]
    fn test_period_start_is_calendar_aligned() {
        let hour = Timeframe::hours(1);
        // 2024-01-01 10:37:00 UTC
        let ts = 1_704_105_420_000;
        assert_eq!(hour.period_start(ts), 1_704_103_200_000);
        assert_eq!(hour.period_start(1_704_103_200_000), 1_704_103_200_000);
    }

    #[test]
    fn test_rejects_non_positive_period() {
        let mut config = StrategyConfig::default();
        config.indicators.rsi_period = 0;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_lookback_beyond_retention() {
        let mut config = StrategyConfig::default();
        config.fibonacci.lookback = 150;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fibonacci.lookback"));

        let mut config = StrategyConfig::default();
        config.retention_cap = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_timeframe_smaller_than_base() {
        let config = StrategyConfig {
            base_interval: Timeframe::hours(1),
            strategy_timeframe: Timeframe::minutes(15),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let config = StrategyConfig {
            session_timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{"strategy_timeframe": "15m", "risk": {"min_risk_reward": 2.0}}"#;
        let config: StrategyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.strategy_timeframe, Timeframe::minutes(15));
        assert_eq!(config.risk.min_risk_reward, 2.0);
        assert_eq!(config.risk.tp_atr_multiplier, 2.0);
        assert_eq!(config.indicators.rsi_period, 14);
    }
}
