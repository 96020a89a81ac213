//! Signal Engine
//!
//! State machine run once per finalized coarse bar:
//! 1. COLLECTING - fewer bars than `min_bars`, nothing is assessed
//! 2. EVALUATING - indicators and confluence computed for the bar
//! 3. SIGNAL_LONG / SIGNAL_SHORT - confluence with an acceptable risk plan
//! 4. CONSOLIDATING - no confluence, or the risk plan was rejected
//!
//! `evaluate` is pure and shared by the live preview and the commit path;
//! only `commit` moves the state machine and mints signals. The machine's
//! state and its at-most-once guard live in a `SignalTracker` owned by the
//! caller.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::confluence::{AssessmentInputs, ConfluenceAssessment, ConfluenceAssessor};
use super::fibonacci;
use super::indicators::IndicatorSnapshot;
use super::liquidity::LiquidityAnalysis;
use super::pivots::PivotLevels;
use crate::config::{FibonacciConfig, IndicatorConfig, RiskConfig, StrategyConfig};
use crate::types::{Bar, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalState {
    Collecting,
    Evaluating,
    SignalLong,
    SignalShort,
    Consolidating,
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalState::Collecting => write!(f, "COLLECTING"),
            SignalState::Evaluating => write!(f, "EVALUATING"),
            SignalState::SignalLong => write!(f, "SIGNAL_LONG"),
            SignalState::SignalShort => write!(f, "SIGNAL_SHORT"),
            SignalState::Consolidating => write!(f, "CONSOLIDATING"),
        }
    }
}

/// Readiness toward each side, 0-100. The two sides are scored
/// independently and need not sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsolidationScore {
    pub long_pct: f64,
    pub short_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskPlan {
    pub direction: Direction,
    pub entry: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub risk_reward: f64,
    /// ATR was unavailable and the pivot/percentage fallback was used
    pub fallback: bool,
}

/// Why a confluent setup was not turned into a signal
#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize)]
pub enum RiskRejection {
    #[error("stop distance is zero or not finite")]
    DegenerateStop,
    #[error("risk/reward {risk_reward:.2} below minimum {minimum:.2}")]
    RewardTooSmall { risk_reward: f64, minimum: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub id: Uuid,
    /// Open time of the coarse bar that produced the signal
    pub timestamp: i64,
    pub direction: Direction,
    pub entry: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub risk_reward: f64,
}

impl Signal {
    fn from_plan(timestamp: i64, plan: &RiskPlan) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            direction: plan.direction,
            entry: plan.entry,
            take_profit: plan.take_profit,
            stop_loss: plan.stop_loss,
            risk_reward: plan.risk_reward,
        }
    }
}

/// Entry at the close, TP/SL at ATR multiples.
///
/// Without a usable ATR the long target falls back to pivot R1 (short: S1)
/// when it lies beyond entry, else a fixed percentage; the stop always uses
/// the percentage fallback. A target or stop left on the wrong side of entry
/// is pushed out to the minimum distance.
pub fn plan_risk(
    direction: Direction,
    entry: f64,
    atr: Option<f64>,
    pivots: Option<&PivotLevels>,
    config: &RiskConfig,
) -> Result<RiskPlan, RiskRejection> {
    let sign = match direction {
        Direction::Long => 1.0,
        Direction::Short => -1.0,
    };
    let usable_atr = atr.filter(|a| a.is_finite() && *a > 0.0);

    let (mut take_profit, mut stop_loss, fallback) = match usable_atr {
        Some(atr) => (
            entry + sign * atr * config.tp_atr_multiplier,
            entry - sign * atr * config.sl_atr_multiplier,
            false,
        ),
        None => {
            let pivot_target = pivots
                .map(|p| match direction {
                    Direction::Long => p.r1,
                    Direction::Short => p.s1,
                })
                .filter(|target| sign * (target - entry) > 0.0);
            (
                pivot_target.unwrap_or(entry * (1.0 + sign * config.fallback_tp_pct)),
                entry * (1.0 - sign * config.fallback_sl_pct),
                true,
            )
        }
    };

    if sign * (take_profit - entry) <= 0.0 {
        take_profit = entry * (1.0 + sign * config.min_tp_distance_pct);
    }
    if sign * (entry - stop_loss) <= 0.0 {
        stop_loss = entry * (1.0 - sign * config.min_sl_distance_pct);
    }

    let risk = (entry - stop_loss).abs();
    let reward = (take_profit - entry).abs();
    if !(risk.is_finite() && risk > 0.0) {
        return Err(RiskRejection::DegenerateStop);
    }
    let risk_reward = reward / risk;
    if !risk_reward.is_finite() {
        return Err(RiskRejection::DegenerateStop);
    }
    if risk_reward < config.min_risk_reward {
        return Err(RiskRejection::RewardTooSmall {
            risk_reward,
            minimum: config.min_risk_reward,
        });
    }

    Ok(RiskPlan {
        direction,
        entry,
        take_profit,
        stop_loss,
        risk_reward,
        fallback,
    })
}

/// Full assessment of one bar with enough history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub snapshot: IndicatorSnapshot,
    pub assessment: ConfluenceAssessment,
    pub score: ConsolidationScore,
    /// Confluent direction and the resulting risk plan, if confluence held
    pub plan: Option<Result<RiskPlan, RiskRejection>>,
}

impl Verdict {
    pub fn state(&self) -> SignalState {
        match &self.plan {
            Some(Ok(plan)) => match plan.direction {
                Direction::Long => SignalState::SignalLong,
                Direction::Short => SignalState::SignalShort,
            },
            _ => SignalState::Consolidating,
        }
    }

    pub fn rejection(&self) -> Option<RiskRejection> {
        match self.plan {
            Some(Err(rejection)) => Some(rejection),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Evaluation {
    Collecting { bars: usize, required: usize },
    Ready(Box<Verdict>),
}

impl Evaluation {
    pub fn state(&self) -> SignalState {
        match self {
            Evaluation::Collecting { .. } => SignalState::Collecting,
            Evaluation::Ready(verdict) => verdict.state(),
        }
    }
}

/// External levels available at evaluation time
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketContext<'a> {
    pub pivots: Option<&'a PivotLevels>,
    pub liquidity: Option<&'a LiquidityAnalysis>,
}

/// State carried between finalized bars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTracker {
    pub state: SignalState,
    /// Open time of the last bar a signal was emitted for
    pub last_signal_bar: Option<i64>,
}

impl Default for SignalTracker {
    fn default() -> Self {
        Self {
            state: SignalState::Collecting,
            last_signal_bar: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalEngine {
    indicators: IndicatorConfig,
    fibonacci: FibonacciConfig,
    risk: RiskConfig,
    assessor: ConfluenceAssessor,
    min_bars: usize,
}

impl SignalEngine {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            indicators: config.indicators.clone(),
            fibonacci: config.fibonacci.clone(),
            risk: config.risk.clone(),
            assessor: ConfluenceAssessor::new(config.confluence.clone()),
            min_bars: config.min_bars,
        }
    }

    /// Assess the last bar of `bars` (oldest first)
    pub fn evaluate(&self, bars: &[Bar], context: MarketContext<'_>) -> Evaluation {
        let (Some(bar), true) = (bars.last(), bars.len() >= self.min_bars) else {
            return Evaluation::Collecting {
                bars: bars.len(),
                required: self.min_bars,
            };
        };
        let Some(snapshot) = IndicatorSnapshot::compute(bars, &self.indicators) else {
            return Evaluation::Collecting {
                bars: bars.len(),
                required: self.min_bars,
            };
        };

        let fib = fibonacci::analyze(bars, self.fibonacci.lookback, self.fibonacci.swing_order);
        let prev_close = bars.len().checked_sub(2).map(|i| bars[i].close);
        let assessment = self.assessor.assess(&AssessmentInputs {
            snapshot: &snapshot,
            bar,
            prev_close,
            pivots: context.pivots,
            fibonacci: fib.as_ref(),
            liquidity: context.liquidity,
        });

        let weights = &self.assessor.config().weights;
        let score = ConsolidationScore {
            long_pct: assessment.readiness_pct(Direction::Long, weights),
            short_pct: assessment.readiness_pct(Direction::Short, weights),
        };
        let plan = assessment
            .confluence(self.assessor.config().min_supporting)
            .map(|direction| plan_risk(direction, bar.close, snapshot.atr, context.pivots, &self.risk));

        Evaluation::Ready(Box::new(Verdict {
            snapshot,
            assessment,
            score,
            plan,
        }))
    }

    /// Advance the state machine for a finalized bar.
    ///
    /// Returns a new signal only when `emit` is set, the evaluation carries an
    /// accepted plan, and no signal was already produced for `bar_time`.
    pub fn commit(
        &self,
        tracker: &mut SignalTracker,
        evaluation: &Evaluation,
        bar_time: i64,
        emit: bool,
    ) -> Option<Signal> {
        let Evaluation::Ready(verdict) = evaluation else {
            tracker.state = SignalState::Collecting;
            return None;
        };
        tracker.state = SignalState::Evaluating;
        debug!("STATE: {} bar {}", tracker.state, bar_time);
        tracker.state = verdict.state();

        match &verdict.plan {
            Some(Ok(plan)) if emit && tracker.last_signal_bar != Some(bar_time) => {
                tracker.last_signal_bar = Some(bar_time);
                info!(
                    "SIGNAL {} @ {:.2} | TP {:.2} | SL {:.2} | R:R {:.2}",
                    plan.direction, plan.entry, plan.take_profit, plan.stop_loss, plan.risk_reward
                );
                Some(Signal::from_plan(bar_time, plan))
            }
            Some(Err(rejection)) if emit => {
                warn!("Confluence at bar {} rejected: {}", bar_time, rejection);
                None
            }
            _ => None,
        }
    }
}
