//! Trading Core - confluence strategy engine
//!
//! This module contains the strategy components, leaf first:
//! - Fine-to-coarse bar aggregation
//! - Indicator engine (pure functions over a bar series)
//! - Pivot, Fibonacci and order-book liquidity analysis
//! - Confluence assessment into qualitative states
//! - Signal state machine with risk/reward gating
//! - Orchestration of the preview and commit pipelines

pub mod aggregator;
pub mod indicators;
pub mod pivots;
pub mod fibonacci;
pub mod liquidity;
pub mod confluence;
pub mod signal;
pub mod orchestrator;

// Re-export commonly used types
pub use aggregator::{AggregationUpdate, BarAggregator};
pub use indicators::{IndicatorSnapshot, TrendDirection};
pub use pivots::{PivotCalculator, PivotLevel, PivotLevels};
pub use fibonacci::{FibLevel, FibonacciLevels};
pub use liquidity::LiquidityAnalysis;
pub use confluence::{
    ConfluenceAssessment, ConfluenceAssessor, FractalState, LevelState, MomentumState, OscillatorState,
    TrendState, VolatilityState,
};
pub use signal::{
    ConsolidationScore, Evaluation, RiskPlan, RiskRejection, Signal, SignalEngine, SignalState, SignalTracker,
};
pub use orchestrator::{BackfillProgress, PipelineMode, StrategyEngineState, StrategyOrchestrator};
