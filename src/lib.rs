// Library crate - confluence signal engine and its shared types

pub mod types;
pub mod error;
pub mod config;
pub mod trading_core;

// Re-export commonly used types
pub use types::*;
pub use error::{EngineError, EngineResult};
pub use config::{StrategyConfig, Timeframe};
pub use trading_core::{ConsolidationScore, Signal, SignalState, StrategyOrchestrator};
