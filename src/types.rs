use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::trading_core::confluence::ConfluenceAssessment;
use crate::trading_core::indicators::IndicatorSnapshot;
use crate::trading_core::liquidity::LiquidityAnalysis;
use crate::trading_core::signal::{ConsolidationScore, Signal, SignalState};

/// OHLCV bar. `open_time` is epoch milliseconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.open_time)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// True when the bar closed above its open
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// One price level of the order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

impl From<(f64, f64)> for BookLevel {
    fn from((price, qty): (f64, f64)) -> Self {
        Self { price, qty }
    }
}

/// Full depth snapshot. Bids descending, asks ascending. Replaces the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub event_time: i64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    pub fn new(event_time: i64, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Self {
        Self {
            event_time,
            bids: bids.iter().copied().map(BookLevel::from).collect(),
            asks: asks.iter().copied().map(BookLevel::from).collect(),
        }
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
}

/// Events produced by the engine for the presentation layer.
///
/// `timestamp` is the open time of the bar (or snapshot event time) the
/// event describes, in epoch milliseconds.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    IndicatorUpdate {
        timestamp: i64,
        provisional: bool,
        snapshot: IndicatorSnapshot,
        assessment: ConfluenceAssessment,
    },
    Signal(Signal),
    Consolidation {
        timestamp: i64,
        provisional: bool,
        state: SignalState,
        score: ConsolidationScore,
    },
    Liquidity {
        timestamp: i64,
        analysis: LiquidityAnalysis,
    },
    Status {
        timestamp: i64,
        level: StatusLevel,
        message: String,
    },
}

impl EngineEvent {
    pub fn info(timestamp: i64, message: impl Into<String>) -> Self {
        EngineEvent::Status {
            timestamp,
            level: StatusLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(timestamp: i64, message: impl Into<String>) -> Self {
        EngineEvent::Status {
            timestamp,
            level: StatusLevel::Warning,
            message: message.into(),
        }
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, EngineEvent::Signal(_))
    }

    pub fn is_status(&self) -> bool {
        matches!(self, EngineEvent::Status { .. })
    }
}
