//! Fine-to-coarse bar aggregation
//!
//! Coarse periods are calendar aligned (`open_time - open_time % period`),
//! so a 1h timeframe always rolls over on the hour regardless of when the
//! first fine bar arrived.

use serde::Serialize;
use tracing::debug;

use crate::config::Timeframe;
use crate::error::{EngineError, EngineResult};
use crate::types::Bar;

/// In-progress coarse bar
#[derive(Debug, Clone)]
struct BarBuilder {
    period_start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    fine_count: usize,
}

impl BarBuilder {
    fn new(period_start: i64, bar: &Bar) -> Self {
        Self {
            period_start,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            fine_count: 1,
        }
    }

    fn add_bar(&mut self, bar: &Bar) {
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.close = bar.close;
        self.volume += bar.volume;
        self.fine_count += 1;
    }

    fn to_bar(&self) -> Bar {
        Bar {
            open_time: self.period_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Result of ingesting one fine bar
#[derive(Debug, Clone, Serialize)]
pub struct AggregationUpdate {
    /// Live view of the still-open coarse bar (includes the ingested fine bar)
    pub provisional: Bar,
    /// Coarse bar closed by this fine bar, if it started a new period
    pub finalized: Option<Bar>,
}

/// Folds fine bars into calendar-aligned coarse bars
#[derive(Debug, Clone)]
pub struct BarAggregator {
    timeframe: Timeframe,
    current: Option<BarBuilder>,
    last_open_time: Option<i64>,
}

impl BarAggregator {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            current: None,
            last_open_time: None,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// The open coarse bar, if any fine bar has been ingested
    pub fn provisional(&self) -> Option<Bar> {
        self.current.as_ref().map(BarBuilder::to_bar)
    }

    /// Number of fine bars folded into the open coarse bar
    pub fn pending_fine_bars(&self) -> usize {
        self.current.as_ref().map_or(0, |b| b.fine_count)
    }

    /// Fold a fine bar in. Non-increasing timestamps are rejected and leave
    /// the buffer untouched.
    pub fn ingest(&mut self, bar: &Bar) -> EngineResult<AggregationUpdate> {
        if let Some(previous) = self.last_open_time {
            if bar.open_time <= previous {
                return Err(EngineError::OutOfOrderInput {
                    previous,
                    received: bar.open_time,
                });
            }
        }
        self.last_open_time = Some(bar.open_time);

        let period_start = self.timeframe.period_start(bar.open_time);

        let finalized = match &mut self.current {
            Some(builder) if builder.period_start == period_start => {
                builder.add_bar(bar);
                None
            }
            Some(builder) => {
                // Timestamps are strictly increasing, so a different period is always a later one
                let completed = builder.to_bar();
                debug!(
                    "Finalized coarse bar {} from {} fine bars",
                    completed.open_time, builder.fine_count
                );
                self.current = Some(BarBuilder::new(period_start, bar));
                Some(completed)
            }
            None => {
                self.current = Some(BarBuilder::new(period_start, bar));
                None
            }
        };

        let provisional = self
            .current
            .as_ref()
            .map(BarBuilder::to_bar)
            .unwrap_or(*bar);

        Ok(AggregationUpdate {
            provisional,
            finalized,
        })
    }
}
