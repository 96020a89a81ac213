//! Order-book liquidity analysis
//!
//! Resting size at or above a quantity threshold marks a level where price
//! is likely to stall: large bids act as support, large asks as resistance.

use serde::Serialize;

use crate::types::{BookLevel, OrderBookSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidityAnalysis {
    pub event_time: i64,
    /// Bids with qty >= threshold, in book order (best first)
    pub significant_bids: Vec<BookLevel>,
    /// Asks with qty >= threshold, in book order (best first)
    pub significant_asks: Vec<BookLevel>,
}

impl LiquidityAnalysis {
    pub fn is_empty(&self) -> bool {
        self.significant_bids.is_empty() && self.significant_asks.is_empty()
    }
}

/// Filter both sides of the book to levels with at least `qty_threshold`
/// resting, keeping at most `max_levels` per side.
pub fn analyze(snapshot: &OrderBookSnapshot, qty_threshold: f64, max_levels: usize) -> LiquidityAnalysis {
    let significant = |side: &[BookLevel]| -> Vec<BookLevel> {
        side.iter()
            .filter(|level| level.qty >= qty_threshold)
            .take(max_levels)
            .copied()
            .collect()
    };

    LiquidityAnalysis {
        event_time: snapshot.event_time,
        significant_bids: significant(&snapshot.bids),
        significant_asks: significant(&snapshot.asks),
    }
}
