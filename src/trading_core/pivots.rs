//! Daily Pivot Levels
//!
//! Classic floor pivots from the prior session's high, low and close:
//! - P  = (H + L + C) / 3
//! - R1 = 2P - L, S1 = 2P - H
//! - R2 = P + (H - L), S2 = P - (H - L)
//! - R3 = H + 2(P - L), S3 = L - 2(H - P)
//!
//! The session day is evaluated in a configurable timezone and levels are
//! recomputed on every calendar-day rollover.

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::info;

use crate::types::Bar;

/// Name of a single pivot level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PivotLevel {
    P,
    R1,
    R2,
    R3,
    S1,
    S2,
    S3,
}

impl std::fmt::Display for PivotLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PivotLevel::P => "P",
            PivotLevel::R1 => "R1",
            PivotLevel::R2 => "R2",
            PivotLevel::R3 => "R3",
            PivotLevel::S1 => "S1",
            PivotLevel::S2 => "S2",
            PivotLevel::S3 => "S3",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PivotLevels {
    /// Session day the levels were derived from
    pub session: NaiveDate,
    pub pivot: f64,
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

impl PivotLevels {
    pub fn from_ohlc(session: NaiveDate, high: f64, low: f64, close: f64) -> Self {
        let pivot = (high + low + close) / 3.0;
        let range = high - low;
        Self {
            session,
            pivot,
            r1: 2.0 * pivot - low,
            r2: pivot + range,
            r3: high + 2.0 * (pivot - low),
            s1: 2.0 * pivot - high,
            s2: pivot - range,
            s3: low - 2.0 * (high - pivot),
        }
    }

    /// Every level with its name, lowest first
    pub fn levels(&self) -> [(PivotLevel, f64); 7] {
        [
            (PivotLevel::S3, self.s3),
            (PivotLevel::S2, self.s2),
            (PivotLevel::S1, self.s1),
            (PivotLevel::P, self.pivot),
            (PivotLevel::R1, self.r1),
            (PivotLevel::R2, self.r2),
            (PivotLevel::R3, self.r3),
        ]
    }
}

/// Running high/low/close of the session in progress
#[derive(Debug, Clone, Copy)]
struct SessionRange {
    day: NaiveDate,
    high: f64,
    low: f64,
    close: f64,
}

/// Tracks the session day from fine bars and holds the prior day's levels
#[derive(Debug, Clone)]
pub struct PivotCalculator {
    tz: Tz,
    session: Option<SessionRange>,
    levels: Option<PivotLevels>,
}

impl PivotCalculator {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            session: None,
            levels: None,
        }
    }

    /// Levels from the last completed session, if one has completed
    pub fn levels(&self) -> Option<&PivotLevels> {
        self.levels.as_ref()
    }

    /// Fold a bar into the running session. Returns true when the bar opened
    /// a new session day and the levels were recomputed.
    pub fn update(&mut self, bar: &Bar) -> bool {
        let day = bar.timestamp().with_timezone(&self.tz).date_naive();

        match &mut self.session {
            Some(session) if day <= session.day => {
                session.high = session.high.max(bar.high);
                session.low = session.low.min(bar.low);
                session.close = bar.close;
                false
            }
            Some(session) => {
                let completed = *session;
                let levels =
                    PivotLevels::from_ohlc(completed.day, completed.high, completed.low, completed.close);
                info!(
                    "Pivot levels for {}: P={:.2} R1={:.2} S1={:.2}",
                    completed.day, levels.pivot, levels.r1, levels.s1
                );
                self.levels = Some(levels);
                self.session = Some(SessionRange::open(day, bar));
                true
            }
            None => {
                self.session = Some(SessionRange::open(day, bar));
                false
            }
        }
    }
}

impl SessionRange {
    fn open(day: NaiveDate, bar: &Bar) -> Self {
        Self {
            day,
            high: bar.high,
            low: bar.low,
            close: bar.close,
        }
    }
}
