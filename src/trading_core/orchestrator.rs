//! Strategy Orchestrator
//!
//! Owns all mutable engine state and drives the two pipelines:
//! - fine bar: aggregate, then either preview the open coarse bar or commit
//!   the coarse bar that just finalized
//! - order book: replace the snapshot and re-run liquidity analysis
//!
//! Single writer: the host serializes every call. Nothing here blocks.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::aggregator::BarAggregator;
use super::liquidity::{self, LiquidityAnalysis};
use super::pivots::PivotCalculator;
use super::signal::{Evaluation, MarketContext, SignalEngine, SignalState, SignalTracker};
use crate::config::StrategyConfig;
use crate::error::EngineResult;
use crate::types::{Bar, EngineEvent, OrderBookSnapshot};

/// Whether a pipeline run may mutate history and mint signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Finalized bar: state advances, signals allowed
    Commit,
    /// Open bar: read-only, never a signal
    Preview,
}

/// Counters for the catch-up summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillProgress {
    pub fine_bars: usize,
    pub finalized: usize,
    pub rejected: usize,
}

/// Per-instance mutable state. Everything that survives between calls lives
/// here.
#[derive(Debug, Clone)]
pub struct StrategyEngineState {
    pub aggregator: BarAggregator,
    /// Finalized coarse bars, oldest first, at most `retention_cap`
    pub series: VecDeque<Bar>,
    pub retention_cap: usize,
    pub order_book: Option<OrderBookSnapshot>,
    pub liquidity: Option<LiquidityAnalysis>,
    pub pivots: PivotCalculator,
    /// Signal machine state and the at-most-once guard
    pub signal: SignalTracker,
    /// Suppresses emissions while historical bars are replayed
    pub backfill: bool,
    pub backfill_progress: BackfillProgress,
}

impl StrategyEngineState {
    fn push_finalized(&mut self, bar: Bar) {
        self.series.push_back(bar);
        while self.series.len() > self.retention_cap {
            self.series.pop_front();
        }
    }

    pub fn last_finalized(&self) -> Option<&Bar> {
        self.series.back()
    }

    fn context(&self) -> MarketContext<'_> {
        MarketContext {
            pivots: self.pivots.levels(),
            liquidity: self.liquidity.as_ref(),
        }
    }
}

pub struct StrategyOrchestrator {
    config: StrategyConfig,
    state: StrategyEngineState,
    signals: SignalEngine,
}

impl StrategyOrchestrator {
    /// Validate the configuration and build an empty engine
    pub fn new(config: StrategyConfig) -> EngineResult<Self> {
        config.validate()?;
        let tz = config.session_tz()?;
        info!(
            "Confluence engine: {} bars from {} base, retention {}, min bars {}",
            config.strategy_timeframe, config.base_interval, config.retention_cap, config.min_bars
        );

        let state = StrategyEngineState {
            aggregator: BarAggregator::new(config.strategy_timeframe),
            series: VecDeque::with_capacity(config.retention_cap + 1),
            retention_cap: config.retention_cap,
            order_book: None,
            liquidity: None,
            pivots: PivotCalculator::new(tz),
            signal: SignalTracker::default(),
            backfill: false,
            backfill_progress: BackfillProgress::default(),
        };
        let signals = SignalEngine::new(&config);
        Ok(Self {
            config,
            state,
            signals,
        })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn state(&self) -> &StrategyEngineState {
        &self.state
    }

    pub fn signal_state(&self) -> SignalState {
        self.state.signal.state
    }

    pub fn is_backfilling(&self) -> bool {
        self.state.backfill
    }

    /// Ingest one fine bar
    pub fn on_fine_bar(&mut self, bar: Bar) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let update = match self.state.aggregator.ingest(&bar) {
            Ok(update) => update,
            Err(e) => {
                warn!("{}", e);
                if self.state.backfill {
                    self.state.backfill_progress.rejected += 1;
                }
                events.push(EngineEvent::warning(bar.open_time, e.to_string()));
                return events;
            }
        };

        if self.state.pivots.update(&bar) && !self.state.backfill {
            if let Some(levels) = self.state.pivots.levels() {
                events.push(EngineEvent::info(
                    bar.open_time,
                    format!(
                        "pivot levels recalculated from {}: P {:.2}, R1 {:.2}, S1 {:.2}",
                        levels.session, levels.pivot, levels.r1, levels.s1
                    ),
                ));
            }
        }
        if self.state.backfill {
            self.state.backfill_progress.fine_bars += 1;
        }

        match update.finalized {
            Some(finalized) => {
                self.state.push_finalized(finalized);
                if self.state.backfill {
                    self.state.backfill_progress.finalized += 1;
                }
                let emit = !self.state.backfill;
                let produced = self.run_pipeline(PipelineMode::Commit, None);
                if emit {
                    events.extend(produced);
                }
            }
            None if !self.state.backfill => {
                events.extend(self.run_pipeline(PipelineMode::Preview, Some(update.provisional)));
            }
            None => {}
        }
        events
    }

    /// Replace the order book and re-run liquidity analysis
    pub fn on_order_book(&mut self, snapshot: OrderBookSnapshot) -> Vec<EngineEvent> {
        let analysis = liquidity::analyze(
            &snapshot,
            self.config.liquidity.qty_threshold,
            self.config.liquidity.max_levels,
        );
        debug!(
            "Order book {}: {} significant bids, {} significant asks",
            snapshot.event_time,
            analysis.significant_bids.len(),
            analysis.significant_asks.len()
        );
        let timestamp = snapshot.event_time;
        self.state.order_book = Some(snapshot);
        self.state.liquidity = Some(analysis.clone());

        if self.state.backfill {
            return Vec::new();
        }
        vec![EngineEvent::Liquidity { timestamp, analysis }]
    }

    pub fn begin_backfill(&mut self) {
        info!("Backfill started");
        self.state.backfill = true;
        self.state.backfill_progress = BackfillProgress::default();
    }

    /// Leave backfill mode and run one full pass over the last finalized bar
    pub fn end_backfill(&mut self) -> Vec<EngineEvent> {
        if !self.state.backfill {
            return Vec::new();
        }
        self.state.backfill = false;
        let progress = std::mem::take(&mut self.state.backfill_progress);
        info!(
            "Backfill complete: {} fine bars, {} coarse bars finalized, {} rejected",
            progress.fine_bars, progress.finalized, progress.rejected
        );

        let timestamp = self
            .state
            .last_finalized()
            .map(|b| b.open_time)
            .or_else(|| self.state.aggregator.provisional().map(|b| b.open_time))
            .unwrap_or_default();
        let mut events = vec![EngineEvent::info(
            timestamp,
            format!(
                "backfill complete: {} fine bars, {} coarse bars, {} retained",
                progress.fine_bars,
                progress.finalized,
                self.state.series.len()
            ),
        )];
        if self.state.last_finalized().is_some() {
            events.extend(self.run_pipeline(PipelineMode::Commit, None));
        }
        events
    }

    /// Feed an ordered historical sequence through backfill mode
    pub fn backfill<I>(&mut self, bars: I) -> Vec<EngineEvent>
    where
        I: IntoIterator<Item = Bar>,
    {
        self.begin_backfill();
        let mut events = Vec::new();
        for bar in bars {
            events.extend(self.on_fine_bar(bar));
        }
        events.extend(self.end_backfill());
        events
    }

    /// Shared pipeline for finalized and provisional bars. Commit evaluates the
    /// retained series as is; preview appends the open bar to a copy.
    fn run_pipeline(&mut self, mode: PipelineMode, provisional: Option<Bar>) -> Vec<EngineEvent> {
        let bars: Vec<Bar> = self.state.series.iter().copied().chain(provisional).collect();
        let Some(last) = bars.last() else {
            return Vec::new();
        };
        let bar_time = last.open_time;
        let evaluation = self.signals.evaluate(&bars, self.state.context());
        let provisional = mode == PipelineMode::Preview;

        let emit = !self.state.backfill;
        let signal = match mode {
            PipelineMode::Commit => self.signals.commit(&mut self.state.signal, &evaluation, bar_time, emit),
            PipelineMode::Preview => None,
        };

        match evaluation {
            Evaluation::Collecting { bars, required } => match mode {
                PipelineMode::Commit => vec![EngineEvent::info(
                    bar_time,
                    format!("collecting {}/{} bars", bars, required),
                )],
                PipelineMode::Preview => Vec::new(),
            },
            Evaluation::Ready(verdict) => {
                let state = verdict.state();
                let rejection = verdict.rejection();
                let verdict = *verdict;
                let mut events = vec![EngineEvent::IndicatorUpdate {
                    timestamp: bar_time,
                    provisional,
                    snapshot: verdict.snapshot,
                    assessment: verdict.assessment,
                }];
                match signal {
                    Some(signal) => events.push(EngineEvent::Signal(signal)),
                    None => {
                        events.push(EngineEvent::Consolidation {
                            timestamp: bar_time,
                            provisional,
                            state,
                            score: verdict.score,
                        });
                    }
                }
                if let (PipelineMode::Commit, Some(rejection)) = (mode, rejection) {
                    events.push(EngineEvent::info(
                        bar_time,
                        format!("confluence rejected by risk gate: {}", rejection),
                    ));
                }
                events
            }
        }
    }
}
