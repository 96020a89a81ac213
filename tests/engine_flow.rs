use std::collections::HashSet;

use confluence_engine::{
    Bar, Direction, EngineEvent, OrderBookSnapshot, SignalState, StrategyConfig, StrategyOrchestrator, Timeframe,
};

const MINUTE: i64 = 60_000;
const HOUR: i64 = 3_600_000;
// 2024-03-04 00:00:00 UTC
const T0: i64 = 1_709_510_400_000;

fn config() -> StrategyConfig {
    StrategyConfig {
        base_interval: Timeframe::minutes(15),
        strategy_timeframe: Timeframe::hours(1),
        ..Default::default()
    }
}

/// 15m bars: slow uptrend with a few pullbacks
fn feed(count: usize) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let t = i as f64;
            let mid = 100.0 + t * 0.08 + (t / 7.0).sin() * 3.0;
            let open = mid - 0.15;
            let close = mid + 0.15 * (t / 3.0).cos();
            Bar::new(
                T0 + i as i64 * 15 * MINUTE,
                open,
                open.max(close) + 0.4,
                open.min(close) - 0.4,
                close,
                25.0,
            )
        })
        .collect()
}

fn rising_config() -> StrategyConfig {
    let mut config = config();
    config.confluence.min_supporting = 1;
    config
}

/// Hourly bars: a small peak (hour 4) and trough (hour 8), then a 1% climb
/// every hour. Trend, momentum and the broken swing-high fractal all line up
/// long from about hour 70 on.
fn rising_hours(hours: usize) -> Vec<Bar> {
    let mut closes = vec![100.0, 101.0, 102.0, 103.0, 104.0, 103.0, 102.0, 101.0, 100.0, 101.0];
    while closes.len() < hours {
        let last = closes[closes.len() - 1];
        closes.push(last * 1.01);
    }
    let mut open = 99.5;
    let mut bars = Vec::with_capacity(hours);
    for (i, &close) in closes.iter().take(hours).enumerate() {
        let mut high = f64::max(open, close) + 0.3;
        let mut low = f64::min(open, close) - 0.3;
        if i == 4 {
            high += 0.5;
        }
        if i == 8 {
            low -= 0.5;
        }
        bars.push(Bar::new(T0 + i as i64 * HOUR, open, high, low, close, 40.0));
        open = close;
    }
    bars
}

/// Four 15m bars per hour that aggregate back to exactly `hours`
fn split_hours(hours: &[Bar]) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(hours.len() * 4);
    for hour in hours {
        let step = (hour.close - hour.open) / 4.0;
        for j in 0..4i64 {
            let open = hour.open + step * j as f64;
            let close = if j == 3 { hour.close } else { open + step };
            bars.push(Bar::new(
                hour.open_time + j * 15 * MINUTE,
                open,
                hour.high,
                hour.low,
                close,
                hour.volume / 4.0,
            ));
        }
    }
    bars
}

fn is_decision(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::Signal(_) | EngineEvent::Consolidation { .. })
}

#[test]
fn test_backfill_emits_nothing_then_flushes_once() {
    let mut engine = StrategyOrchestrator::new(config()).unwrap();
    engine.begin_backfill();

    let mut during = Vec::new();
    for bar in feed(4 * 60) {
        during.extend(engine.on_fine_bar(bar));
    }
    during.extend(engine.on_order_book(OrderBookSnapshot::new(
        T0 + 60 * HOUR,
        &[(120.0, 40.0)],
        &[(121.0, 40.0)],
    )));
    assert!(during.iter().all(|e| !is_decision(e)));
    assert!(during.is_empty());

    let flush = engine.end_backfill();
    assert_eq!(flush.iter().filter(|e| is_decision(e)).count(), 1);
    assert!(flush.iter().any(|e| e.is_status()));
    // State kept advancing while suppressed
    assert_eq!(engine.state().series.len(), 59);
}

#[test]
fn test_confluent_flush_emits_one_priced_signal() {
    let hours = rising_hours(91);
    let fine = split_hours(&hours);
    // Hours 0..=85 in backfill, so hour 84 is the last finalized bar
    let (history, live) = fine.split_at(86 * 4);

    let mut engine = StrategyOrchestrator::new(rising_config()).unwrap();
    let flush = engine.backfill(history.iter().copied());

    let signals: Vec<_> = flush
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Signal(signal) => Some(signal),
            _ => None,
        })
        .collect();
    assert_eq!(signals.len(), 1);
    let signal = signals[0];
    let last = hours[84];
    let atr = flush
        .iter()
        .find_map(|e| match e {
            EngineEvent::IndicatorUpdate { snapshot, .. } => snapshot.atr,
            _ => None,
        })
        .unwrap();
    let risk = &engine.config().risk;
    assert_eq!(signal.timestamp, last.open_time);
    assert_eq!(signal.direction, Direction::Long);
    assert_eq!(signal.entry, last.close);
    assert!((signal.take_profit - (last.close + atr * risk.tp_atr_multiplier)).abs() < 1e-9);
    assert!((signal.stop_loss - (last.close - atr * risk.sl_atr_multiplier)).abs() < 1e-9);
    assert!((signal.risk_reward - 4.0 / 3.0).abs() < 1e-9);
    assert_eq!(engine.signal_state(), SignalState::SignalLong);

    // Live: each new hour closes the previous one with its own signal
    let mut live_signals = Vec::new();
    for bar in live {
        for event in engine.on_fine_bar(*bar) {
            if let EngineEvent::Signal(signal) = event {
                live_signals.push(signal.timestamp);
            }
        }
    }
    let expected: Vec<i64> = (85..90).map(|h| T0 + h * HOUR).collect();
    assert_eq!(live_signals, expected);
}

#[test]
fn test_low_risk_reward_downgrades_to_consolidation() {
    let mut config = rising_config();
    // ATR plan is 2.0 / 1.5 = 1.33
    config.risk.min_risk_reward = 1.5;
    let mut engine = StrategyOrchestrator::new(config).unwrap();
    let flush = engine.backfill(split_hours(&rising_hours(86)));

    assert!(!flush.iter().any(|e| e.is_signal()));
    assert_eq!(
        flush
            .iter()
            .filter(|e| matches!(
                e,
                EngineEvent::Consolidation {
                    provisional: false,
                    state: SignalState::Consolidating,
                    ..
                }
            ))
            .count(),
        1
    );
    assert!(flush.iter().any(|e| matches!(
        e,
        EngineEvent::Status { message, .. } if message.starts_with("confluence rejected by risk gate")
    )));
    assert_eq!(engine.signal_state(), SignalState::Consolidating);
}

#[test]
fn test_live_feed_respects_pipeline_rules() {
    let mut engine = StrategyOrchestrator::new(config()).unwrap();
    let bars = feed(4 * 200);
    let (warmup, live) = bars.split_at(4 * 45);
    engine.backfill(warmup.iter().copied());

    let mut signal_bars = HashSet::new();
    for bar in live {
        let events = engine.on_fine_bar(*bar);
        let finalizes = bar.open_time % HOUR == 0;

        for event in &events {
            match event {
                EngineEvent::Signal(signal) => {
                    assert!(finalizes, "signal emitted from a preview");
                    assert!(signal_bars.insert(signal.timestamp), "two signals for one bar");
                    assert!(signal.risk_reward >= engine.config().risk.min_risk_reward);
                }
                EngineEvent::IndicatorUpdate { provisional, .. }
                | EngineEvent::Consolidation { provisional, .. } => {
                    assert_eq!(*provisional, !finalizes);
                }
                _ => {}
            }
        }
        if finalizes {
            // One decision per finalized coarse bar
            assert_eq!(events.iter().filter(|e| is_decision(e)).count(), 1);
        }
    }

    assert!(engine.state().series.len() <= engine.config().retention_cap);
    assert_eq!(engine.state().series.len(), 100);
}

#[test]
fn test_out_of_order_input_is_reported_not_fatal() {
    let mut engine = StrategyOrchestrator::new(config()).unwrap();
    let bars = feed(8);
    for bar in &bars {
        engine.on_fine_bar(*bar);
    }
    let before = engine.state().aggregator.provisional();

    let events = engine.on_fine_bar(bars[3]);
    assert_eq!(events.len(), 1);
    assert!(events[0].is_status());
    assert_eq!(engine.state().aggregator.provisional(), before);

    // The feed continues normally afterwards
    let next = Bar::new(T0 + 2 * HOUR, 101.0, 101.5, 100.5, 101.2, 5.0);
    let events = engine.on_fine_bar(next);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Status { message, .. } if message == "collecting 2/40 bars"
    )));
    assert_eq!(engine.state().series.len(), 2);
}

#[test]
fn test_events_serialize_with_type_tag() {
    let mut engine = StrategyOrchestrator::new(config()).unwrap();
    let events = engine.on_order_book(OrderBookSnapshot::new(T0, &[(100.0, 5.0), (99.0, 50.0)], &[(101.0, 40.0)]));
    let json = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(json["type"], "Liquidity");
    assert_eq!(json["analysis"]["significant_bids"][0]["price"], 99.0);
}
