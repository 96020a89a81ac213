use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use confluence_engine::{
    Bar, EngineEvent, OrderBookSnapshot, StrategyConfig, StrategyOrchestrator, Timeframe,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON strategy configuration (missing fields use defaults)
    #[arg(short, long, env = "CONFLUENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Interval of the incoming fine bars (e.g. 1m)
    #[arg(long, env = "CONFLUENCE_BASE_INTERVAL")]
    base_interval: Option<Timeframe>,

    /// Decision timeframe (e.g. 1h)
    #[arg(short, long, env = "CONFLUENCE_TIMEFRAME")]
    timeframe: Option<Timeframe>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay fine bars from CSV (optionally .zst) and depth snapshots from JSON lines
    Replay {
        /// CSV with open_time,open,high,low,close,volume
        bars: PathBuf,

        /// JSON lines of {event_time, bids, asks}
        #[arg(short, long)]
        depth: Option<PathBuf>,

        /// Leading fine bars fed in backfill mode
        #[arg(short, long, default_value = "0")]
        backfill: usize,
    },
    /// Run the engine over a random-walk feed
    Simulate {
        /// Fine bars to generate
        #[arg(short, long, default_value = "3000")]
        bars: usize,

        #[arg(long, default_value = "100.0")]
        start_price: f64,

        /// Per-bar log-return standard deviation
        #[arg(long, default_value = "0.002")]
        volatility: f64,

        /// Emit a depth snapshot every N bars
        #[arg(long, default_value = "5")]
        depth_every: usize,

        #[arg(long)]
        seed: Option<u64>,

        /// Leading fine bars fed in backfill mode
        #[arg(long, default_value = "0")]
        backfill: usize,
    },
}

const CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the event stream
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("confluence_engine=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(base) = args.base_interval {
        config.base_interval = base;
    }
    if let Some(tf) = args.timeframe {
        config.strategy_timeframe = tf;
    }
    let base_interval = config.base_interval;
    let engine = StrategyOrchestrator::new(config).context("Invalid strategy configuration")?;

    let (bar_tx, bar_rx) = mpsc::channel::<Bar>(CHANNEL_CAPACITY);
    let (depth_tx, depth_rx) = mpsc::channel::<OrderBookSnapshot>(CHANNEL_CAPACITY);

    let backfill = match args.command {
        Command::Replay {
            bars,
            depth,
            backfill,
        } => {
            info!("Replaying bars from {:?}", bars);
            let bar_reader = tokio::task::spawn_blocking(move || read_bars(&bars, bar_tx));
            let depth_reader = tokio::task::spawn_blocking(move || match depth {
                Some(path) => read_depth(&path, depth_tx),
                None => Ok(()),
            });
            tokio::spawn(async move {
                for (name, handle) in [("bar", bar_reader), ("depth", depth_reader)] {
                    match handle.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("{} reader failed: {:#}", name, e),
                        Err(e) => warn!("{} reader panicked: {}", name, e),
                    }
                }
            });
            backfill
        }
        Command::Simulate {
            bars,
            start_price,
            volatility,
            depth_every,
            seed,
            backfill,
        } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let returns = Normal::new(0.0, volatility).context("Invalid volatility")?;
            info!("Simulating {} bars from {:.2}", bars, start_price);
            tokio::spawn(async move {
                let step = base_interval.as_millis();
                let now = Utc::now().timestamp_millis();
                let start = base_interval.period_start(now) - bars as i64 * step;
                let mut price = start_price;
                for i in 0..bars {
                    let bar = random_bar(&mut rng, &returns, start + i as i64 * step, price);
                    price = bar.close;
                    if bar_tx.send(bar).await.is_err() {
                        break;
                    }
                    if depth_every > 0 && i % depth_every == 0 {
                        let snapshot = random_book(&mut rng, bar.open_time + step - 1, bar.close);
                        if depth_tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                }
            });
            backfill
        }
    };

    run_engine(engine, bar_rx, depth_rx, backfill).await
}

fn load_config(path: Option<&Path>) -> Result<StrategyConfig> {
    let Some(path) = path else {
        return Ok(StrategyConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse config: {:?}", path))
}

/// Single consumer: merges both feeds by timestamp and is the only caller of the engine
async fn run_engine(
    mut engine: StrategyOrchestrator,
    mut bar_rx: mpsc::Receiver<Bar>,
    mut depth_rx: mpsc::Receiver<OrderBookSnapshot>,
    backfill: usize,
) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let mut next_bar = bar_rx.recv().await;
    let mut next_depth = depth_rx.recv().await;
    let mut bars_seen = 0usize;
    let mut counts = (0usize, 0usize);

    if backfill > 0 {
        engine.begin_backfill();
    }

    loop {
        let take_bar = match (&next_bar, &next_depth) {
            (Some(bar), Some(depth)) => bar.open_time <= depth.event_time,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        let events = if take_bar {
            let Some(bar) = next_bar.take() else { break };
            next_bar = bar_rx.recv().await;
            bars_seen += 1;
            let mut events = engine.on_fine_bar(bar);
            if engine.is_backfilling() && bars_seen >= backfill {
                events.extend(engine.end_backfill());
            }
            events
        } else {
            let Some(depth) = next_depth.take() else { break };
            next_depth = depth_rx.recv().await;
            engine.on_order_book(depth)
        };

        for event in &events {
            match event {
                EngineEvent::Signal(_) => counts.0 += 1,
                EngineEvent::Consolidation { provisional: false, .. } => counts.1 += 1,
                _ => {}
            }
            writeln!(out, "{}", serde_json::to_string(event)?)?;
        }
    }

    // Feed ended before the backfill count was reached
    for event in engine.end_backfill() {
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
    }
    out.flush()?;

    info!(
        "Feed finished: {} fine bars, {} signals, {} consolidation updates, final state {}",
        bars_seen,
        counts.0,
        counts.1,
        engine.signal_state()
    );
    Ok(())
}

fn open_maybe_zstd(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    if path.extension().is_some_and(|ext| ext == "zst") {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        Ok(Box::new(decoder))
    } else {
        Ok(Box::new(file))
    }
}

fn read_bars(path: &Path, tx: mpsc::Sender<Bar>) -> Result<()> {
    let mut csv_reader = csv::Reader::from_reader(BufReader::new(open_maybe_zstd(path)?));
    for result in csv_reader.deserialize() {
        let bar: Bar = result.with_context(|| "Failed to parse CSV row")?;
        if tx.blocking_send(bar).is_err() {
            break;
        }
    }
    Ok(())
}

fn read_depth(path: &Path, tx: mpsc::Sender<OrderBookSnapshot>) -> Result<()> {
    let reader = BufReader::new(open_maybe_zstd(path)?);
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let snapshot: OrderBookSnapshot = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse depth snapshot on line {}", line_no + 1))?;
        if tx.blocking_send(snapshot).is_err() {
            break;
        }
    }
    Ok(())
}

fn random_bar(rng: &mut StdRng, returns: &Normal<f64>, open_time: i64, open: f64) -> Bar {
    let close = open * returns.sample(rng).exp();
    let wick = returns.sample(rng).abs();
    let high = open.max(close) * (1.0 + wick / 2.0);
    let low = open.min(close) * (1.0 - wick / 2.0);
    Bar::new(open_time, open, high, low, close, rng.gen_range(1.0..100.0))
}

fn random_book(rng: &mut StdRng, event_time: i64, mid: f64) -> OrderBookSnapshot {
    let tick = mid * 0.0005;
    let bids: Vec<(f64, f64)> = (1..=10)
        .map(|i| (mid - tick * i as f64, rng.gen_range(1.0..30.0)))
        .collect();
    let asks: Vec<(f64, f64)> = (1..=10)
        .map(|i| (mid + tick * i as f64, rng.gen_range(1.0..30.0)))
        .collect();
    OrderBookSnapshot::new(event_time, &bids, &asks)
}
