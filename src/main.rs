//! Order Linker - Main Entry Point
//!
//! Places a batch of order intents and holds linked sells until their buys fill.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use order_linker::broker::{
    FillEvent, KiteClient, KiteOrderStream, OrderBookSource, OrderIntent, OrderSide,
    OrderSubmitter, PaperBroker, PositionSource, TriggerSource,
};
use order_linker::config::Config;
use order_linker::linker::Linker;
use order_linker::placement::{flatten_intents, BatchReport, PlacementOrchestrator, PlacementStatus};
use order_linker::workers::{
    receiver_stream, unbounded_receiver_stream, FillDispatcher, OrderBookPoller, SessionShutdown,
    TriggerWatcher,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Order Linker CLI
#[derive(Parser)]
#[command(name = "order-linker")]
#[command(version, about = "Place order batches with buy-linked sells")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Place a batch and run the linker until interrupted
    Run {
        /// Path to a JSON array of order intents
        #[arg(short, long)]
        intents: PathBuf,

        /// Stop after this many seconds (default: run until Ctrl+C)
        #[arg(short, long)]
        session_secs: Option<u64>,

        /// Paper market step interval in milliseconds
        #[arg(short, long, default_value = "500")]
        tick_ms: u64,
    },

    /// Parse and validate a batch, then print the placement plan
    Check {
        /// Path to a JSON array of order intents
        #[arg(short, long)]
        intents: PathBuf,
    },

    /// Close open NRML positions at market
    Flatten {
        /// Only these trading symbols (comma separated; default: all)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,
    },
}

/// Trading mode: Live (real broker) or Paper (simulated fills).
#[derive(Debug, Clone, Copy, PartialEq)]
enum TradingMode {
    Live,
    Paper,
}

/// Broker surfaces used by one session.
struct Session {
    submitter: Arc<dyn OrderSubmitter>,
    triggers: Arc<dyn TriggerSource>,
    order_book: Arc<dyn OrderBookSource>,
    fills: BoxStream<'static, FillEvent>,
    paper: Option<Arc<PaperBroker>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    match cli.command {
        Commands::Run {
            intents,
            session_secs,
            tick_ms,
        } => run(&intents, session_secs, tick_ms).await,
        Commands::Check { intents } => check(&intents),
        Commands::Flatten { symbols } => flatten(&symbols).await,
    }
}

fn load_intents(path: &Path) -> Result<Vec<OrderIntent>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read intents file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid order intents in {}", path.display()))
}

fn check(path: &Path) -> Result<()> {
    let intents = load_intents(path)?;
    info!("📋 {} intents in {}", intents.len(), path.display());

    let (buys, sells): (Vec<_>, Vec<_>) = intents
        .iter()
        .partition(|i| i.side() == OrderSide::Buy);

    for intent in buys.iter().chain(sells.iter()) {
        let route = match (intent.kind().link_key(), intent.kind().is_exit()) {
            (_, true) => "place now (exit)".to_string(),
            (Some(key), false) if intent.side() == OrderSide::Sell => {
                format!("queue until {} buys fill", key)
            }
            (Some(key), false) => format!("place and register under {}", key),
            (None, false) => "place now".to_string(),
        };
        info!(
            "   {} {} {}:{} ({:?}) -> {}",
            intent.side(),
            intent.quantity(),
            intent.exchange(),
            intent.symbol(),
            intent.class(),
            route
        );
    }
    Ok(())
}

async fn run(path: &Path, session_secs: Option<u64>, tick_ms: u64) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║              Order Linker v{}                           ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let intents = load_intents(path)?;

    let session = match trading_mode(&config) {
        TradingMode::Live => live_session(&config).await?,
        TradingMode::Paper => paper_session(),
    };

    // Fresh linker per session
    let (linker, releases) = Linker::with_release_channel();
    let linker = Arc::new(linker);
    let shutdown = SessionShutdown::new();

    let orchestrator = Arc::new(PlacementOrchestrator::new(
        session.submitter,
        Arc::clone(&linker),
        config.execution.clone(),
    ));
    let dispatcher = FillDispatcher::new(Arc::clone(&linker));

    let watcher_handle = tokio::spawn(
        TriggerWatcher::new(session.triggers, Arc::clone(&linker), &config.watcher)
            .run(shutdown.feeders()),
    );
    let dispatcher_handle = tokio::spawn(dispatcher.clone().run(session.fills, shutdown.feeders()));
    let poller_handle = config.watcher.order_poll_enabled.then(|| {
        tokio::spawn(
            OrderBookPoller::new(session.order_book, dispatcher.clone(), &config.watcher)
                .run(shutdown.feeders()),
        )
    });
    let release_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = shutdown.releases();
        tokio::spawn(async move { orchestrator.run_release_loop(releases, shutdown).await })
    };
    let simulator_handle = session.paper.map(|paper| {
        let mut shutdown = shutdown.feeders();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {
                        paper.simulate_step().await;
                    }
                }
            }
        })
    });

    let report = match orchestrator.execute_batch(&intents).await {
        Ok(report) => report,
        Err(e) => {
            shutdown.abort();
            return Err(e).context("Batch placement failed");
        }
    };
    log_report(&report);

    if !config.execution.dry_run {
        info!("🛑 Press Ctrl+C to stop");
        match session_secs {
            Some(secs) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Session time elapsed"),
                }
            }
            None => {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
            }
        }
    }

    // Feeders first: an in-flight poll may still credit a fill and release a sell.
    let feeders = shutdown
        .stop(async {
            let watcher = watcher_handle.await.context("Trigger watcher panicked")?;
            let dispatcher = dispatcher_handle.await.context("Fill dispatcher panicked")?;
            let poller = match poller_handle {
                Some(handle) => Some(handle.await.context("Order-book poller panicked")?),
                None => None,
            };
            if let Some(handle) = simulator_handle {
                handle.await.ok();
            }
            Ok::<_, anyhow::Error>((watcher, dispatcher, poller))
        })
        .await;
    let released = release_handle.await.context("Release loop panicked")?;
    let (watcher_stats, dispatcher_stats, poller_stats) = feeders?;

    if let Some(stats) = poller_stats {
        info!(
            "📚 Order book: {} scans, {} credited, {} duplicates",
            stats.scans, stats.fills.credited, stats.fills.duplicates
        );
    }

    info!(
        "🔗 Triggers: {} polls, {} bound, {} failed polls",
        watcher_stats.polls, watcher_stats.bound, watcher_stats.poll_failures
    );
    info!(
        "📥 Fills: {} received, {} credited, {} duplicates, {} untracked",
        dispatcher_stats.received,
        dispatcher_stats.credited,
        dispatcher_stats.duplicates,
        dispatcher_stats.unresolved
    );
    info!("📤 Released sells placed: {}", released);

    let pending = linker.pending_sell_count();
    if pending > 0 {
        warn!("{} linked sells still waiting for buy fills", pending);
    }
    for sell in linker.undelivered_releases() {
        warn!(
            "Released sell never placed: {} {} on {}",
            sell.intent.quantity(),
            sell.intent.symbol(),
            sell.link_key
        );
    }
    for anomaly in linker.anomalies() {
        warn!(
            "Over-credit on {}: credited {} of {} registered",
            anomaly.link_key, anomaly.credited, anomaly.registered
        );
    }

    let snapshot =
        serde_json::to_string_pretty(&linker.snapshot()).context("Failed to serialize snapshot")?;
    println!("{}", snapshot);

    info!("👋 Order Linker shutdown complete");
    Ok(())
}

/// Fetch open positions and place market orders that close them.
async fn flatten(symbols: &[String]) -> Result<()> {
    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let (submitter, positions): (Arc<dyn OrderSubmitter>, Arc<dyn PositionSource>) =
        match trading_mode(&config) {
            TradingMode::Live => {
                let client = Arc::new(KiteClient::new(&config.broker)?);
                (client.clone(), client)
            }
            TradingMode::Paper => {
                let (broker, _updates) = PaperBroker::new();
                let broker = Arc::new(broker);
                (broker.clone(), broker)
            }
        };

    let intents = flatten_intents(positions.as_ref(), symbols).await?;
    if intents.is_empty() {
        info!("✅ No open NRML positions to close");
        return Ok(());
    }

    // Exit orders bypass the linker.
    let orchestrator =
        PlacementOrchestrator::new(submitter, Arc::new(Linker::new()), config.execution.clone());
    let report = orchestrator
        .execute_batch(&intents)
        .await
        .context("Flatten placement failed")?;
    log_report(&report);
    Ok(())
}

/// Pick live or paper trading from `LIVE_TRADING` and the broker credentials.
fn trading_mode(config: &Config) -> TradingMode {
    if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
        if config.broker.has_credentials() {
            warn!("⚠️  LIVE TRADING MODE - Orders go to the broker!");
            TradingMode::Live
        } else {
            warn!("LIVE_TRADING set without broker credentials; falling back to paper");
            TradingMode::Paper
        }
    } else {
        info!("📝 PAPER TRADING MODE - Simulated fills");
        TradingMode::Paper
    }
}

fn log_report(report: &BatchReport) {
    info!(
        "📤 Batch: {} registered, {} placed, {} queued, {} released, {} dry-run",
        report.count(PlacementStatus::Registered),
        report.count(PlacementStatus::Placed),
        report.count(PlacementStatus::Queued),
        report.count(PlacementStatus::Released),
        report.count(PlacementStatus::DryRun)
    );
}

async fn live_session(config: &Config) -> Result<Session> {
    let client = Arc::new(KiteClient::new(&config.broker)?);
    let stream = KiteOrderStream::new(&config.broker, &config.dispatcher);
    let updates = stream.connect().await?;

    Ok(Session {
        submitter: client.clone(),
        triggers: client.clone(),
        order_book: client,
        fills: receiver_stream(updates).boxed(),
        paper: None,
    })
}

fn paper_session() -> Session {
    let (broker, updates) = PaperBroker::new();
    let broker = Arc::new(broker);

    Session {
        submitter: broker.clone(),
        triggers: broker.clone(),
        order_book: broker.clone(),
        fills: unbounded_receiver_stream(updates).boxed(),
        paper: Some(broker),
    }
}

/// Initialize logging with file output for detailed analysis.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "order-linker.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("order_linker=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Broker API: {}", config.broker.api_url);
    info!("   Trigger Poll: {}ms", config.watcher.poll_interval_ms);
    info!(
        "   Order-Book Poll: {}",
        if config.watcher.order_poll_enabled {
            format!("{}ms", config.watcher.order_poll_interval_ms)
        } else {
            "disabled".to_string()
        }
    );
    info!("   Submit Timeout: {}s", config.execution.submit_timeout_secs);
    info!("   Place Pause: {}ms", config.execution.place_pause_ms);
    info!("   Dry Run: {}", config.execution.dry_run);
}
