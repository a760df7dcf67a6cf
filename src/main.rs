//! trendwatch - trend detection and escalation for customer issue signals
//!
//! A CLI tool that counts classified issue signals per category over a
//! sliding window and escalates each category once per trend episode.
//!
//! Exit codes:
//!   0 - Success (no escalations, or no --fail-on-escalation set)
//!   1 - Runtime error (configuration, unreadable feed, report write, etc.)
//!   2 - Escalations emitted and --fail-on-escalation set

mod analysis;
mod cli;
mod clock;
mod config;
mod error;
mod escalation;
mod models;
mod pipeline;
mod report;
mod sink;
mod source;
mod watcher;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cli::{Args, OutputFormat};
use clock::{Clock, ManualClock, SystemClock};
use config::{Config, CONFIG_FILE_NAME};
use indicatif::{ProgressBar, ProgressStyle};
use models::{EscalationSummary, ReportMetadata, RunReport};
use pipeline::{RunStats, WatchLoop};
use sink::{DedupSink, FanoutSink, JsonLinesSink, LogSink};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use watcher::TrendWatcher;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("trendwatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .trendwatch.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to tune thresholds, the window and team routing.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the watcher over the feed. Returns exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let signals = args
        .signals
        .clone()
        .context("A signal feed is required (--signals FILE or -)")?;
    let source_name = source::describe(&signals);

    // Replays run on a clock that follows the feed; live runs on the wall clock.
    let replay_clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
    let clock: Arc<dyn Clock> = if args.live {
        Arc::new(SystemClock)
    } else {
        replay_clock.clone()
    };

    let watcher = Arc::new(
        TrendWatcher::from_config(&config, clock).context("Invalid watcher configuration")?,
    );
    let settings = watcher.settings().clone();

    if args.dry_run {
        return handle_dry_run(&signals, &watcher);
    }

    println!("📡 Watching signals from: {}", source_name);
    println!(
        "   Threshold: {} incidents per {} minutes",
        settings.trend_threshold,
        settings.window.num_minutes()
    );
    println!(
        "   Poll interval: {}s",
        settings.poll_interval().num_seconds()
    );
    println!(
        "   Mode: {}",
        if args.live { "Live (Ctrl-C to stop)" } else { "Replay" }
    );

    let sink = build_sink(&config)?;
    let watch_loop = WatchLoop::new(watcher.clone(), sink);

    let stats = if args.live {
        let reader = open_live(&signals).await?;
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C"),
                Err(e) => {
                    warn!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
            let _ = tx.send(true);
        });
        watch_loop.run_live(reader, rx).await?
    } else {
        let feed = source::open(&signals)?;
        let progress = (!args.quiet).then(replay_spinner);
        let stats = watch_loop.replay(&replay_clock, feed, progress.as_ref());
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        stats
    };

    let now = watcher.now();
    debug!("{} categories tracked at end of run", watcher.tracked_categories());
    let report = build_report(&source_name, &settings, &watcher, stats, now, start_time);

    let output = match config.general.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    let output_path = Path::new(&config.general.output);
    std::fs::write(output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    println!("\n📊 Run Summary:");
    println!(
        "   Signals read: {} (rejected: {}, malformed lines: {})",
        report.metadata.signals_read,
        report.metadata.signals_rejected,
        report.metadata.malformed_lines
    );
    println!("   Poll cycles: {}", report.metadata.poll_cycles);
    for line in analysis::generate_summary_text(&report.summary).lines() {
        println!("   {}", line);
    }
    if report.metadata.delivery_failures > 0 {
        println!(
            "   ⚠️  Delivery failures: {}",
            report.metadata.delivery_failures
        );
    }
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
    println!("\n✅ Run complete! Report saved to: {}", output_path.display());

    if args.fail_on_escalation && report.summary.total > 0 {
        eprintln!(
            "\n⛔ {} escalations emitted. Failing (exit code 2).",
            report.summary.total
        );
        return Ok(2);
    }

    Ok(0)
}

/// Assemble the downstream sinks from configuration.
fn build_sink(config: &Config) -> Result<FanoutSink> {
    let mut sink = FanoutSink::new().with(LogSink);

    if let Some(ref path) = config.sink.events_file {
        info!("Appending escalations to {}", path.display());
        let file_sink = JsonLinesSink::append_to(path)?;
        sink = if config.sink.dedup {
            sink.with(DedupSink::new(file_sink))
        } else {
            sink.with(file_sink)
        };
    }

    debug!("Delivering escalations to {} sinks", sink.len());
    Ok(sink)
}

/// Open the feed for the live loop.
async fn open_live(path: &Path) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if source::is_stdin(path) {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open signal feed: {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn replay_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} records replayed")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb
}

fn build_report(
    source_name: &str,
    settings: &watcher::WatcherSettings,
    watcher: &TrendWatcher,
    stats: RunStats,
    now: DateTime<Utc>,
    start_time: Instant,
) -> RunReport {
    let metadata = ReportMetadata {
        source: source_name.to_string(),
        generated_at: Utc::now(),
        trend_threshold: u32::try_from(settings.trend_threshold).unwrap_or(u32::MAX),
        time_window_minutes: u64::try_from(settings.window.num_minutes()).unwrap_or(0),
        signals_read: stats.signals_read,
        signals_rejected: stats.rejected,
        malformed_lines: stats.malformed_lines,
        poll_cycles: stats.poll_cycles,
        delivery_failures: stats.delivery_failures,
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };

    RunReport {
        metadata,
        summary: EscalationSummary::from_events(&stats.events),
        escalations: stats.events,
        final_states: watcher.snapshot(now),
    }
}

/// Handle --dry-run: check configuration and feed, report what would be watched.
fn handle_dry_run(signals: &Path, watcher: &TrendWatcher) -> Result<i32> {
    println!("\n🔍 Dry run: reading feed without running the watcher...\n");

    let settings = watcher.settings();
    println!(
        "   Threshold: {} incidents per {} minutes, {} polls per window",
        settings.trend_threshold,
        settings.window.num_minutes(),
        settings.polls_per_window
    );

    let mut records = 0usize;
    let mut malformed = 0usize;
    let mut categories = BTreeSet::new();
    let mut span: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

    for item in source::open(signals)? {
        match item {
            Ok((_, signal)) => {
                records += 1;
                span = Some(match span {
                    Some((first, last)) => (first.min(signal.timestamp), last.max(signal.timestamp)),
                    None => (signal.timestamp, signal.timestamp),
                });
                categories.insert(signal.category);
            }
            Err(e) => {
                malformed += 1;
                println!("     ⚠️  {}", e);
            }
        }
    }

    println!("   Records: {} ({} malformed)", records, malformed);
    if let Some((first, last)) = span {
        println!("   Time span: {} to {}", first, last);
    }
    if !categories.is_empty() {
        println!("   Categories ({}):", categories.len());
        for category in &categories {
            println!("     📄 {}", category);
        }
    }

    println!("\n✅ Dry run complete. No escalations were emitted.");
    Ok(0)
}

/// Load configuration from file or use defaults. A broken config file is fatal.
fn load_config(args: &Args) -> Result<Config> {
    match args.config {
        Some(ref config_path) => info!("Loading config from: {}", config_path.display()),
        None if Path::new(CONFIG_FILE_NAME).exists() => {
            info!("Loading default config from {}", CONFIG_FILE_NAME)
        }
        None => debug!("No config file found, using defaults"),
    }
    Config::resolve(args.config.as_deref(), Path::new("."))
}
