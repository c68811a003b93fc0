//! synd-run - Publishing pass runner
//!
//! Cron-style entry point for the Syndicate engine. By default it runs
//! one publishing pass over the queue and exits; with --daemon it polls
//! at a fixed interval until signalled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use libsyndicate::logging::{LogFormat, LoggingConfig};
use libsyndicate::{
    Config, Database, Orchestrator, OutcomeKind, Result, StoredCredentialProvider,
    StrategyRegistry, SyndicateError,
};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "synd-run")]
#[command(version)]
#[command(about = "Run publishing passes over the Syndicate queue")]
#[command(long_about = "\
synd-run - Publishing pass runner

DESCRIPTION:
    synd-run drives the Syndicate publishing engine. Each pass finds
    content items whose scheduled time has arrived, claims them, fans
    out to the configured platforms (Threads, Instagram, Mastodon),
    retries transient failures with backoff on later passes, and
    publishes delayed replies once their parent is live.

USAGE:
    # Run a single pass (cron-friendly) and exit
    synd-run

    # Run continuously, polling every 30 seconds
    synd-run --daemon --poll-interval 30

    # Report items that slipped past their schedule, without publishing
    synd-run --report-missed

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current pass)

CONFIGURATION:
    Configuration file: ~/.config/syndicate/config.toml
    Database location: ~/.local/share/syndicate/queue.db

    [publisher]
    max_retries = 3
    retry_backoff_secs = [60, 300, 900]
    publish_timeout_secs = 60
    missed_threshold_minutes = 30

    [platforms.threads]
    enabled = true

EXIT CODES:
    0 - Pass completed (possibly with per-item failures)
    1 - Runtime error
    2 - Configuration or credential error
")]
struct Cli {
    /// Keep running, polling for due items at a fixed interval
    #[arg(long)]
    daemon: bool,

    /// Seconds between passes in daemon mode
    #[arg(long, value_name = "SECONDS", default_value = "60")]
    poll_interval: u64,

    /// List scheduled items past the staleness threshold and exit
    #[arg(long)]
    report_missed: bool,

    /// Enable verbose logging (useful for debugging)
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json, or pretty
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    LoggingConfig::new(cli.log_format, level.to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!("synd-run: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    let registry = Arc::new(StrategyRegistry::from_config(&config.platforms)?);
    let credentials = Arc::new(StoredCredentialProvider::new(db.clone()));
    let orchestrator = Orchestrator::new(db, registry, credentials, config.publisher.clone());

    if cli.report_missed {
        return report_missed(&orchestrator).await;
    }

    if cli.daemon {
        info!("synd-run daemon starting, poll interval {}s", cli.poll_interval);
        let shutdown = Arc::new(AtomicBool::new(false));
        setup_signal_handlers(shutdown.clone())?;
        run_daemon_loop(&orchestrator, cli.poll_interval, shutdown).await?;
        info!("synd-run daemon stopped");
    } else {
        run_pass(&orchestrator).await?;
    }

    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| SyndicateError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

async fn run_daemon_loop(
    orchestrator: &Orchestrator,
    poll_interval: u64,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        // A failed pass is logged, not fatal; the next poll retries.
        if let Err(e) = run_pass(orchestrator).await {
            error!("Pass failed: {}", e);
        }

        // Sleep until the next poll, checking shutdown every second.
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    Ok(())
}

async fn run_pass(orchestrator: &Orchestrator) -> Result<()> {
    let outcomes = orchestrator.run_once().await?;

    if outcomes.is_empty() {
        info!("Nothing due");
        return Ok(());
    }

    let published = outcomes
        .iter()
        .filter(|o| o.kind == OutcomeKind::Published)
        .count();
    let failed = outcomes
        .iter()
        .filter(|o| o.kind == OutcomeKind::Failed)
        .count();
    let pending = outcomes
        .iter()
        .filter(|o| o.kind == OutcomeKind::StillPublishing)
        .count();

    info!(
        "Pass complete: {} published, {} failed, {} awaiting retry",
        published, failed, pending
    );
    Ok(())
}

async fn report_missed(orchestrator: &Orchestrator) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let missed = orchestrator.scheduler().find_missed(now).await?;
    let stale = orchestrator.scheduler().find_stale_publishing(now).await?;

    if missed.is_empty() && stale.is_empty() {
        info!("No missed items");
        return Ok(());
    }

    for item in &missed {
        warn!(
            item_id = %item.id,
            scheduled_at = ?item.scheduled_at,
            retry_count = item.retry_count,
            "missed scheduled item"
        );
    }
    for item in &stale {
        warn!(
            item_id = %item.id,
            scheduled_at = ?item.scheduled_at,
            "item stuck in publishing"
        );
    }

    Ok(())
}
