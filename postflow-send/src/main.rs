//! postflow-send - Background publishing daemon
//!
//! Delivers due posts from the queue to their selected accounts and keeps
//! OAuth tokens fresh in the background.

use clap::Parser;
use libpostflow::logging::LoggingConfig;
use libpostflow::{Config, PostflowError, PostflowService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "postflow-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled publishing")]
#[command(long_about = "\
postflow-send - Background daemon for scheduled publishing

DESCRIPTION:
    postflow-send is a long-running daemon with two jobs:

    Publishing: it polls the task queue and publishes every due post to all
    of its selected accounts, at most ten accounts at a time. Each account
    gets one posting history entry, success or failure.

    Token refresh: every ten minutes it refreshes the OAuth tokens of all
    accounts expiring within the next thirty minutes.

USAGE:
    # Run in foreground (logs to stderr)
    postflow-send

    # Poll the queue every 2 seconds
    postflow-send --poll-interval 2

    # Enable verbose logging
    postflow-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current batch)

CONFIGURATION:
    Configuration file: ~/.config/postflow/config.toml

    [worker]
    publish_concurrency = 10  # accounts published in parallel per post
    poll_interval_secs = 5    # seconds between queue polls
    max_attempts = 5          # deliveries before a task is buried

    [refresh]
    interval_secs = 600       # seconds between refresh sweeps
    window_secs = 1800        # refresh tokens expiring this soon

    Environment overrides:
        POSTFLOW_CONFIG      - Path to config file
        POSTFLOW_DB_PATH     - Path to database file
        POSTFLOW_SECRET_KEY  - Token encryption key
        POSTFLOW_LOG_FORMAT  - text, json or pretty

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check the queue for due posts (default: 5)")]
    poll_interval: Option<u64>,

    /// Disable the token refresh sweep
    #[arg(long)]
    #[arg(help = "Only publish; do not refresh tokens")]
    no_refresh: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run once and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Run one refresh sweep, process due posts once and exit")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<PostflowError>()
            .map(PostflowError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(secs) = cli.poll_interval {
        config.worker.poll_interval_secs = secs.max(1);
    }

    let service = PostflowService::from_config(config).await?;

    info!(
        platforms = ?service.config().registered_platforms(),
        poll_interval_secs = service.config().worker.poll_interval_secs,
        "postflow-send daemon starting"
    );

    if cli.once {
        if !cli.no_refresh {
            service.refresher().sweep().await?;
        }
        let handled = service.process_due().await?;
        info!(tasks = handled, "postflow-send: processed queue once, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let refresh_task = if cli.no_refresh {
        None
    } else {
        let refresher = service.refresher().clone();
        let interval = service.config().refresh.interval();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            refresher.run(interval, shutdown).await;
        }))
    };

    run_daemon_loop(&service, shutdown).await;

    if let Some(task) = refresh_task {
        task.await?;
    }

    info!("postflow-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| anyhow::anyhow!("signal setup failed: {}", e))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

/// Poll the queue until shutdown is requested
async fn run_daemon_loop(service: &PostflowService, shutdown: Arc<AtomicBool>) {
    let poll_interval = service.config().worker.poll_interval_secs;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        match service.process_due().await {
            // A full batch means more work may be waiting
            Ok(handled) if handled > 0 && handled as u32 >= service.config().worker.batch_size => {
                continue;
            }
            Ok(_) => {}
            Err(e) => error!("Error processing queue: {}", e),
        }

        // Sleep until next poll (check shutdown every second)
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}
