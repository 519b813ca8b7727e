//! # twsb-runner
//!
//! Entry point for the TWS-to-Redis bridge.
//!
//! Loads a JSON configuration file, starts the bridge pipeline, feeds it
//! from a JSON-lines replay (file or stdin) on a dedicated callback thread,
//! and shuts down cleanly on Ctrl+C or when the feed ends.
//!
//! # Usage
//!
//! ```bash
//! twsb-runner config.json --log-level info --feed session.jsonl
//! twsb-runner config.json --dry-run --feed - < session.jsonl
//! ```

mod json_util;
mod replay;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use twsb_bridge::{Bridge, Connector, IngestAdapter, MemoryConnector, RedisConnector};

/// How often the runner logs a stats line.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// TWS-to-Redis bridge runner.
#[derive(Parser)]
#[command(name = "twsb-runner", about = "TWS to Redis bridge runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output (overrides `bridge.log_path`).
    #[arg(long)]
    log_dir: Option<String>,

    /// JSON-lines callback feed to replay; `-` reads stdin.
    #[arg(long)]
    feed: Option<String>,

    /// Publish to an in-process sink instead of Redis.
    #[arg(long)]
    dry_run: bool,
}

fn open_feed(path: &str) -> Result<Box<dyn BufRead + Send>> {
    if path == "-" {
        Ok(Box::new(BufReader::new(std::io::stdin())))
    } else {
        let file = File::open(path).with_context(|| format!("opening feed {path}"))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Run the replay on its own thread, as the broker library would run its
/// callbacks. The adapter never leaves that thread.
fn spawn_feed(
    reader: Box<dyn BufRead + Send>,
    mut adapter: IngestAdapter,
    stop: Arc<AtomicBool>,
) -> Result<tokio::sync::oneshot::Receiver<replay::FeedSummary>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::Builder::new()
        .name("callback".into())
        .spawn(move || {
            let summary = replay::run_feed(reader, &mut adapter, &stop);
            let _ = tx.send(summary);
        })
        .context("spawning callback thread")?;
    Ok(rx)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (logging destination may come from it)
    let config = twsb_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    let _log_guard = twsb_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &config.module_name());
    info!("twsb-runner starting, config={}, log_level={}", cli.config.display(), cli.log_level);

    // 3. Validate; configuration errors are the only fatal ones
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return Err(e.into());
    }
    info!(
        "config loaded, {} subscription(s), redis={}",
        config.subscriptions.len(),
        config.redis.effective_url()
    );

    // 4. Start the pipeline
    let dry_sink = cli.dry_run.then(MemoryConnector::logging);
    let connector: Arc<dyn Connector> = match &dry_sink {
        Some(sink) => {
            info!("dry run, publishing to in-process sink");
            Arc::new(sink.clone())
        }
        None => Arc::new(RedisConnector::new(&config.redis)?),
    };
    let (bridge, adapter) = Bridge::start(&config, connector)?;

    // 5. Feed
    let stop = Arc::new(AtomicBool::new(false));
    let mut idle_adapter = None;
    let mut feed_done = match cli.feed.as_deref() {
        Some(path) => Some(spawn_feed(open_feed(path)?, adapter, stop.clone())?),
        None => {
            info!("no feed configured, waiting for Ctrl+C");
            idle_adapter = Some(adapter);
            None
        }
    };

    // 6. Run until Ctrl+C or end of feed
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("shutdown signal received");
                break;
            }
            summary = async {
                match feed_done.as_mut() {
                    Some(rx) => rx.await,
                    None => std::future::pending().await,
                }
            } => {
                match summary {
                    Ok(s) => info!("[feed] finished: {s:?}"),
                    Err(_) => error!("[feed] callback thread exited without a summary"),
                }
                break;
            }
            _ = ticker.tick() => {
                info!("[stats] {}", bridge.stats());
            }
        }
    }

    // 7. Stop
    stop.store(true, Ordering::Release);
    drop(idle_adapter);
    let final_stats = tokio::task::spawn_blocking(move || bridge.shutdown()).await?;
    info!("final stats: {final_stats}");
    if let Some(sink) = dry_sink {
        info!("dry run acknowledged {} op(s)", sink.acknowledged());
    }
    info!("twsb-runner stopped, goodbye");
    Ok(())
}
