//! Logging setup on `tracing`.
//!
//! Console output is human-readable and carries thread names (`callback`,
//! `publisher-0`, `supervisor`), which tells at a glance which side of the
//! pipeline a line came from. The optional file output rotates daily and is
//! written as JSON lines through a non-blocking writer, so a slow disk never
//! stalls a publisher thread.
//!
//! `RUST_LOG` overrides the level passed in.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Call once, before any bridge thread is spawned. The returned guard flushes
/// the file writer when dropped, so hold it for the life of the process.
/// A second call leaves the first subscriber in place.
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer().with_target(false).with_thread_names(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{module_name}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("[logging] subscriber already installed: {e}");
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_writes_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_logging("info", dir.path().to_str(), "twsb_test");
        assert!(guard.is_some());
        tracing::info!("[test] hello");
        drop(guard);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(!entries.is_empty());
    }
}
