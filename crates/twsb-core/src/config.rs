//! Configuration parsing for the bridge.
//!
//! The bridge reads its settings from a single JSON config file. Every field
//! is optional; the `effective_*` accessors supply defaults so a minimal file
//! only needs the Redis URL and the subscription list.
//!
//! # Example config
//!
//! ```json
//! {
//!   "bridge": { "module_name": "tws_bridge", "log_path": "/tmp/log" },
//!   "redis": { "url": "redis://127.0.0.1:6379/" },
//!   "queue": { "capacity": 10000, "coalesce_ticks": true },
//!   "publisher": { "workers": 2, "max_attempts": 5 },
//!   "outbound": { "tick_mode": "set", "order_mode": "stream" },
//!   "subscriptions": [{ "symbol": "AAPL", "ticker_ids": [1001, 11001] }]
//! }
//! ```

use std::collections::HashSet;
use std::time::Duration;

use redis::IntoConnectionInfo;
use serde::Deserialize;

use crate::error::BridgeError;
use crate::types::EventKind;

/// Largest accepted price precision (decimal places).
pub const MAX_PRICE_PRECISION: u32 = 12;

/// Top-level bridge config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    /// Module metadata (name, log path).
    pub bridge: Option<ModuleMeta>,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub publisher: PublisherSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub outbound: OutboundSettings,
    /// Instruments to route tick callbacks for.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

impl BridgeConfig {
    /// Returns the module name, defaulting to `"tws_bridge"`.
    pub fn module_name(&self) -> String {
        self.bridge
            .as_ref()
            .and_then(|m| m.module_name.clone())
            .unwrap_or_else(|| "tws_bridge".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.bridge.as_ref().and_then(|m| m.log_path.clone())
    }

    /// Check cross-field constraints. Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let fatal = |msg: String| Err(BridgeError::FatalConfig(msg));

        let capacity = self.queue.effective_capacity();
        let workers = self.publisher.effective_workers();
        if capacity == 0 {
            return fatal("queue.capacity must be greater than zero".into());
        }
        if workers == 0 {
            return fatal("publisher.workers must be greater than zero".into());
        }
        if self.publisher.effective_max_attempts() == 0 {
            return fatal("publisher.max_attempts must be greater than zero".into());
        }
        if self.queue.effective_dequeue_timeout().is_zero() {
            return fatal("queue.dequeue_timeout_ms must be greater than zero".into());
        }
        let precision = self.outbound.effective_price_precision();
        if precision > MAX_PRICE_PRECISION {
            return fatal(format!("outbound.price_precision {precision} exceeds {MAX_PRICE_PRECISION}"));
        }
        for jitter in [self.publisher.effective_jitter_factor(), self.supervisor.effective_jitter_factor()] {
            if !(0.0..=1.0).contains(&jitter) {
                return fatal(format!("jitter_factor {jitter} outside [0, 1]"));
            }
        }

        let url = self.redis.effective_url();
        if let Err(e) = url.as_str().into_connection_info() {
            return fatal(format!("invalid redis url '{url}': {e}"));
        }

        let mut seen = HashSet::new();
        for sub in &self.subscriptions {
            if sub.symbol.trim().is_empty() {
                return fatal("subscription with empty symbol".into());
            }
            for id in &sub.ticker_ids {
                if !seen.insert(*id) {
                    return fatal(format!("ticker id {id} is subscribed twice"));
                }
            }
        }
        Ok(())
    }
}

/// Redis endpoint settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisSettings {
    /// Connection URL (default: `redis://127.0.0.1:6379/`).
    pub url: Option<String>,
    /// Timeout for establishing a connection (default: 500ms).
    pub connect_timeout_ms: Option<u64>,
    /// Socket read/write timeout per command (default: 100ms).
    pub io_timeout_ms: Option<u64>,
}

impl RedisSettings {
    pub fn effective_url(&self) -> String {
        self.url.clone().unwrap_or_else(|| "redis://127.0.0.1:6379/".to_string())
    }

    pub fn effective_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.unwrap_or(500))
    }

    pub fn effective_io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.unwrap_or(100))
    }
}

/// Relay queue settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSettings {
    /// Total bounded capacity across all lanes (default: 10_000).
    pub capacity: Option<usize>,
    /// Longest a worker waits on an empty lane before housekeeping (default: 50ms).
    pub dequeue_timeout_ms: Option<u64>,
    /// Whether a full queue may coalesce pending ticks (default: true).
    pub coalesce_ticks: Option<bool>,
}

impl QueueSettings {
    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or(10_000)
    }

    pub fn effective_dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms.unwrap_or(50))
    }

    pub fn effective_coalesce_ticks(&self) -> bool {
        self.coalesce_ticks.unwrap_or(true)
    }
}

/// Publisher worker settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublisherSettings {
    /// Number of publisher threads, one per relay lane (default: 2).
    pub workers: Option<usize>,
    /// Publish attempts per event before it is dropped (default: 5).
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    /// Relative jitter applied to each backoff (default: 0.2 = ±20%).
    pub jitter_factor: Option<f64>,
    /// Best-effort flush window after shutdown is requested (default: 1000ms).
    pub shutdown_grace_ms: Option<u64>,
    /// CPU cores to pin worker threads to, by worker index.
    pub cpu_affinity: Option<Vec<i32>>,
    /// Latency print interval in milliseconds (default: 10_000).
    pub latency_print_interval_ms: Option<u64>,
}

impl PublisherSettings {
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or(2)
    }

    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(5)
    }

    pub fn effective_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.unwrap_or(50))
    }

    pub fn effective_max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.unwrap_or(2_000))
    }

    pub fn effective_jitter_factor(&self) -> f64 {
        self.jitter_factor.unwrap_or(0.2)
    }

    pub fn effective_shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms.unwrap_or(1_000))
    }

    /// CPU core for worker `idx`, if configured.
    pub fn cpu_core_for(&self, idx: usize) -> Option<i32> {
        self.cpu_affinity.as_ref().and_then(|cores| cores.get(idx).copied())
    }

    pub fn effective_latency_print_interval(&self) -> Duration {
        Duration::from_millis(self.latency_print_interval_ms.unwrap_or(10_000))
    }
}

/// Connection supervisor settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SupervisorSettings {
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub jitter_factor: Option<f64>,
    /// Interval between PING health probes while Ready (default: 1000ms).
    pub health_interval_ms: Option<u64>,
}

impl SupervisorSettings {
    pub fn effective_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.unwrap_or(100))
    }

    pub fn effective_max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.unwrap_or(30_000))
    }

    pub fn effective_jitter_factor(&self) -> f64 {
        self.jitter_factor.unwrap_or(0.2)
    }

    pub fn effective_health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms.unwrap_or(1_000))
    }
}

/// How events of one kind are written to Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// `SET key payload`, last value wins.
    Set,
    /// `PUBLISH channel payload`.
    Publish,
    /// `XADD key MAXLEN ~ n * data payload`, append, nothing overwritten.
    Stream,
    /// `SET` followed by `PUBLISH` on the same name.
    SetPublish,
}

/// Outbound (Redis-side) naming and encoding settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutboundSettings {
    /// Prefix prepended to every key and channel (default: `""`).
    pub key_prefix: Option<String>,
    /// Decimal places for price fields (default: 6).
    pub price_precision: Option<u32>,
    pub tick_mode: Option<WriteMode>,
    pub order_mode: Option<WriteMode>,
    pub execution_mode: Option<WriteMode>,
    pub account_mode: Option<WriteMode>,
    /// Approximate cap on stream length for `stream` mode (default: 10_000).
    pub stream_maxlen: Option<u64>,
    /// Channel prefix for combined instrument snapshots. Snapshots are
    /// disabled when set to `""` (default: `"TWS:TICKS:"`).
    pub snapshot_channel_prefix: Option<String>,
}

impl OutboundSettings {
    pub fn effective_key_prefix(&self) -> &str {
        self.key_prefix.as_deref().unwrap_or("")
    }

    pub fn effective_price_precision(&self) -> u32 {
        self.price_precision.unwrap_or(6)
    }

    /// Write mode for an event kind. Ticks default to last-value semantics,
    /// state transitions to append semantics.
    pub fn mode_for(&self, kind: EventKind) -> WriteMode {
        match kind {
            EventKind::Tick => self.tick_mode.unwrap_or(WriteMode::Set),
            EventKind::OrderStatus => self.order_mode.unwrap_or(WriteMode::Stream),
            EventKind::Execution => self.execution_mode.unwrap_or(WriteMode::Stream),
            EventKind::AccountUpdate => self.account_mode.unwrap_or(WriteMode::Stream),
        }
    }

    pub fn effective_stream_maxlen(&self) -> u64 {
        self.stream_maxlen.unwrap_or(10_000)
    }

    /// Snapshot channel prefix, or `None` if snapshots are disabled.
    pub fn snapshot_channel_prefix(&self) -> Option<&str> {
        match self.snapshot_channel_prefix.as_deref() {
            Some("") => None,
            Some(p) => Some(p),
            None => Some("TWS:TICKS:"),
        }
    }
}

/// One subscribed instrument and the broker request ids its ticks arrive on.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub symbol: String,
    /// Request ids routed to this symbol (BidAsk and AllLast streams use
    /// separate ids).
    #[serde(default)]
    pub ticker_ids: Vec<i32>,
    /// Broker contract id, carried into snapshots.
    pub con_id: Option<i64>,
    /// Routing exchange, carried into snapshots until a trade reports one.
    pub exchange: Option<String>,
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<BridgeConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: BridgeConfig = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn parse(json: &str) -> BridgeConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn empty_object_uses_defaults() {
        let c = parse("{}");
        assert_eq!(c.module_name(), "tws_bridge");
        assert_eq!(c.queue.effective_capacity(), 10_000);
        assert_eq!(c.publisher.effective_workers(), 2);
        assert_eq!(c.publisher.effective_max_attempts(), 5);
        assert_eq!(c.outbound.mode_for(EventKind::Tick), WriteMode::Set);
        assert_eq!(c.outbound.mode_for(EventKind::OrderStatus), WriteMode::Stream);
        assert_eq!(c.outbound.snapshot_channel_prefix(), Some("TWS:TICKS:"));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn full_config_parses() {
        let c = parse(
            r#"{
                "bridge": { "module_name": "bridge_a", "log_path": "/tmp/log" },
                "redis": { "url": "redis://10.0.0.5:6380/1", "io_timeout_ms": 250 },
                "queue": { "capacity": 64, "dequeue_timeout_ms": 10, "coalesce_ticks": false },
                "publisher": { "workers": 4, "max_attempts": 3, "cpu_affinity": [2, 3] },
                "outbound": { "tick_mode": "set_publish", "account_mode": "publish",
                              "key_prefix": "prod:", "snapshot_channel_prefix": "" },
                "subscriptions": [{ "symbol": "AAPL", "ticker_ids": [1001, 11001], "con_id": 265598 }]
            }"#,
        );
        assert_eq!(c.module_name(), "bridge_a");
        assert_eq!(c.redis.effective_io_timeout(), Duration::from_millis(250));
        assert!(!c.queue.effective_coalesce_ticks());
        assert_eq!(c.publisher.cpu_core_for(1), Some(3));
        assert_eq!(c.publisher.cpu_core_for(2), None);
        assert_eq!(c.outbound.mode_for(EventKind::Tick), WriteMode::SetPublish);
        assert_eq!(c.outbound.mode_for(EventKind::AccountUpdate), WriteMode::Publish);
        assert_eq!(c.outbound.effective_key_prefix(), "prod:");
        assert_eq!(c.outbound.snapshot_channel_prefix(), None);
        assert_eq!(c.subscriptions[0].ticker_ids, vec![1001, 11001]);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_zero_capacity_and_workers() {
        let c = parse(r#"{ "queue": { "capacity": 0 } }"#);
        assert!(matches!(c.validate(), Err(BridgeError::FatalConfig(_))));
        let c = parse(r#"{ "publisher": { "workers": 0 } }"#);
        assert!(matches!(c.validate(), Err(BridgeError::FatalConfig(_))));
        let c = parse(r#"{ "queue": { "capacity": 2 }, "publisher": { "workers": 3 } }"#);
        assert!(matches!(c.validate(), Err(BridgeError::FatalConfig(_))));
    }

    #[test]
    fn rejects_bad_redis_url() {
        let c = parse(r#"{ "redis": { "url": "http://nope" } }"#);
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("invalid redis url"));
    }

    #[test]
    fn rejects_duplicate_ticker_ids() {
        let c = parse(
            r#"{ "subscriptions": [
                { "symbol": "AAPL", "ticker_ids": [1] },
                { "symbol": "SPY", "ticker_ids": [1] }
            ] }"#,
        );
        assert!(c.validate().unwrap_err().to_string().contains("subscribed twice"));
    }

    #[test]
    fn rejects_excess_precision() {
        let c = parse(r#"{ "outbound": { "price_precision": 13 } }"#);
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{ "queue": {{ "capacity": 128 }} }}"#).unwrap();
        let c = load_config(f.path()).unwrap();
        assert_eq!(c.queue.effective_capacity(), 128);
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(load_config(std::path::Path::new("/nonexistent/bridge.json")).is_err());
    }
}
