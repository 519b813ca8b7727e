//! Pipeline assembly and lifecycle.
//!
//! [`Bridge::start`] wires the relay queue, supervisor and publisher workers
//! together and returns the [`IngestAdapter`] for the broker callback thread.
//!
//! ```text
//! Bridge::start()    ──► validate config, first connect attempt
//!                    ──► spawn supervisor + one publisher per lane
//! Bridge::shutdown() ──► raise worker flag, wake waiters, join workers
//!                    ──► raise supervisor flag, join supervisor
//! ```
//!
//! Workers and the supervisor stop on separate flags: the workers' grace
//! flush writes through links the supervisor still owns, so the supervisor
//! must outlive them.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};
use twsb_core::config::BridgeConfig;
use twsb_core::stats::{BridgeStats, StatsSnapshot};
use twsb_core::{BridgeError, ConnectionState};

use crate::ingest::IngestAdapter;
use crate::publisher::{PublisherWorker, WorkerLinks};
use crate::relay::RelayQueue;
use crate::shutdown::Shutdown;
use crate::sink::Connector;
use crate::snapshot::{InstrumentMeta, SnapshotBook};
use crate::supervisor::{LinkSlot, SharedState, Supervisor, failure_channel};

/// A running bridge.
pub struct Bridge {
    queue: Arc<RelayQueue>,
    stats: Arc<BridgeStats>,
    shared: Arc<SharedState>,
    shutdown: Shutdown,
    supervisor_stop: Shutdown,
    workers: Vec<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Validate `config`, connect (once, non-fatally) and spawn all threads.
    pub fn start(
        config: &BridgeConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Bridge, IngestAdapter), BridgeError> {
        config.validate()?;

        let workers = config.publisher.effective_workers();
        let queue = Arc::new(RelayQueue::new(config.queue.effective_capacity(), workers));
        let stats = Arc::new(BridgeStats::new());
        let shared = Arc::new(SharedState::new());
        let shutdown = Shutdown::new();
        let supervisor_stop = Shutdown::new();
        let slots: Arc<Vec<LinkSlot>> = Arc::new((0..workers).map(|_| LinkSlot::new()).collect());
        let (reporter, failures) = failure_channel(workers);

        let mut supervisor = Supervisor::new(
            connector,
            shared.clone(),
            slots.clone(),
            failures,
            supervisor_stop.clone(),
            &config.supervisor,
        );
        supervisor.connect_initial();

        let mut bridge = Bridge {
            queue: queue.clone(),
            stats: stats.clone(),
            shared: shared.clone(),
            shutdown: shutdown.clone(),
            supervisor_stop,
            workers: Vec::with_capacity(workers),
            supervisor: None,
        };

        bridge.supervisor = Some(spawn("supervisor".to_string(), move || supervisor.run())?);

        let meta = InstrumentMeta::table(&config.subscriptions);
        let links = WorkerLinks { queue: queue.clone(), shared, slots, reporter, stats: stats.clone(), shutdown };
        for id in 0..workers {
            let worker = PublisherWorker::new(id, links.clone(), config, SnapshotBook::new(meta.clone()));
            // On spawn failure the partially built bridge is stopped by Drop.
            bridge.workers.push(spawn(format!("publisher-{id}"), move || worker.run())?);
        }

        info!(
            "[bridge] started: workers={workers} capacity={} state={}",
            queue.capacity(),
            bridge.connection_state()
        );

        let adapter = IngestAdapter::new(queue, stats, config);
        Ok((bridge, adapter))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.queue.len(), self.shared.get())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.get()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Recent connection state changes, oldest first.
    pub fn connection_history(&self) -> Vec<ConnectionState> {
        self.shared.recent_transitions()
    }

    /// Stop all threads and return final counters. Items still queued after
    /// the workers exit are counted as `shutdown_dropped`.
    pub fn shutdown(mut self) -> StatsSnapshot {
        self.stop();
        let snap = self.stats();
        info!("[bridge] stopped: {snap}");
        debug!("[bridge] connection history: {:?}", self.connection_history());
        snap
    }

    fn stop(&mut self) {
        if self.workers.is_empty() && self.supervisor.is_none() {
            return;
        }
        self.shutdown.request();
        self.shared.wake_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("[bridge] publisher thread panicked");
            }
        }
        self.supervisor_stop.request();
        if let Some(handle) = self.supervisor.take()
            && handle.join().is_err()
        {
            warn!("[bridge] supervisor thread panicked");
        }
        // Anything enqueued after its worker's final drain.
        for _ in 0..self.queue.drain() {
            self.stats.record_shutdown_dropped();
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn<F>(name: String, f: F) -> Result<JoinHandle<()>, BridgeError>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| BridgeError::FatalConfig(format!("failed to spawn {name} thread: {e}")))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use twsb_core::RawAccountValue;
    use twsb_core::config::{PublisherSettings, QueueSettings};

    use super::*;
    use crate::sink::MemoryConnector;

    fn config() -> BridgeConfig {
        BridgeConfig {
            queue: QueueSettings { capacity: Some(64), dequeue_timeout_ms: Some(5), ..Default::default() },
            publisher: PublisherSettings { workers: Some(2), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn invalid_config_is_fatal() {
        let mut cfg = config();
        cfg.queue.capacity = Some(0);
        let err = Bridge::start(&cfg, Arc::new(MemoryConnector::new())).err();
        assert!(matches!(err, Some(BridgeError::FatalConfig(_))));
    }

    #[test]
    fn starts_ready_publishes_and_stops() {
        let mem = MemoryConnector::new();
        let (bridge, mut adapter) = Bridge::start(&config(), Arc::new(mem.clone())).unwrap();
        assert_eq!(bridge.connection_state(), ConnectionState::Ready);

        let raw = RawAccountValue {
            account: "DU1".into(),
            key: "NetLiquidation".into(),
            value: "1000".into(),
            currency: "USD".into(),
        };
        adapter.on_account_value(&raw);

        let deadline = Instant::now() + Duration::from_secs(5);
        while bridge.stats().published < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        let snap = bridge.shutdown();
        assert_eq!(snap.published, 1);
        assert_eq!(snap.connection, ConnectionState::Disconnected);
        assert_eq!(mem.ops_for("account:DU1").len(), 1);
    }

    #[test]
    fn starts_without_redis() {
        let mem = MemoryConnector::new();
        mem.set_outage(true);
        let (bridge, _adapter) = Bridge::start(&config(), Arc::new(mem)).unwrap();
        assert_ne!(bridge.connection_state(), ConnectionState::Ready);
        let start = Instant::now();
        bridge.shutdown();
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
