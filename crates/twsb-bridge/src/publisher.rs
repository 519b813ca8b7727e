//! Publisher workers.
//!
//! One worker thread per relay lane. A worker moves through four states:
//!
//! ```text
//!   Idle ──ready──► Draining ──item──► Publishing ──ok──► Idle
//!    ▲                                      │
//!    │                                   failure
//!    │                                      ▼
//!    └──────────dropped (budget spent)── Backoff ──delay elapsed + ready──► Publishing
//! ```
//!
//! Attempts are only spent against a live connection: a write that fails
//! because the supervisor tore the link down mid-flight is retried without
//! charging the item's budget.
//!
//! While an item is in `Backoff` it blocks its lane: nothing behind it is
//! published until it succeeds or its attempts run out. That is what keeps
//! per-source order intact across retries.
//!
//! Workers never connect. They publish through the link the supervisor lent
//! them and report failures back; every wait is bounded and re-checks the
//! shutdown flag.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use twsb_core::config::{BridgeConfig, OutboundSettings};
use twsb_core::cpu_affinity::maybe_bind;
use twsb_core::latency::LatencyHistogram;
use twsb_core::stats::BridgeStats;
use twsb_core::{BridgeError, EventPayload};

use crate::backoff::BackoffPolicy;
use crate::relay::{RelayItem, RelayQueue};
use crate::serializer::{encode_event, encode_snapshot, snapshot_channel};
use crate::shutdown::Shutdown;
use crate::sink::{WriteOp, plan_writes};
use crate::snapshot::SnapshotBook;
use crate::supervisor::{FailureReporter, LinkSlot, SharedState};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the connection to become ready.
    Idle,
    /// Waiting on the lane for the next item.
    Draining,
    /// Writing an item.
    Publishing,
    /// Holding a failed item until its retry delay passes.
    Backoff,
}

/// Attempt accounting for one item.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    attempts: u32,
    max_attempts: u32,
    next_eligible: Instant,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self { attempts: 0, max_attempts: max_attempts.max(1), next_eligible: Instant::now() }
    }

    /// Failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and schedule the next one `delay` from now.
    /// Returns `true` once the budget is spent.
    pub fn record_failure(&mut self, delay: Duration) -> bool {
        self.attempts += 1;
        self.next_eligible = Instant::now() + delay;
        self.attempts >= self.max_attempts
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        now >= self.next_eligible
    }

    /// Time left until the next attempt may run.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_eligible.saturating_duration_since(now)
    }
}

/// An item that has been serialized and is waiting to be written.
struct Pending {
    label: String,
    ops: Vec<WriteOp>,
    enqueued_at: Instant,
    budget: RetryBudget,
}

/// Handles every worker shares with the rest of the pipeline.
#[derive(Clone)]
pub struct WorkerLinks {
    pub queue: Arc<RelayQueue>,
    pub shared: Arc<SharedState>,
    pub slots: Arc<Vec<LinkSlot>>,
    pub reporter: FailureReporter,
    pub stats: Arc<BridgeStats>,
    pub shutdown: Shutdown,
}

pub struct PublisherWorker {
    id: usize,
    label: String,
    links: WorkerLinks,
    outbound: OutboundSettings,
    precision: u32,
    stream_maxlen: u64,
    snapshots_enabled: bool,
    policy: BackoffPolicy,
    max_attempts: u32,
    dequeue_timeout: Duration,
    slot_wait: Duration,
    grace: Duration,
    cpu_core: Option<i32>,
    snapshots: SnapshotBook,
    latency: LatencyHistogram,
    latency_interval: Duration,
    last_latency_print: Instant,
    state: WorkerState,
    pending: Option<Pending>,
}

impl PublisherWorker {
    pub fn new(id: usize, links: WorkerLinks, config: &BridgeConfig, snapshots: SnapshotBook) -> Self {
        let p = &config.publisher;
        Self {
            id,
            label: format!("publisher-{id}"),
            links,
            outbound: config.outbound.clone(),
            precision: config.outbound.effective_price_precision(),
            stream_maxlen: config.outbound.effective_stream_maxlen(),
            snapshots_enabled: config.outbound.snapshot_channel_prefix().is_some(),
            policy: BackoffPolicy::new(
                p.effective_initial_backoff(),
                p.effective_max_backoff(),
                p.effective_jitter_factor(),
            ),
            max_attempts: p.effective_max_attempts(),
            dequeue_timeout: config.queue.effective_dequeue_timeout(),
            slot_wait: config.redis.effective_io_timeout() * 2,
            grace: p.effective_shutdown_grace(),
            cpu_core: p.cpu_core_for(id),
            snapshots,
            latency: LatencyHistogram::new(),
            latency_interval: p.effective_latency_print_interval(),
            last_latency_print: Instant::now(),
            state: WorkerState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Worker loop. Returns after shutdown, having flushed or counted every
    /// item left in its lane.
    pub fn run(mut self) {
        maybe_bind(self.cpu_core);
        info!("[{}] started on lane {}", self.label, self.id);

        while !self.links.shutdown.is_requested() {
            self.maybe_print_latency();

            if let Some(p) = self.pending.take() {
                self.retry(p);
                continue;
            }

            self.state = WorkerState::Idle;
            if !self.links.shared.wait_ready(self.dequeue_timeout) {
                continue;
            }

            self.state = WorkerState::Draining;
            let Some(item) = self.links.queue.pop(self.id, self.dequeue_timeout) else {
                continue;
            };
            if let Some(p) = self.prepare(item) {
                self.publish(p);
            }
        }

        self.finish();
    }

    /// Serialize a dequeued item into its write plan. Encoding failures are
    /// counted and the item dropped.
    fn prepare(&mut self, item: RelayItem) -> Option<Pending> {
        let enqueued_at = item.enqueued_at();
        let (event, destination) = item.into_parts();
        let event = event?;

        let payload = match encode_event(&event, self.precision) {
            Ok(p) => p,
            Err(e) => {
                self.links.stats.record_encode_failed();
                warn!("[{}] dropping unencodable event {event}: {e}", self.label);
                return None;
            }
        };
        let mode = self.outbound.mode_for(event.kind());
        let mut ops = plan_writes(mode, &destination, payload, self.stream_maxlen);

        if self.snapshots_enabled
            && let EventPayload::Tick(tick) = event.payload()
            && let Some(snap) = self.snapshots.apply(tick)
            && let Some(channel) = snapshot_channel(&tick.symbol, &self.outbound)
        {
            match encode_snapshot(snap, self.precision) {
                Ok(message) => ops.push(WriteOp::Publish { channel, message }),
                Err(e) => debug!("[{}] snapshot for {} skipped: {e}", self.label, tick.symbol),
            }
        }

        Some(Pending {
            label: format!("#{} {}:{}", event.seq(), event.source().namespace(), event.source()),
            ops,
            enqueued_at,
            budget: RetryBudget::new(self.max_attempts),
        })
    }

    /// Backoff state: wait out the delay, then retry once ready.
    fn retry(&mut self, p: Pending) {
        self.state = WorkerState::Backoff;
        let now = Instant::now();
        if !p.budget.is_eligible(now) {
            let wait = p.budget.remaining(now).min(self.dequeue_timeout);
            self.pending = Some(p);
            self.links.shutdown.sleep(wait);
            return;
        }
        if !self.links.shared.wait_ready(self.dequeue_timeout) {
            self.pending = Some(p);
            return;
        }
        self.publish(p);
    }

    fn publish(&mut self, mut p: Pending) {
        let generation = self.links.shared.generation();
        if !self.links.shared.is_ready() {
            // Lost readiness between dequeue and write; no attempt spent.
            self.pending = Some(p);
            return;
        }

        self.state = WorkerState::Publishing;
        match self.apply(&p.ops) {
            Ok(()) => {
                self.links.stats.record_published();
                self.latency.record(p.enqueued_at.elapsed());
                self.state = WorkerState::Idle;
            }
            Err(e) => {
                if !self.links.shared.is_ready() || self.links.shared.generation() != generation {
                    // Link was torn down mid-write; retry on the next one.
                    debug!("[{}] {} interrupted by reconnect: {e}", self.label, p.label);
                    self.state = WorkerState::Backoff;
                    self.pending = Some(p);
                    return;
                }
                self.links.reporter.report(self.id, generation, &e);
                let delay = self.policy.delay(p.budget.attempts());
                if p.budget.record_failure(delay) || !e.is_retryable() {
                    self.links.stats.record_publish_failed();
                    error!(
                        "[{}] publish failed, event lost: {} after {} attempts: {e}",
                        self.label,
                        p.label,
                        p.budget.attempts()
                    );
                    self.state = WorkerState::Idle;
                } else {
                    self.links.stats.record_retry();
                    debug!(
                        "[{}] {} attempt {} failed: {e}, retrying in {delay:?}",
                        self.label,
                        p.label,
                        p.budget.attempts()
                    );
                    self.state = WorkerState::Backoff;
                    self.pending = Some(p);
                }
            }
        }
    }

    fn apply(&self, ops: &[WriteOp]) -> Result<(), BridgeError> {
        let mut guard = self.links.slots[self.id]
            .lock_for(self.slot_wait)
            .ok_or_else(|| BridgeError::TransientIo("link slot busy".into()))?;
        match guard.as_mut() {
            Some(link) => link.apply(ops),
            None => Err(BridgeError::TransientIo("no link installed".into())),
        }
    }

    /// Shutdown: best-effort flush within the grace period, then count the
    /// rest as dropped.
    fn finish(&mut self) {
        let deadline = Instant::now() + self.grace;
        let mut flushed = 0u64;

        while Instant::now() < deadline && self.links.shared.is_ready() {
            let p = match self.pending.take() {
                Some(p) => p,
                None => match self.links.queue.try_pop(self.id) {
                    Some(item) => match self.prepare(item) {
                        Some(p) => p,
                        None => continue,
                    },
                    None => break,
                },
            };
            match self.apply(&p.ops) {
                Ok(()) => {
                    self.links.stats.record_published();
                    flushed += 1;
                }
                Err(e) => {
                    warn!("[{}] flush stopped at {}: {e}", self.label, p.label);
                    self.pending = Some(p);
                    break;
                }
            }
        }

        let mut dropped = u64::from(self.pending.take().is_some());
        while self.links.queue.try_pop(self.id).is_some() {
            dropped += 1;
        }
        for _ in 0..dropped {
            self.links.stats.record_shutdown_dropped();
        }

        self.print_latency();
        info!("[{}] stopped (flushed={flushed}, dropped={dropped})", self.label);
    }

    fn maybe_print_latency(&mut self) {
        if self.last_latency_print.elapsed() >= self.latency_interval {
            self.print_latency();
        }
    }

    fn print_latency(&mut self) {
        self.last_latency_print = Instant::now();
        if let Some(stats) = self.latency.stats() {
            info!("[{}] publish latency {stats}", self.label);
            self.latency.reset();
        }
    }
}
