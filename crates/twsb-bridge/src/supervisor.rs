//! Connection supervisor.
//!
//! The supervisor is the single authority on [`ConnectionState`] and the only
//! owner of Redis links. Each publisher worker is lent a [`LinkSlot`]; workers
//! never reconnect themselves. When a worker (or the periodic health probe)
//! sees an I/O failure, the supervisor:
//!
//! 1. sets `Degraded` so every worker stops issuing I/O,
//! 2. tears down all links and sets `Disconnected`,
//! 3. sets `Connecting` and retries with jittered exponential backoff,
//!    without an attempt limit,
//! 4. on success installs a fresh link in every slot and sets `Ready`,
//!    waking all workers.
//!
//! Each `Ready` period has a generation number. Failure reports carry the
//! generation the worker observed, so a stale report from before a reconnect
//! cannot tear down the new links.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use twsb_core::config::SupervisorSettings;
use twsb_core::{BridgeError, ConnectionState};

use crate::backoff::BackoffPolicy;
use crate::shutdown::Shutdown;
use crate::sink::{Connector, RedisLink};

/// Longest time the supervisor waits for a worker to release its slot.
const SLOT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Longest single wait in the supervisor loop between shutdown checks.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// State changes kept for [`SharedState::recent_transitions`].
const HISTORY_LEN: usize = 64;

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

/// Connection state visible to every thread.
///
/// Readers load the atomic. The mutex guards a short history of state
/// changes and pairs with the condvar workers wait on for `Ready`.
pub struct SharedState {
    state: AtomicU8,
    generation: AtomicU64,
    history: Mutex<VecDeque<ConnectionState>>,
    ready: Condvar,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            generation: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LEN)),
            ready: Condvar::new(),
        }
    }

    #[inline]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.get() == ConnectionState::Ready
    }

    /// Generation of the current (or most recent) `Ready` period.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Block until `Ready` or `timeout`. Returns whether the state is `Ready`.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let mut guard = self.history.lock();
        if self.is_ready() {
            return true;
        }
        self.ready.wait_for(&mut guard, timeout);
        self.is_ready()
    }

    /// Wake every waiter without changing state (used at shutdown).
    pub fn wake_all(&self) {
        let _guard = self.history.lock();
        self.ready.notify_all();
    }

    /// The most recent state changes, oldest first.
    pub fn recent_transitions(&self) -> Vec<ConnectionState> {
        self.history.lock().iter().copied().collect()
    }

    fn set(&self, next: ConnectionState) {
        let mut history = self.history.lock();
        let prev = self.get();
        if next == ConnectionState::Ready {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.state.store(next as u8, Ordering::Release);
        if next == ConnectionState::Ready {
            self.ready.notify_all();
        }
        if prev != next {
            if history.len() == HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(next);
            info!("[supervisor] connection {prev} -> {next}");
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// LinkSlot
// ---------------------------------------------------------------------------

/// A worker's borrowed connection. `None` while disconnected.
#[derive(Default)]
pub struct LinkSlot {
    link: Mutex<Option<Box<dyn RedisLink>>>,
}

impl LinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the slot, waiting at most `timeout`.
    pub fn lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, Option<Box<dyn RedisLink>>>> {
        self.link.try_lock_for(timeout)
    }
}

// ---------------------------------------------------------------------------
// Failure reports
// ---------------------------------------------------------------------------

/// An I/O failure observed by a worker.
#[derive(Debug, Clone)]
pub struct LinkFailure {
    pub worker: usize,
    pub generation: u64,
    pub error: BridgeError,
}

/// Worker-side handle for reporting link failures. Never blocks.
#[derive(Clone)]
pub struct FailureReporter {
    tx: Sender<LinkFailure>,
}

impl FailureReporter {
    pub fn report(&self, worker: usize, generation: u64, error: &BridgeError) {
        let failure = LinkFailure { worker, generation, error: error.clone() };
        match self.tx.try_send(failure) {
            // A full channel already holds a report that will degrade the link.
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!("[publisher-{worker}] supervisor gone, failure not reported");
            }
        }
    }
}

/// Failure channel sized so every worker can have a few reports in flight.
pub fn failure_channel(workers: usize) -> (FailureReporter, Receiver<LinkFailure>) {
    let (tx, rx) = bounded(workers.max(1) * 4);
    (FailureReporter { tx }, rx)
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    connector: Arc<dyn Connector>,
    shared: Arc<SharedState>,
    slots: Arc<Vec<LinkSlot>>,
    failures: Receiver<LinkFailure>,
    shutdown: Shutdown,
    policy: BackoffPolicy,
    health_interval: Duration,
    next_probe: Instant,
    attempt: u32,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        shared: Arc<SharedState>,
        slots: Arc<Vec<LinkSlot>>,
        failures: Receiver<LinkFailure>,
        shutdown: Shutdown,
        settings: &SupervisorSettings,
    ) -> Self {
        Self {
            connector,
            shared,
            slots,
            failures,
            shutdown,
            policy: BackoffPolicy::new(
                settings.effective_initial_backoff(),
                settings.effective_max_backoff(),
                settings.effective_jitter_factor(),
            ),
            health_interval: settings.effective_health_interval(),
            next_probe: Instant::now(),
            attempt: 0,
        }
    }

    /// First connection attempt, on the starting thread. Failure is logged
    /// and left to [`Supervisor::run`] to retry.
    pub fn connect_initial(&mut self) -> bool {
        match self.try_connect() {
            Ok(()) => true,
            Err(e) => {
                warn!("[supervisor] initial connect to {} failed: {e}", self.connector.describe());
                self.shared.set(ConnectionState::Disconnected);
                self.attempt = 1;
                false
            }
        }
    }

    /// Supervisor loop. Returns after its stop flag is raised, with all links
    /// torn down and the state `Disconnected`. The pipeline raises that flag
    /// only once every worker has finished its shutdown flush, so links stay
    /// installed for the flush.
    pub fn run(mut self) {
        info!("[supervisor] started, target {}", self.connector.describe());
        while !self.shutdown.is_requested() {
            match self.shared.get() {
                ConnectionState::Ready => self.watch(),
                ConnectionState::Degraded => {
                    self.teardown();
                    self.shared.set(ConnectionState::Disconnected);
                }
                ConnectionState::Disconnected | ConnectionState::Connecting => self.reconnect(),
            }
        }
        self.teardown();
        self.shared.set(ConnectionState::Disconnected);
        info!("[supervisor] stopped");
    }

    /// While `Ready`: wait for a failure report, probing health when due.
    fn watch(&mut self) {
        let wait = self.next_probe.saturating_duration_since(Instant::now()).min(POLL_INTERVAL);
        match self.failures.recv_timeout(wait) {
            Ok(f) => {
                if f.generation == self.shared.generation() {
                    warn!("[supervisor] worker {} reported: {}", f.worker, f.error);
                    self.shared.set(ConnectionState::Degraded);
                } else {
                    debug!("[supervisor] ignoring stale report from worker {}", f.worker);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if Instant::now() < self.next_probe {
                    return;
                }
                self.next_probe = Instant::now() + self.health_interval;
                if let Err(e) = self.probe() {
                    warn!("[supervisor] health probe failed: {e}");
                    self.shared.set(ConnectionState::Degraded);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.shutdown.sleep(wait.max(Duration::from_millis(1)));
            }
        }
    }

    fn reconnect(&mut self) {
        match self.try_connect() {
            Ok(()) => {
                info!("[supervisor] connected after {} attempt(s)", self.attempt + 1);
                self.attempt = 0;
            }
            Err(e) => {
                self.shared.set(ConnectionState::Disconnected);
                let delay = self.policy.delay(self.attempt);
                self.attempt = self.attempt.saturating_add(1);
                warn!("[supervisor] connect failed: {e}, retrying in {delay:?}");
                self.shutdown.sleep(delay);
            }
        }
    }

    /// Open a link per worker and install them all, or none.
    fn try_connect(&mut self) -> Result<(), BridgeError> {
        self.shared.set(ConnectionState::Connecting);
        let mut links = Vec::with_capacity(self.slots.len());
        for _ in 0..self.slots.len() {
            links.push(self.connector.connect()?);
        }
        for (slot, link) in self.slots.iter().zip(links) {
            let mut guard = slot
                .lock_for(SLOT_LOCK_TIMEOUT)
                .ok_or_else(|| BridgeError::TransientIo("link slot busy".into()))?;
            *guard = Some(link);
        }
        // Reports from before this point refer to links just replaced.
        while self.failures.try_recv().is_ok() {}
        self.shared.set(ConnectionState::Ready);
        self.next_probe = Instant::now() + self.health_interval;
        Ok(())
    }

    /// Ping through the first slot not currently in use by its worker.
    fn probe(&self) -> Result<(), BridgeError> {
        for slot in self.slots.iter() {
            if let Some(mut guard) = slot.lock_for(Duration::ZERO) {
                return match guard.as_mut() {
                    Some(link) => link.ping(),
                    None => Err(BridgeError::TransientIo("link missing while ready".into())),
                };
            }
        }
        // Every worker is mid-write.
        Ok(())
    }

    fn teardown(&self) {
        for slot in self.slots.iter() {
            if let Some(mut guard) = slot.lock_for(SLOT_LOCK_TIMEOUT) {
                guard.take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryConnector;

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            initial_backoff_ms: Some(5),
            max_backoff_ms: Some(20),
            jitter_factor: Some(0.0),
            health_interval_ms: Some(10),
        }
    }

    struct Harness {
        mem: MemoryConnector,
        shared: Arc<SharedState>,
        slots: Arc<Vec<LinkSlot>>,
        reporter: FailureReporter,
        shutdown: Shutdown,
        supervisor: Supervisor,
    }

    fn harness(workers: usize) -> Harness {
        let mem = MemoryConnector::new();
        let shared = Arc::new(SharedState::new());
        let slots: Arc<Vec<LinkSlot>> = Arc::new((0..workers).map(|_| LinkSlot::new()).collect());
        let (reporter, rx) = failure_channel(workers);
        let shutdown = Shutdown::new();
        let supervisor = Supervisor::new(
            Arc::new(mem.clone()),
            shared.clone(),
            slots.clone(),
            rx,
            shutdown.clone(),
            &settings(),
        );
        Harness { mem, shared, slots, reporter, shutdown, supervisor }
    }

    fn wait_for(shared: &SharedState, want: ConnectionState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if shared.get() == want {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn initial_connect_fills_every_slot() {
        let mut h = harness(3);
        assert!(h.supervisor.connect_initial());
        assert!(h.shared.is_ready());
        assert_eq!(h.shared.generation(), 1);
        assert_eq!(h.mem.connects(), 3);
        for slot in h.slots.iter() {
            assert!(slot.lock_for(Duration::ZERO).unwrap().is_some());
        }
    }

    #[test]
    fn initial_failure_is_not_fatal() {
        let mut h = harness(1);
        h.mem.set_outage(true);
        assert!(!h.supervisor.connect_initial());
        assert_eq!(h.shared.get(), ConnectionState::Disconnected);

        let shared = h.shared.clone();
        let handle = std::thread::spawn(move || h.supervisor.run());
        std::thread::sleep(Duration::from_millis(30));
        assert!(!shared.is_ready());
        h.mem.set_outage(false);
        assert!(wait_for(&shared, ConnectionState::Ready));
        h.shutdown.request();
        handle.join().unwrap();
        assert!(h.slots[0].lock_for(Duration::ZERO).unwrap().is_none());
        assert_eq!(shared.get(), ConnectionState::Disconnected);
    }

    #[test]
    fn stop_tears_down_and_reports_disconnected() {
        let mut h = harness(2);
        assert!(h.supervisor.connect_initial());
        let shared = h.shared.clone();
        let handle = std::thread::spawn(move || h.supervisor.run());
        std::thread::sleep(Duration::from_millis(20));
        assert!(shared.is_ready());
        h.shutdown.request();
        handle.join().unwrap();
        assert_eq!(shared.get(), ConnectionState::Disconnected);
        for slot in h.slots.iter() {
            assert!(slot.lock_for(Duration::ZERO).unwrap().is_none());
        }
    }

    #[test]
    fn reported_failure_triggers_reconnect() {
        let mut h = harness(2);
        assert!(h.supervisor.connect_initial());
        let shared = h.shared.clone();
        let mem = h.mem.clone();
        let handle = std::thread::spawn(move || h.supervisor.run());

        mem.set_outage(true);
        h.reporter.report(0, shared.generation(), &BridgeError::TransientIo("reset".into()));
        assert!(wait_for(&shared, ConnectionState::Disconnected));
        mem.set_outage(false);
        assert!(wait_for(&shared, ConnectionState::Ready));
        assert!(shared.generation() >= 2);
        assert!(mem.connects() >= 4);

        h.shutdown.request();
        handle.join().unwrap();
    }

    #[test]
    fn stale_report_is_ignored() {
        let mut h = harness(1);
        assert!(h.supervisor.connect_initial());
        let shared = h.shared.clone();
        let handle = std::thread::spawn(move || h.supervisor.run());
        h.reporter.report(0, 0, &BridgeError::TransientIo("old".into()));
        std::thread::sleep(Duration::from_millis(40));
        assert!(shared.is_ready());
        assert_eq!(shared.generation(), 1);
        h.shutdown.request();
        handle.join().unwrap();
    }

    #[test]
    fn health_probe_detects_outage() {
        let mut h = harness(1);
        assert!(h.supervisor.connect_initial());
        let shared = h.shared.clone();
        let handle = std::thread::spawn(move || h.supervisor.run());
        h.mem.set_outage(true);
        assert!(wait_for(&shared, ConnectionState::Disconnected));
        h.shutdown.request();
        handle.join().unwrap();
    }

    #[test]
    fn history_keeps_the_latest_changes() {
        let shared = SharedState::new();
        shared.set(ConnectionState::Connecting);
        shared.set(ConnectionState::Ready);
        shared.set(ConnectionState::Ready);
        shared.set(ConnectionState::Degraded);
        assert_eq!(
            shared.recent_transitions(),
            vec![ConnectionState::Connecting, ConnectionState::Ready, ConnectionState::Degraded]
        );
        for _ in 0..HISTORY_LEN {
            shared.set(ConnectionState::Disconnected);
            shared.set(ConnectionState::Connecting);
        }
        let history = shared.recent_transitions();
        assert_eq!(history.len(), HISTORY_LEN);
        assert_eq!(history.last(), Some(&ConnectionState::Connecting));
    }

    #[test]
    fn wait_ready_times_out_then_wakes() {
        let shared = Arc::new(SharedState::new());
        assert!(!shared.wait_ready(Duration::from_millis(5)));
        let s2 = shared.clone();
        let waiter = std::thread::spawn(move || s2.wait_ready(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        shared.set(ConnectionState::Ready);
        assert!(waiter.join().unwrap());
    }
}
