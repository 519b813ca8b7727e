//! In-process sink.
//!
//! Records every acknowledged op in application order. Failures can be
//! injected per call or as a sustained outage, which lets the full
//! supervisor/worker recovery path run without a Redis server.
//!
//! The [`MemoryConnector::logging`] variant used for dry runs logs ops and
//! only counts them, so a long-running dry run holds no history.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;
use twsb_core::BridgeError;

use super::{Connector, RedisLink, WriteOp};

#[derive(Default)]
struct Inner {
    ops: Mutex<Vec<WriteOp>>,
    outage: AtomicBool,
    fail_connects: AtomicU32,
    fail_applies: AtomicU32,
    connects: AtomicU64,
    applies: AtomicU64,
    acknowledged: AtomicU64,
    log_ops: bool,
}

/// Take one unit from a countdown, returning whether one was available.
fn consume(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Cloneable handle; all clones and the links they open share one store.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector that logs every applied op at debug level instead of
    /// keeping it. [`MemoryConnector::ops`] stays empty.
    pub fn logging() -> Self {
        Self { inner: Arc::new(Inner { log_ops: true, ..Default::default() }) }
    }

    /// While set, connects, pings and applies all fail.
    pub fn set_outage(&self, down: bool) {
        self.inner.outage.store(down, Ordering::Release);
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.inner.fail_connects.store(n, Ordering::Release);
    }

    pub fn fail_next_applies(&self, n: u32) {
        self.inner.fail_applies.store(n, Ordering::Release);
    }

    /// All acknowledged ops so far.
    pub fn ops(&self) -> Vec<WriteOp> {
        self.inner.ops.lock().clone()
    }

    /// Acknowledged ops targeting one key or channel.
    pub fn ops_for(&self, target: &str) -> Vec<WriteOp> {
        self.inner.ops.lock().iter().filter(|o| o.target() == target).cloned().collect()
    }

    /// Successful connects.
    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::Acquire)
    }

    /// Apply calls, successful or not.
    pub fn applies(&self) -> u64 {
        self.inner.applies.load(Ordering::Acquire)
    }

    /// Ops acknowledged so far, recorded or not.
    pub fn acknowledged(&self) -> u64 {
        self.inner.acknowledged.load(Ordering::Acquire)
    }

    fn is_down(&self) -> bool {
        self.inner.outage.load(Ordering::Acquire)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> Result<Box<dyn RedisLink>, BridgeError> {
        if self.is_down() || consume(&self.inner.fail_connects) {
            return Err(BridgeError::TransientIo("connection refused".into()));
        }
        self.inner.connects.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryLink { sink: self.clone() }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

struct MemoryLink {
    sink: MemoryConnector,
}

impl RedisLink for MemoryLink {
    fn ping(&mut self) -> Result<(), BridgeError> {
        if self.sink.is_down() {
            return Err(BridgeError::TransientIo("ping: connection reset".into()));
        }
        Ok(())
    }

    fn apply(&mut self, ops: &[WriteOp]) -> Result<(), BridgeError> {
        let inner = &self.sink.inner;
        inner.applies.fetch_add(1, Ordering::AcqRel);
        if self.sink.is_down() || consume(&inner.fail_applies) {
            return Err(BridgeError::TransientIo("write: connection reset".into()));
        }
        inner.acknowledged.fetch_add(ops.len() as u64, Ordering::AcqRel);
        if inner.log_ops {
            for op in ops {
                debug!("[memory] {} {}", op.target(), op.payload());
            }
        } else {
            inner.ops.lock().extend_from_slice(ops);
        }
        Ok(())
    }
}
