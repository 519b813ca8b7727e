//! Bounded relay queue between the ingestion thread and publisher workers.
//!
//! The queue is split into one lane per publisher worker, each a bounded
//! crossbeam array channel. Items are routed to a lane by an xxh64 hash of
//! their [`SourceId`], so every event of one source flows through exactly one
//! worker and per-source FIFO order survives a multi-worker pool.
//!
//! Capacity is one total bound, not a per-lane share: an atomic depth counter
//! admits an item only while the whole queue holds fewer than `capacity`
//! items, and each lane is sized to hold all of them. A single busy source can
//! therefore use the full queue.
//!
//! Enqueue never blocks: [`RelayQueue::try_push`] hands the item back when
//! the queue is full and the caller decides whether to coalesce or drop.
//!
//! # Coalescing
//!
//! Ticks may be enqueued as a shared [`LatestTick`] slot instead of a plain
//! event. While the slot is still queued the ingestion thread may overwrite
//! it with a newer tick for the same symbol and tick kind; the worker takes
//! whatever value is current when it dequeues.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use twsb_core::{Event, SourceId};
use xxhash_rust::xxh64::Xxh64;

/// Seed for lane routing.
const ROUTE_SEED: u64 = 0x7477_7362;

/// Stable 64-bit routing hash of a source identity.
#[inline]
pub fn route_hash(source: &SourceId) -> u64 {
    let mut h = Xxh64::new(ROUTE_SEED);
    source.hash(&mut h);
    h.finish()
}

/// Replaceable holder for the most recent queued tick of one symbol/kind.
#[derive(Debug)]
pub struct LatestTick {
    slot: Mutex<Option<Event>>,
}

impl LatestTick {
    pub fn new(event: Event) -> Arc<Self> {
        Arc::new(Self { slot: Mutex::new(Some(event)) })
    }

    /// Overwrite the pending tick. Fails (returning the event) if a worker
    /// has already taken the slot.
    pub fn replace(&self, event: Event) -> Result<(), Event> {
        let mut guard = self.slot.lock();
        match guard.as_mut() {
            Some(current) => {
                *current = event;
                Ok(())
            }
            None => Err(event),
        }
    }

    /// Take the current tick, leaving the slot spent.
    pub fn take(&self) -> Option<Event> {
        self.slot.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[derive(Debug)]
enum Body {
    Event(Event),
    Latest(Arc<LatestTick>),
}

/// One queued unit of work: an event (or coalescing slot), its precomputed
/// destination, and its enqueue instant for latency accounting.
#[derive(Debug)]
pub struct RelayItem {
    route: u64,
    destination: String,
    enqueued_at: Instant,
    body: Body,
}

impl RelayItem {
    pub fn new(event: Event, destination: String) -> Self {
        Self {
            route: route_hash(event.source()),
            destination,
            enqueued_at: Instant::now(),
            body: Body::Event(event),
        }
    }

    /// An item whose event lives in a replaceable slot. Returns the item and
    /// a handle to the slot for later coalescing.
    pub fn latest(event: Event, destination: String) -> (Self, Arc<LatestTick>) {
        let route = route_hash(event.source());
        let slot = LatestTick::new(event);
        let item = Self {
            route,
            destination,
            enqueued_at: Instant::now(),
            body: Body::Latest(slot.clone()),
        };
        (item, slot)
    }

    #[inline]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[inline]
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Consume the item, yielding its event (or the slot's current value)
    /// and its destination.
    pub fn into_parts(self) -> (Option<Event>, String) {
        let event = match self.body {
            Body::Event(e) => Some(e),
            Body::Latest(slot) => slot.take(),
        };
        (event, self.destination)
    }
}

struct Lane {
    tx: Sender<RelayItem>,
    rx: Receiver<RelayItem>,
}

/// Lane-partitioned bounded MPMC queue.
pub struct RelayQueue {
    lanes: Vec<Lane>,
    capacity: usize,
    depth: AtomicUsize,
}

impl RelayQueue {
    /// Create a queue holding at most `capacity` items in total across
    /// `lanes` lanes. Both arguments are clamped to at least 1.
    pub fn new(capacity: usize, lanes: usize) -> Self {
        let lanes = lanes.max(1);
        let capacity = capacity.max(1);
        let lanes = (0..lanes)
            .map(|_| {
                let (tx, rx) = bounded(capacity);
                Lane { tx, rx }
            })
            .collect();
        Self { lanes, capacity, depth: AtomicUsize::new(0) }
    }

    /// Reserve one unit of total capacity.
    fn admit(&self) -> bool {
        self.depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| (d < self.capacity).then_some(d + 1))
            .is_ok()
    }

    #[inline]
    fn release(&self, n: usize) {
        if n > 0 {
            self.depth.fetch_sub(n, Ordering::AcqRel);
        }
    }

    /// Lane index an item with this routing hash lands in.
    #[inline]
    pub fn lane_for(&self, route: u64) -> usize {
        (route % self.lanes.len() as u64) as usize
    }

    /// Enqueue without blocking. Returns the item if the queue is full.
    pub fn try_push(&self, item: RelayItem) -> Result<(), RelayItem> {
        if !self.admit() {
            return Err(item);
        }
        let lane = self.lane_for(item.route);
        match self.lanes[lane].tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                self.release(1);
                Err(item)
            }
        }
    }

    /// Dequeue from a lane, waiting at most `timeout`.
    pub fn pop(&self, lane: usize, timeout: Duration) -> Option<RelayItem> {
        let item = self.lanes.get(lane)?.rx.recv_timeout(timeout).ok()?;
        self.release(1);
        Some(item)
    }

    /// Dequeue from a lane without waiting.
    pub fn try_pop(&self, lane: usize) -> Option<RelayItem> {
        let item = self.lanes.get(lane)?.rx.try_recv().ok()?;
        self.release(1);
        Some(item)
    }

    /// Items currently queued across all lanes.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bound shared by all lanes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Remove everything still queued, returning how many items were removed.
    pub fn drain(&self) -> usize {
        let removed = self.lanes.iter().map(|l| l.rx.try_iter().count()).sum();
        self.release(removed);
        removed
    }
}
