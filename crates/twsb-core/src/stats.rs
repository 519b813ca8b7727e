//! Operational counters for the bridge.
//!
//! [`BridgeStats`] is shared by `Arc` between the ingestion thread, the
//! publisher workers and the supervisor. All counters are monotonically
//! increasing relaxed atomics: they are signals for logs and metrics, never
//! used for synchronization.
//!
//! Queue depth and connection state are gauges owned elsewhere (relay queue,
//! supervisor); they are sampled into [`StatsSnapshot`] when one is taken.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::ConnectionState;

/// Live counters. Cheap to update from any thread.
#[derive(Debug, Default)]
pub struct BridgeStats {
    ingested: AtomicU64,
    dropped: AtomicU64,
    coalesced: AtomicU64,
    rejected: AtomicU64,
    encode_failed: AtomicU64,
    published: AtomicU64,
    retries: AtomicU64,
    publish_failed: AtomicU64,
    shutdown_dropped: AtomicU64,
}

macro_rules! counter {
    ($incr:ident, $get:ident, $field:ident, $doc:literal) => {
        #[doc = $doc]
        #[inline]
        pub fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        #[inline]
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_ingested, ingested, ingested, "An event passed validation and was sequenced.");
    counter!(record_dropped, dropped, dropped, "An event was dropped because the relay queue was full.");
    counter!(record_coalesced, coalesced, coalesced, "A tick replaced a still-pending tick for the same instrument.");
    counter!(record_rejected, rejected, rejected, "A callback payload failed validation.");
    counter!(record_encode_failed, encode_failed, encode_failed, "An event could not be serialized.");
    counter!(record_published, published, published, "An event was written to Redis.");
    counter!(record_retry, retries, retries, "A publish attempt failed and will be retried.");
    counter!(record_publish_failed, publish_failed, publish_failed, "An event exhausted its retry budget and was lost.");
    counter!(record_shutdown_dropped, shutdown_dropped, shutdown_dropped, "An event was still queued when the grace period ended.");

    /// Copy all counters together with the current gauges.
    pub fn snapshot(&self, queue_depth: usize, connection: ConnectionState) -> StatsSnapshot {
        StatsSnapshot {
            ingested: self.ingested(),
            dropped: self.dropped(),
            coalesced: self.coalesced(),
            rejected: self.rejected(),
            encode_failed: self.encode_failed(),
            published: self.published(),
            retries: self.retries(),
            publish_failed: self.publish_failed(),
            shutdown_dropped: self.shutdown_dropped(),
            queue_depth,
            connection,
        }
    }
}

/// Point-in-time copy of the bridge's operational signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ingested: u64,
    pub dropped: u64,
    pub coalesced: u64,
    pub rejected: u64,
    pub encode_failed: u64,
    pub published: u64,
    pub retries: u64,
    pub publish_failed: u64,
    pub shutdown_dropped: u64,
    pub queue_depth: usize,
    pub connection: ConnectionState,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conn={} depth={} ingested={} published={} dropped={} coalesced={} rejected={} \
             encode_failed={} retries={} publish_failed={} shutdown_dropped={}",
            self.connection,
            self.queue_depth,
            self.ingested,
            self.published,
            self.dropped,
            self.coalesced,
            self.rejected,
            self.encode_failed,
            self.retries,
            self.publish_failed,
            self.shutdown_dropped,
        )
    }
}
