//! # twsb-bridge
//!
//! The ingestion-to-publication pipeline between the broker API's callback
//! thread and Redis.
//!
//! ## Architecture
//!
//! ```text
//! broker callback thread            publisher threads (one per lane)        supervisor thread
//! ──────────────────────            ────────────────────────────────        ─────────────────
//! IngestAdapter                      PublisherWorker                         Supervisor
//!   validate → sequence → route ──►  RelayQueue lane ──► serialize ──► Redis ◄── owns links,
//!   (never blocks)                   (bounded waits, retry budget)             drives reconnect
//! ```
//!
//! - [`ingest`]: non-blocking broker callback entry points
//! - [`sequencer`]: per-source sequence numbers
//! - [`relay`]: bounded lane-partitioned relay queue with tick coalescing
//! - [`serializer`]: pure event → JSON + destination key
//! - [`snapshot`]: combined per-instrument quote/trade state
//! - [`sink`]: Redis write plans, link/connector traits, Redis and in-memory sinks
//! - [`supervisor`]: connection state arbitration and reconnect with backoff
//! - [`publisher`]: worker state machine with retry budget
//! - [`pipeline`]: assembly and lifecycle ([`Bridge`])

pub mod backoff;
pub mod ingest;
pub mod pipeline;
pub mod publisher;
pub mod relay;
pub mod sequencer;
pub mod serializer;
pub mod shutdown;
pub mod sink;
pub mod snapshot;
pub mod supervisor;

pub use ingest::{IngestAdapter, IngestOutcome};
pub use pipeline::Bridge;
pub use sink::{Connector, MemoryConnector, RedisConnector, RedisLink, WriteOp};
