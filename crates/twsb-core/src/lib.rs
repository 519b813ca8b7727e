//! # twsb-core
//!
//! Core crate for the TWS-to-Redis bridge, providing:
//!
//! - **Types** (`types`): source identities, broker event payloads, raw callback inputs
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): the bridge error taxonomy via thiserror
//! - **Stats** (`stats`): lock-free counters and connection-state gauge
//! - **Latency** (`latency`): histogram of ingest-to-publish delay
//! - **CPU affinity** (`cpu_affinity`): thread-to-core pinning for publisher threads
//! - **Time utilities** (`time_util`): wall-clock timestamps and ISO-8601 formatting
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod latency;
pub mod logging;
pub mod stats;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use error::BridgeError;
pub use types::*;
