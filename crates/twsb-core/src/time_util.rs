//! Wall-clock time utilities.
//!
//! Ingestion timestamps are milliseconds since the Unix epoch. Elapsed-time
//! measurements (latency, backoff deadlines) use `std::time::Instant` instead
//! so they are immune to wall-clock jumps.

use chrono::{DateTime, Utc};

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Format a millisecond Unix timestamp as ISO-8601 UTC, e.g.
/// `2023-11-14T22:13:20.500Z`.
///
/// Out-of-range inputs format as the epoch.
pub fn format_iso8601_ms(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}
