//! Raw broker callback arguments.
//!
//! These mirror the argument lists of the broker API callbacks after the
//! broker's own protocol library has decoded them. Nothing here is trusted:
//! the broker marks absent doubles with [`UNSET_DOUBLE`] and absent strings
//! with `""`, and the ingestion adapter rejects events whose required fields
//! carry either.

/// Sentinel the broker API uses for "no value" in double fields.
pub const UNSET_DOUBLE: f64 = f64::MAX;

/// Arguments of the tick-by-tick bid/ask callback.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBidAsk {
    pub req_id: i32,
    /// Exchange time, seconds since epoch.
    pub time: i64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_size: f64,
    pub ask_size: f64,
}

/// Arguments of the tick-by-tick last/all-last callback.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLast {
    pub req_id: i32,
    /// Exchange time, seconds since epoch.
    pub time: i64,
    pub price: f64,
    pub size: f64,
    pub past_limit: bool,
    pub exchange: String,
}

/// Arguments of the order status callback.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOrderStatus {
    pub order_id: i64,
    pub status: String,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
    pub perm_id: i64,
    pub parent_id: i64,
    pub last_fill_price: f64,
    pub client_id: i32,
    pub why_held: String,
}

/// Execution details callback, flattened from the contract and execution
/// objects the broker delivers.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExecution {
    pub order_id: i64,
    pub exec_id: String,
    pub symbol: String,
    pub side: String,
    pub shares: f64,
    pub price: f64,
    pub cum_qty: f64,
    pub avg_price: f64,
    pub exchange: String,
    /// Execution time, milliseconds since epoch.
    pub time_ms: i64,
}

/// Arguments of the account value update callback.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAccountValue {
    pub account: String,
    pub key: String,
    pub value: String,
    pub currency: String,
}

/// Whether a double field carries a usable value.
#[inline]
pub fn is_set(v: f64) -> bool {
    v.is_finite() && v != UNSET_DOUBLE
}
