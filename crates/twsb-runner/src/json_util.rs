//! Field accessors for replay records.
//!
//! Numbers may be written as JSON numbers or as strings (`"171.55"`), the
//! way broker tooling often dumps them. Absent or unparseable doubles come
//! back as the broker's unset sentinel so validation downstream treats them
//! exactly like a live callback with a missing value.

use serde_json::Value;
use twsb_core::UNSET_DOUBLE;

/// Parse a JSON value (string or number) as `f64`.
#[inline]
pub fn parse_str_f64(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse(s).ok()
    } else {
        v.as_f64()
    }
}

/// Parse a JSON value (string or number) as `i64`.
#[inline]
pub fn parse_str_i64(v: Option<&Value>) -> Option<i64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        s.trim().parse().ok()
    } else {
        v.as_i64()
    }
}

/// Double field, or [`UNSET_DOUBLE`] when missing.
#[inline]
pub fn f64_field(v: &Value, key: &str) -> f64 {
    parse_str_f64(v.get(key)).unwrap_or(UNSET_DOUBLE)
}

/// Integer field, or `0` when missing.
#[inline]
pub fn i64_field(v: &Value, key: &str) -> i64 {
    parse_str_i64(v.get(key)).unwrap_or(0)
}

/// 32-bit integer field, or `0` when missing or out of range.
#[inline]
pub fn i32_field(v: &Value, key: &str) -> i32 {
    i32::try_from(i64_field(v, key)).unwrap_or(0)
}

/// String field, or `""` when missing. Numbers are stringified.
pub fn str_field(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[inline]
pub fn bool_field(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}
