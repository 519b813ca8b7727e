//! Event serialization and destination naming.
//!
//! Everything here is pure: the same event and settings always produce the
//! same bytes and the same key, so a retried publish writes exactly what the
//! first attempt would have.
//!
//! Price fields are converted to [`Decimal`], rounded half-even to the
//! configured precision, and emitted as fixed-scale JSON strings. Sizes are
//! emitted as normalized decimal strings. Decoding a payload therefore yields
//! exact values, never binary-float drift.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde_json::{Map, Value, json};
use twsb_core::config::OutboundSettings;
use twsb_core::time_util::format_iso8601_ms;
use twsb_core::{BridgeError, Event, EventPayload, SourceId, TickData};

use crate::snapshot::InstrumentSnapshot;

/// Redis key or channel for an event, including the configured prefix.
///
/// Ticks go to `md:<symbol>`; order status and executions share
/// `orders:<order_id>` so a single stream carries an order's full history;
/// account values go to `account:<account>`.
pub fn destination(source: &SourceId, outbound: &OutboundSettings) -> String {
    let prefix = outbound.effective_key_prefix();
    match source {
        SourceId::Instrument(symbol) => format!("{prefix}md:{symbol}"),
        SourceId::Order(order_id) => format!("{prefix}orders:{order_id}"),
        SourceId::Account(account) => format!("{prefix}account:{account}"),
    }
}

/// Snapshot channel for a symbol, or `None` when snapshots are disabled.
pub fn snapshot_channel(symbol: &str, outbound: &OutboundSettings) -> Option<String> {
    outbound
        .snapshot_channel_prefix()
        .map(|p| format!("{}{p}{symbol}", outbound.effective_key_prefix()))
}

/// Round a price to `precision` places, as a fixed-scale decimal.
pub fn price(field: &str, v: f64, precision: u32) -> Result<Decimal, BridgeError> {
    let mut d = to_decimal(field, v)?.round_dp(precision);
    d.rescale(precision);
    Ok(d)
}

/// A size or quantity, normalized (no trailing zeros).
pub fn quantity(field: &str, v: f64) -> Result<Decimal, BridgeError> {
    Ok(to_decimal(field, v)?.normalize())
}

fn to_decimal(field: &str, v: f64) -> Result<Decimal, BridgeError> {
    if !v.is_finite() {
        return Err(BridgeError::Encoding(format!("{field} is not a finite number")));
    }
    Decimal::from_f64(v)
        .ok_or_else(|| BridgeError::Encoding(format!("{field}={v} is out of decimal range")))
}

fn require<'a>(field: &str, v: &'a str) -> Result<&'a str, BridgeError> {
    if v.is_empty() {
        Err(BridgeError::Encoding(format!("{field} is empty")))
    } else {
        Ok(v)
    }
}

#[inline]
fn dec(d: Decimal) -> Value {
    Value::String(d.to_string())
}

/// Encode an event as a JSON document.
pub fn encode_event(event: &Event, precision: u32) -> Result<String, BridgeError> {
    let mut obj = Map::new();
    obj.insert("seq".into(), json!(event.seq()));
    obj.insert("type".into(), json!(event.kind().as_str()));
    obj.insert("source".into(), json!(event.source().to_string()));
    obj.insert(
        "ingested_at".into(),
        json!(format_iso8601_ms(event.ingested_at_ms() as i64)),
    );

    match event.payload() {
        EventPayload::Tick(t) => {
            obj.insert("tick_type".into(), json!(t.kind().as_str()));
            obj.insert("ticker_id".into(), json!(t.ticker_id));
            obj.insert("symbol".into(), json!(require("symbol", &t.symbol)?));
            obj.insert("time".into(), json!(t.exchange_time_ms));
            match &t.data {
                TickData::BidAsk { bid_price, ask_price, bid_size, ask_size } => {
                    obj.insert("bid".into(), dec(price("bid", *bid_price, precision)?));
                    obj.insert("ask".into(), dec(price("ask", *ask_price, precision)?));
                    obj.insert("bid_size".into(), dec(quantity("bid_size", *bid_size)?));
                    obj.insert("ask_size".into(), dec(quantity("ask_size", *ask_size)?));
                }
                TickData::AllLast { price: last, size, past_limit, exchange } => {
                    obj.insert("price".into(), dec(price("price", *last, precision)?));
                    obj.insert("size".into(), dec(quantity("size", *size)?));
                    obj.insert("past_limit".into(), json!(past_limit));
                    obj.insert("exchange".into(), json!(exchange));
                }
            }
        }
        EventPayload::OrderStatus(o) => {
            obj.insert("order_id".into(), json!(o.order_id));
            obj.insert("status".into(), json!(o.status.as_str()));
            obj.insert("filled".into(), dec(quantity("filled", o.filled)?));
            obj.insert("remaining".into(), dec(quantity("remaining", o.remaining)?));
            obj.insert(
                "avg_fill_price".into(),
                dec(price("avg_fill_price", o.avg_fill_price, precision)?),
            );
            obj.insert(
                "last_fill_price".into(),
                dec(price("last_fill_price", o.last_fill_price, precision)?),
            );
            obj.insert("perm_id".into(), json!(o.perm_id));
            obj.insert("parent_id".into(), json!(o.parent_id));
            obj.insert("client_id".into(), json!(o.client_id));
            obj.insert("why_held".into(), json!(o.why_held));
        }
        EventPayload::Execution(x) => {
            obj.insert("order_id".into(), json!(x.order_id));
            obj.insert("exec_id".into(), json!(require("exec_id", &x.exec_id)?));
            obj.insert("symbol".into(), json!(require("symbol", &x.symbol)?));
            obj.insert("side".into(), json!(x.side.as_str()));
            obj.insert("shares".into(), dec(quantity("shares", x.shares)?));
            obj.insert("price".into(), dec(price("price", x.price, precision)?));
            obj.insert("cum_qty".into(), dec(quantity("cum_qty", x.cum_qty)?));
            obj.insert("avg_price".into(), dec(price("avg_price", x.avg_price, precision)?));
            obj.insert("exchange".into(), json!(x.exchange));
            obj.insert("time".into(), json!(x.exec_time_ms));
        }
        EventPayload::AccountUpdate(a) => {
            obj.insert("account".into(), json!(require("account", &a.account)?));
            obj.insert("key".into(), json!(require("key", &a.key)?));
            obj.insert("value".into(), json!(a.value));
            obj.insert("currency".into(), json!(a.currency));
        }
    }

    serde_json::to_string(&Value::Object(obj)).map_err(|e| BridgeError::Encoding(e.to_string()))
}

/// Encode a combined instrument snapshot.
pub fn encode_snapshot(s: &InstrumentSnapshot, precision: u32) -> Result<String, BridgeError> {
    let doc = json!({
        "instrument": require("instrument", &s.symbol)?,
        "conId": s.con_id,
        "timestamp": s.latest_time_ms(),
        "price": {
            "bid": dec(price("bid", s.bid_price, precision)?),
            "ask": dec(price("ask", s.ask_price, precision)?),
            "last": dec(price("last", s.last_price, precision)?),
        },
        "size": {
            "bid": dec(quantity("bid_size", s.bid_size)?),
            "ask": dec(quantity("ask_size", s.ask_size)?),
            "last": dec(quantity("last_size", s.last_size)?),
        },
        "timestamps": {
            "quote": s.quote_time_ms,
            "trade": s.trade_time_ms,
        },
        "exchange": s.exchange,
        "tickAttrib": {
            "pastLimit": s.past_limit,
        },
    });
    serde_json::to_string(&doc).map_err(|e| BridgeError::Encoding(e.to_string()))
}
