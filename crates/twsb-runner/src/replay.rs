//! JSON-lines replay feed.
//!
//! Stands in for the broker API's callback thread: each line is one callback
//! and is dispatched to the [`IngestAdapter`] entry point of the same name.
//!
//! ```text
//! {"type":"bid_ask","req_id":1001,"time":1700000000,"bid":171.55,"ask":171.57,"bid_size":100,"ask_size":200}
//! {"type":"last","req_id":11001,"time":1700000001,"price":171.56,"size":50,"exchange":"NASDAQ"}
//! {"type":"order_status","order_id":42,"status":"Filled","filled":100,"remaining":0,"avg_fill_price":171.55}
//! {"type":"execution","order_id":42,"exec_id":"e1","symbol":"AAPL","side":"BOT","shares":100,"price":171.55}
//! {"type":"account","account":"DU1","key":"NetLiquidation","value":"100000","currency":"USD"}
//! {"type":"error","id":-1,"code":2104,"message":"Market data farm connection is OK"}
//! {"type":"closed"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{info, warn};
use twsb_bridge::{IngestAdapter, IngestOutcome};
use twsb_core::{RawAccountValue, RawBidAsk, RawExecution, RawLast, RawOrderStatus};

use crate::json_util::{bool_field, f64_field, i32_field, i64_field, str_field};

/// One decoded feed line.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedRecord {
    BidAsk(RawBidAsk),
    Last(RawLast),
    OrderStatus(RawOrderStatus),
    Execution(RawExecution),
    Account(RawAccountValue),
    BrokerError { id: i32, code: i32, message: String },
    Closed,
}

/// Decode a line. `Ok(None)` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<FeedRecord>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let v: Value = serde_json::from_str(line).context("invalid JSON")?;
    let kind = v.get("type").and_then(Value::as_str).unwrap_or_default();

    let record = match kind {
        "bid_ask" => FeedRecord::BidAsk(RawBidAsk {
            req_id: i32_field(&v, "req_id"),
            time: i64_field(&v, "time"),
            bid_price: f64_field(&v, "bid"),
            ask_price: f64_field(&v, "ask"),
            bid_size: f64_field(&v, "bid_size"),
            ask_size: f64_field(&v, "ask_size"),
        }),
        "last" => FeedRecord::Last(RawLast {
            req_id: i32_field(&v, "req_id"),
            time: i64_field(&v, "time"),
            price: f64_field(&v, "price"),
            size: f64_field(&v, "size"),
            past_limit: bool_field(&v, "past_limit"),
            exchange: str_field(&v, "exchange"),
        }),
        "order_status" => FeedRecord::OrderStatus(RawOrderStatus {
            order_id: i64_field(&v, "order_id"),
            status: str_field(&v, "status"),
            filled: f64_field(&v, "filled"),
            remaining: f64_field(&v, "remaining"),
            avg_fill_price: f64_field(&v, "avg_fill_price"),
            perm_id: i64_field(&v, "perm_id"),
            parent_id: i64_field(&v, "parent_id"),
            last_fill_price: f64_field(&v, "last_fill_price"),
            client_id: i32_field(&v, "client_id"),
            why_held: str_field(&v, "why_held"),
        }),
        "execution" => FeedRecord::Execution(RawExecution {
            order_id: i64_field(&v, "order_id"),
            exec_id: str_field(&v, "exec_id"),
            symbol: str_field(&v, "symbol"),
            side: str_field(&v, "side"),
            shares: f64_field(&v, "shares"),
            price: f64_field(&v, "price"),
            cum_qty: f64_field(&v, "cum_qty"),
            avg_price: f64_field(&v, "avg_price"),
            exchange: str_field(&v, "exchange"),
            time_ms: i64_field(&v, "time_ms"),
        }),
        "account" => FeedRecord::Account(RawAccountValue {
            account: str_field(&v, "account"),
            key: str_field(&v, "key"),
            value: str_field(&v, "value"),
            currency: str_field(&v, "currency"),
        }),
        "error" => FeedRecord::BrokerError {
            id: i32_field(&v, "id"),
            code: i32_field(&v, "code"),
            message: str_field(&v, "message"),
        },
        "closed" => FeedRecord::Closed,
        "" => bail!("missing \"type\""),
        other => bail!("unknown record type '{other}'"),
    };
    Ok(Some(record))
}

/// Hand one record to the adapter. Notices return `None`.
pub fn dispatch(adapter: &mut IngestAdapter, record: &FeedRecord) -> Option<IngestOutcome> {
    match record {
        FeedRecord::BidAsk(r) => Some(adapter.on_tick_bid_ask(r)),
        FeedRecord::Last(r) => Some(adapter.on_tick_last(r)),
        FeedRecord::OrderStatus(r) => Some(adapter.on_order_status(r)),
        FeedRecord::Execution(r) => Some(adapter.on_execution(r)),
        FeedRecord::Account(r) => Some(adapter.on_account_value(r)),
        FeedRecord::BrokerError { id, code, message } => {
            adapter.on_broker_error(*id, *code, message);
            None
        }
        FeedRecord::Closed => {
            adapter.on_connection_closed();
            None
        }
    }
}

/// Per-feed totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub lines: u64,
    pub malformed: u64,
    pub enqueued: u64,
    pub coalesced: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub notices: u64,
}

impl FeedSummary {
    fn count(&mut self, outcome: Option<IngestOutcome>) {
        match outcome {
            Some(IngestOutcome::Enqueued) => self.enqueued += 1,
            Some(IngestOutcome::Coalesced) => self.coalesced += 1,
            Some(IngestOutcome::Dropped) => self.dropped += 1,
            Some(IngestOutcome::Rejected) => self.rejected += 1,
            None => self.notices += 1,
        }
    }
}

/// Replay every line of `reader` until EOF, a `closed` record, or `stop`.
pub fn run_feed<R: BufRead>(reader: R, adapter: &mut IngestAdapter, stop: &AtomicBool) -> FeedSummary {
    let mut summary = FeedSummary::default();
    for (idx, line) in reader.lines().enumerate() {
        if stop.load(Ordering::Acquire) {
            info!("[feed] stop requested after {} line(s)", summary.lines);
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("[feed] read error at line {}: {e}", idx + 1);
                break;
            }
        };
        summary.lines += 1;
        match parse_line(&line) {
            Ok(Some(record)) => {
                let closed = record == FeedRecord::Closed;
                summary.count(dispatch(adapter, &record));
                if closed {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                summary.malformed += 1;
                warn!("[feed] line {}: {e:#}", idx + 1);
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use twsb_bridge::{Bridge, MemoryConnector};
    use twsb_core::UNSET_DOUBLE;
    use twsb_core::config::{BridgeConfig, QueueSettings, Subscription};

    use super::*;

    #[test]
    fn parses_each_record_type() {
        let ba = parse_line(r#"{"type":"bid_ask","req_id":1001,"time":1700000000,"bid":"171.55","ask":171.57,"bid_size":100,"ask_size":200}"#)
            .unwrap()
            .unwrap();
        match ba {
            FeedRecord::BidAsk(r) => {
                assert_eq!(r.req_id, 1001);
                assert_eq!(r.bid_price, 171.55);
                assert_eq!(r.ask_size, 200.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse_line(r#"{"type":"error","id":-1,"code":2104,"message":"ok"}"#).unwrap(),
            Some(FeedRecord::BrokerError { code: 2104, .. })
        ));
        assert_eq!(parse_line(r#"{"type":"closed"}"#).unwrap(), Some(FeedRecord::Closed));
    }

    #[test]
    fn missing_price_becomes_unset() {
        let rec = parse_line(r#"{"type":"last","req_id":1,"time":1,"size":5}"#).unwrap().unwrap();
        match rec {
            FeedRecord::Last(r) => assert_eq!(r.price, UNSET_DOUBLE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn skips_blank_and_comments_rejects_garbage() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("# recorded 2024-03-01").unwrap(), None);
        assert!(parse_line("{not json").is_err());
        assert!(parse_line(r#"{"type":"bars"}"#).is_err());
        assert!(parse_line(r#"{"req_id":1}"#).is_err());
    }

    #[test]
    fn feed_drives_adapter() {
        let cfg = BridgeConfig {
            queue: QueueSettings { capacity: Some(64), dequeue_timeout_ms: Some(5), ..Default::default() },
            subscriptions: vec![Subscription {
                symbol: "AAPL".into(),
                ticker_ids: vec![1001],
                con_id: None,
                exchange: None,
            }],
            ..Default::default()
        };
        let mem = MemoryConnector::new();
        let (bridge, mut adapter) = Bridge::start(&cfg, Arc::new(mem.clone())).unwrap();

        let feed = concat!(
            "# sample\n",
            r#"{"type":"bid_ask","req_id":1001,"time":1,"bid":1.0,"ask":1.1,"bid_size":1,"ask_size":1}"#, "\n",
            r#"{"type":"bid_ask","req_id":9,"time":1,"bid":1.0,"ask":1.1,"bid_size":1,"ask_size":1}"#, "\n",
            "garbage\n",
            r#"{"type":"error","id":-1,"code":2106,"message":"HMDS ok"}"#, "\n",
            r#"{"type":"closed"}"#, "\n",
            r#"{"type":"account","account":"DU1","key":"k","value":"1","currency":"USD"}"#, "\n",
        );
        let stop = AtomicBool::new(false);
        let summary = run_feed(Cursor::new(feed), &mut adapter, &stop);
        assert_eq!(summary.lines, 6);
        assert_eq!(summary.enqueued, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.notices, 2);

        let s = bridge.shutdown();
        assert_eq!(s.ingested, 1);
        assert_eq!(s.rejected, 1);
    }

    #[test]
    fn stop_flag_halts_replay() {
        let cfg = BridgeConfig::default();
        let (bridge, mut adapter) = Bridge::start(&cfg, Arc::new(MemoryConnector::new())).unwrap();
        let stop = AtomicBool::new(true);
        let summary = run_feed(Cursor::new("{\"type\":\"closed\"}\n"), &mut adapter, &stop);
        assert_eq!(summary.lines, 0);
        bridge.shutdown();
    }
}
