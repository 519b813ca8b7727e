//! End-to-end pipeline scenarios against the in-memory sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use twsb_bridge::{Bridge, IngestAdapter, IngestOutcome, MemoryConnector, WriteOp};
use twsb_core::config::{
    BridgeConfig, PublisherSettings, QueueSettings, SupervisorSettings, Subscription,
};
use twsb_core::stats::StatsSnapshot;
use twsb_core::{ConnectionState, RawAccountValue, RawBidAsk, RawLast, RawOrderStatus};

fn config(capacity: usize, workers: usize) -> BridgeConfig {
    BridgeConfig {
        queue: QueueSettings {
            capacity: Some(capacity),
            dequeue_timeout_ms: Some(5),
            coalesce_ticks: Some(true),
        },
        publisher: PublisherSettings {
            workers: Some(workers),
            max_attempts: Some(5),
            initial_backoff_ms: Some(1),
            max_backoff_ms: Some(5),
            jitter_factor: Some(0.0),
            shutdown_grace_ms: Some(200),
            ..Default::default()
        },
        supervisor: SupervisorSettings {
            initial_backoff_ms: Some(5),
            max_backoff_ms: Some(20),
            jitter_factor: Some(0.0),
            health_interval_ms: Some(20),
        },
        subscriptions: vec![Subscription {
            symbol: "AAPL".into(),
            ticker_ids: vec![1001],
            con_id: Some(265598),
            exchange: Some("SMART".into()),
        }],
        ..Default::default()
    }
}

fn status(order_id: i64, filled: f64) -> RawOrderStatus {
    RawOrderStatus {
        order_id,
        status: if filled >= 100.0 { "Filled" } else { "Submitted" }.into(),
        filled,
        remaining: 100.0 - filled,
        avg_fill_price: 10.0,
        perm_id: order_id * 10,
        parent_id: 0,
        last_fill_price: 10.0,
        client_id: 1,
        why_held: String::new(),
    }
}

fn quote(bid: f64) -> RawBidAsk {
    RawBidAsk { req_id: 1001, time: 1_700_000_000, bid_price: bid, ask_price: bid + 0.01, bid_size: 1.0, ask_size: 1.0 }
}

fn trade(price: f64) -> RawLast {
    RawLast { req_id: 11001, time: 1_700_000_001, price, size: 10.0, past_limit: false, exchange: "NASDAQ".into() }
}

fn account(n: u32) -> RawAccountValue {
    RawAccountValue { account: "DU1".into(), key: "NetLiquidation".into(), value: n.to_string(), currency: "USD".into() }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Sequence numbers of the payloads appended to one stream, in write order.
fn stream_seqs(mem: &MemoryConnector, stream: &str) -> Vec<u64> {
    mem.ops_for(stream)
        .iter()
        .filter_map(|op| match op {
            WriteOp::Append { value, .. } => serde_json::from_str::<Value>(value).ok(),
            _ => None,
        })
        .filter_map(|v| v["seq"].as_u64())
        .collect()
}

/// Sequence numbers of the payloads SET on one key, in write order.
fn set_seqs(mem: &MemoryConnector, key: &str) -> Vec<u64> {
    mem.ops_for(key)
        .iter()
        .filter_map(|op| match op {
            WriteOp::Set { value, .. } => serde_json::from_str::<Value>(value).ok(),
            _ => None,
        })
        .filter_map(|v| v["seq"].as_u64())
        .collect()
}

/// Every ingested event ends up in exactly one terminal counter.
fn assert_conserved(s: &StatsSnapshot) {
    assert_eq!(
        s.ingested,
        s.published + s.dropped + s.coalesced + s.encode_failed + s.publish_failed + s.shutdown_dropped,
        "counters do not add up: {s}"
    );
}

fn start(cfg: &BridgeConfig, mem: &MemoryConnector) -> (Bridge, IngestAdapter) {
    Bridge::start(cfg, Arc::new(mem.clone())).unwrap()
}

#[test]
fn per_order_sequence_survives_multiple_workers() {
    let mem = MemoryConnector::new();
    let (bridge, mut adapter) = start(&config(4096, 4), &mem);

    let orders: Vec<i64> = (1..=8).collect();
    for step in 0..50 {
        for &id in &orders {
            assert_eq!(adapter.on_order_status(&status(id, step as f64)), IngestOutcome::Enqueued);
        }
    }
    wait_until("all published", || bridge.stats().published == 400);

    for &id in &orders {
        assert_eq!(stream_seqs(&mem, &format!("orders:{id}")), (1..=50).collect::<Vec<u64>>());
    }
    let s = bridge.shutdown();
    assert_eq!(s.publish_failed, 0);
    assert_conserved(&s);
}

#[test]
fn full_queue_counts_drops_and_coalesces() {
    let mem = MemoryConnector::new();
    mem.set_outage(true);
    let (bridge, mut adapter) = start(&config(4, 1), &mem);
    assert_ne!(bridge.connection_state(), ConnectionState::Ready);

    // Nothing drains while disconnected: the single lane holds 4 items.
    assert_eq!(adapter.on_tick_bid_ask(&quote(1.0)), IngestOutcome::Enqueued);
    for filled in [0.0, 10.0, 20.0] {
        assert_eq!(adapter.on_order_status(&status(7, filled)), IngestOutcome::Enqueued);
    }
    assert_eq!(bridge.queue_depth(), 4);
    assert_eq!(adapter.on_order_status(&status(7, 30.0)), IngestOutcome::Dropped);
    assert_eq!(adapter.on_tick_bid_ask(&quote(2.0)), IngestOutcome::Coalesced);
    assert_eq!(adapter.on_tick_bid_ask(&quote(3.0)), IngestOutcome::Coalesced);

    let s = bridge.stats();
    assert_eq!(s.dropped, 1);
    assert_eq!(s.coalesced, 2);
    assert_eq!(s.queue_depth, 4);

    // Recover: the coalesced tick carries the latest quote, orders arrive in order.
    mem.set_outage(false);
    wait_until("drained", || bridge.stats().published == 4);
    assert_eq!(stream_seqs(&mem, "orders:7"), vec![1, 2, 3]);
    let md = mem.ops_for("md:AAPL");
    let tick = match &md[0] {
        WriteOp::Set { value, .. } => serde_json::from_str::<Value>(value).unwrap(),
        other => panic!("unexpected op {other:?}"),
    };
    assert_eq!(tick["seq"], 3);
    assert_eq!(tick["bid"], "3.000000");

    let s = bridge.shutdown();
    assert_conserved(&s);
}

#[test]
fn outage_degrades_then_recovers_in_order() {
    let mem = MemoryConnector::new();
    let (bridge, mut adapter) = start(&config(256, 2), &mem);
    assert_eq!(bridge.connection_state(), ConnectionState::Ready);

    adapter.on_order_status(&status(11, 0.0));
    wait_until("first publish", || bridge.stats().published == 1);

    mem.set_outage(true);
    for filled in 1..=20 {
        adapter.on_order_status(&status(11, filled as f64));
    }
    wait_until("connection lost", || bridge.connection_history().contains(&ConnectionState::Disconnected));
    // Events keep queueing while disconnected.
    assert!(bridge.queue_depth() > 0 || bridge.stats().retries > 0);
    assert_eq!(bridge.stats().dropped, 0);

    std::thread::sleep(Duration::from_millis(100));
    mem.set_outage(false);
    wait_until("ready again", || bridge.connection_state() == ConnectionState::Ready);
    wait_until("backlog published", || bridge.stats().published == 21);

    // Ready -> Degraded -> Disconnected, reconnect attempts, then Ready.
    let history = bridge.connection_history();
    let degraded = history
        .iter()
        .position(|s| *s == ConnectionState::Degraded)
        .unwrap_or_else(|| panic!("never degraded: {history:?}"));
    assert!(degraded > 0);
    assert_eq!(history[degraded - 1], ConnectionState::Ready);
    assert_eq!(history[degraded + 1], ConnectionState::Disconnected);
    assert_eq!(history.last(), Some(&ConnectionState::Ready));

    assert_eq!(stream_seqs(&mem, "orders:11"), (1..=21).collect::<Vec<u64>>());
    let s = bridge.shutdown();
    assert_eq!(s.publish_failed, 0);
    assert_conserved(&s);
}

#[test]
fn exhausted_budget_drops_event_once() {
    let mem = MemoryConnector::new();
    let (bridge, mut adapter) = start(&config(64, 1), &mem);

    // Writes keep failing until the first event has been given up on.
    mem.fail_next_applies(u32::MAX);
    adapter.on_order_status(&status(3, 0.0));
    wait_until("budget spent", || bridge.stats().publish_failed == 1);
    mem.fail_next_applies(0);

    adapter.on_order_status(&status(3, 50.0));
    wait_until("next event published", || bridge.stats().published == 1);

    let s = bridge.shutdown();
    assert_eq!(s.publish_failed, 1);
    assert!(s.retries >= 4);
    // The lost event is a visible gap; the stream resumes with seq 2.
    assert_eq!(stream_seqs(&mem, "orders:3"), vec![2]);
    assert_conserved(&s);
}

#[test]
fn shutdown_while_disconnected_is_bounded_and_counted() {
    let mem = MemoryConnector::new();
    mem.set_outage(true);
    let (bridge, mut adapter) = start(&config(64, 2), &mem);
    for filled in 0..10 {
        adapter.on_order_status(&status(5, filled as f64));
    }

    let started = Instant::now();
    let s = bridge.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2), "shutdown took {:?}", started.elapsed());
    assert_eq!(s.published, 0);
    assert_eq!(s.shutdown_dropped, 10);
    assert_eq!(s.queue_depth, 0);
    assert_conserved(&s);
}

#[test]
fn shutdown_flushes_backlog_when_ready() {
    let mem = MemoryConnector::new();
    let mut cfg = config(20_000, 2);
    cfg.publisher.shutdown_grace_ms = Some(10_000);
    let (bridge, mut adapter) = start(&cfg, &mem);
    assert_eq!(bridge.connection_state(), ConnectionState::Ready);

    let orders: Vec<i64> = (1..=4).collect();
    for step in 0..5_000 {
        for &id in &orders {
            assert_eq!(adapter.on_order_status(&status(id, (step % 100) as f64)), IngestOutcome::Enqueued);
        }
    }
    // Shut down with the backlog still queued.
    let s = bridge.shutdown();
    assert_eq!(s.shutdown_dropped, 0, "backlog dropped while ready: {s}");
    assert_eq!(s.published, 20_000);
    assert_eq!(s.connection, ConnectionState::Disconnected);
    for &id in &orders {
        assert_eq!(stream_seqs(&mem, &format!("orders:{id}")), (1..=5_000).collect::<Vec<u64>>());
    }
    assert_conserved(&s);
}

#[test]
fn coalesced_tick_never_overtakes_a_newer_one() {
    let mem = MemoryConnector::new();
    mem.set_outage(true);
    let mut cfg = config(2, 1);
    cfg.subscriptions[0].ticker_ids.push(11001);
    let (bridge, mut adapter) = start(&cfg, &mem);

    assert_eq!(adapter.on_tick_bid_ask(&quote(1.0)), IngestOutcome::Enqueued);
    assert_eq!(adapter.on_tick_last(&trade(2.0)), IngestOutcome::Enqueued);
    // The quote slot has a newer AAPL tick behind it.
    assert_eq!(adapter.on_tick_bid_ask(&quote(3.0)), IngestOutcome::Dropped);
    assert_eq!(adapter.on_tick_last(&trade(4.0)), IngestOutcome::Coalesced);

    mem.set_outage(false);
    wait_until("drained", || bridge.stats().published == 2);
    assert_eq!(set_seqs(&mem, "md:AAPL"), vec![1, 4]);

    let s = bridge.shutdown();
    assert_eq!(s.dropped, 1);
    assert_eq!(s.coalesced, 1);
    assert_conserved(&s);
}

#[test]
fn one_source_can_use_the_whole_queue() {
    let mem = MemoryConnector::new();
    mem.set_outage(true);
    let (bridge, mut adapter) = start(&config(100, 4), &mem);

    for n in 1..=100 {
        assert_eq!(adapter.on_account_value(&account(n)), IngestOutcome::Enqueued, "update {n}");
    }
    assert_eq!(bridge.queue_depth(), 100);
    assert_eq!(adapter.on_account_value(&account(101)), IngestOutcome::Dropped);

    mem.set_outage(false);
    wait_until("drained", || bridge.stats().published == 100);
    assert_eq!(stream_seqs(&mem, "account:DU1"), (1..=100).collect::<Vec<u64>>());

    let s = bridge.shutdown();
    assert_eq!(s.dropped, 1);
    assert_conserved(&s);
}

#[test]
fn snapshots_follow_quote_and_trade() {
    let mem = MemoryConnector::new();
    let mut cfg = config(64, 1);
    cfg.subscriptions[0].ticker_ids.push(11001);
    let (bridge, mut adapter) = start(&cfg, &mem);

    adapter.on_tick_bid_ask(&quote(171.55));
    adapter.on_tick_last(&RawLast { size: 50.0, ..trade(171.56) });
    wait_until("ticks published", || bridge.stats().published == 2);
    bridge.shutdown();

    let snaps = mem.ops_for("TWS:TICKS:AAPL");
    assert_eq!(snaps.len(), 1);
    let WriteOp::Publish { message, .. } = &snaps[0] else {
        panic!("snapshot should be a publish");
    };
    let v: Value = serde_json::from_str(message).unwrap();
    assert_eq!(v["instrument"], "AAPL");
    assert_eq!(v["conId"], 265598);
    assert_eq!(v["price"]["last"], "171.560000");
    assert_eq!(v["exchange"], "NASDAQ");
}
