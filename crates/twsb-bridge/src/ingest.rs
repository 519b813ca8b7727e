//! Broker callback ingestion.
//!
//! [`IngestAdapter`] is owned by the broker API's callback thread. Each entry
//! point validates the raw callback arguments, stamps the event with its
//! per-source sequence number and ingestion time, and hands it to the relay
//! queue without blocking. The outcome is returned to the caller and counted
//! in [`BridgeStats`].
//!
//! When a lane is full, a tick may be coalesced into the most recently queued
//! tick of its instrument, provided that tick is still pending and of the same
//! kind. Nothing of that instrument sits behind it in the lane, so the overwrite
//! cannot reorder the instrument's stream. Every other event is dropped,
//! counted and logged.

use std::sync::{Arc, Weak};

use ahash::AHashMap;
use tracing::{debug, info, warn};
use twsb_core::config::{BridgeConfig, OutboundSettings, Subscription};
use twsb_core::stats::BridgeStats;
use twsb_core::time_util::now_ms;
use twsb_core::{
    AccountValue, BridgeError, Event, EventPayload, ExecutionReport, OrderState,
    OrderStatusUpdate, RawAccountValue, RawBidAsk, RawExecution, RawLast, RawOrderStatus,
    Side, SourceId, Tick, TickData, TickKind, is_set,
};

use crate::relay::{LatestTick, RelayItem, RelayQueue};
use crate::sequencer::Sequencer;
use crate::serializer::destination;

/// Broker notices that report data-farm connectivity, not failures.
const FARM_STATUS_CODES: [i32; 3] = [2104, 2106, 2158];

/// What happened to one callback's event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Queued for publication.
    Enqueued,
    /// Queue full; replaced the newest pending tick of the same instrument.
    Coalesced,
    /// Queue full; event discarded.
    Dropped,
    /// Failed validation; never sequenced.
    Rejected,
}

pub struct IngestAdapter {
    queue: Arc<RelayQueue>,
    stats: Arc<BridgeStats>,
    sequencer: Sequencer,
    tickers: AHashMap<i32, String>,
    /// Newest queued tick per instrument, if it was queued as a slot.
    last_tick: AHashMap<SourceId, (TickKind, Weak<LatestTick>)>,
    outbound: OutboundSettings,
    coalesce: bool,
}

impl IngestAdapter {
    pub fn new(queue: Arc<RelayQueue>, stats: Arc<BridgeStats>, config: &BridgeConfig) -> Self {
        let mut adapter = Self {
            queue,
            stats,
            sequencer: Sequencer::new(),
            tickers: AHashMap::new(),
            last_tick: AHashMap::new(),
            outbound: config.outbound.clone(),
            coalesce: config.queue.effective_coalesce_ticks(),
        };
        adapter.register_all(&config.subscriptions);
        adapter
    }

    /// Route ticks arriving on `ticker_id` to `symbol`.
    pub fn register(&mut self, ticker_id: i32, symbol: &str) {
        if let Some(prev) = self.tickers.insert(ticker_id, symbol.to_string())
            && prev != symbol
        {
            warn!("[ingest] ticker {ticker_id} re-registered: {prev} -> {symbol}");
        }
    }

    pub fn register_all(&mut self, subscriptions: &[Subscription]) {
        for sub in subscriptions {
            for &id in &sub.ticker_ids {
                self.register(id, &sub.symbol);
            }
        }
    }

    pub fn symbol_for(&self, ticker_id: i32) -> Option<&str> {
        self.tickers.get(&ticker_id).map(String::as_str)
    }

    /// Last sequence number assigned to a source.
    pub fn last_seq(&self, source: &SourceId) -> Option<u64> {
        self.sequencer.last(source)
    }

    // -----------------------------------------------------------------------
    // Callback entry points
    // -----------------------------------------------------------------------

    pub fn on_tick_bid_ask(&mut self, raw: &RawBidAsk) -> IngestOutcome {
        let tick = self.symbol(raw.req_id).and_then(|symbol| {
            Ok(Tick {
                ticker_id: raw.req_id,
                symbol,
                exchange_time_ms: raw.time.saturating_mul(1000),
                data: TickData::BidAsk {
                    bid_price: non_negative("bid_price", raw.bid_price)?,
                    ask_price: non_negative("ask_price", raw.ask_price)?,
                    bid_size: non_negative("bid_size", raw.bid_size)?,
                    ask_size: non_negative("ask_size", raw.ask_size)?,
                },
            })
        });
        self.admit_tick(tick)
    }

    pub fn on_tick_last(&mut self, raw: &RawLast) -> IngestOutcome {
        let tick = self.symbol(raw.req_id).and_then(|symbol| {
            Ok(Tick {
                ticker_id: raw.req_id,
                symbol,
                exchange_time_ms: raw.time.saturating_mul(1000),
                data: TickData::AllLast {
                    price: non_negative("price", raw.price)?,
                    size: non_negative("size", raw.size)?,
                    past_limit: raw.past_limit,
                    exchange: raw.exchange.clone(),
                },
            })
        });
        self.admit_tick(tick)
    }

    pub fn on_order_status(&mut self, raw: &RawOrderStatus) -> IngestOutcome {
        match order_status(raw) {
            Ok(u) => self.admit(SourceId::Order(u.order_id), EventPayload::OrderStatus(u)),
            Err(e) => self.reject("order_status", e),
        }
    }

    pub fn on_execution(&mut self, raw: &RawExecution) -> IngestOutcome {
        match execution(raw) {
            Ok(r) => self.admit(SourceId::Order(r.order_id), EventPayload::Execution(r)),
            Err(e) => self.reject("execution", e),
        }
    }

    pub fn on_account_value(&mut self, raw: &RawAccountValue) -> IngestOutcome {
        match account_value(raw) {
            Ok(v) => self.admit(SourceId::Account(v.account.clone()), EventPayload::AccountUpdate(v)),
            Err(e) => self.reject("account", e),
        }
    }

    /// Broker error/notice callback. Farm-status notices are informational.
    pub fn on_broker_error(&self, id: i32, code: i32, message: &str) {
        if FARM_STATUS_CODES.contains(&code) {
            info!("[ingest] broker notice [{code}]: {message}");
        } else {
            warn!("[ingest] broker error [{code}] (id={id}): {message}");
        }
    }

    pub fn on_connection_closed(&self) {
        warn!("[ingest] broker connection closed");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn symbol(&self, ticker_id: i32) -> Result<String, BridgeError> {
        self.tickers
            .get(&ticker_id)
            .cloned()
            .ok_or_else(|| BridgeError::Validation(format!("unknown ticker id {ticker_id}")))
    }

    fn admit_tick(&mut self, tick: Result<Tick, BridgeError>) -> IngestOutcome {
        match tick {
            Ok(t) => self.admit(SourceId::Instrument(t.symbol.clone()), EventPayload::Tick(t)),
            Err(e) => self.reject("tick", e),
        }
    }

    fn reject(&self, what: &str, e: BridgeError) -> IngestOutcome {
        self.stats.record_rejected();
        warn!("[ingest] rejected {what}: {e}");
        IngestOutcome::Rejected
    }

    fn admit(&mut self, source: SourceId, payload: EventPayload) -> IngestOutcome {
        let seq = self.sequencer.next(&source);
        let dest = destination(&source, &self.outbound);
        let event = Event::new(seq, now_ms(), source, payload);
        self.stats.record_ingested();

        if self.coalesce
            && let EventPayload::Tick(t) = event.payload()
        {
            let kind = t.kind();
            return self.enqueue_tick(kind, event, dest);
        }

        match self.queue.try_push(RelayItem::new(event, dest)) {
            Ok(()) => IngestOutcome::Enqueued,
            Err(item) => {
                self.stats.record_dropped();
                if let (Some(event), _) = item.into_parts() {
                    if event.kind().is_state_transition() {
                        warn!("[ingest] queue full, dropped {event}");
                    } else {
                        debug!("[ingest] queue full, dropped {event}");
                    }
                }
                IngestOutcome::Dropped
            }
        }
    }

    fn enqueue_tick(&mut self, kind: TickKind, event: Event, dest: String) -> IngestOutcome {
        let source = event.source().clone();
        let (item, slot) = RelayItem::latest(event, dest);
        match self.queue.try_push(item) {
            Ok(()) => {
                self.last_tick.insert(source, (kind, Arc::downgrade(&slot)));
                IngestOutcome::Enqueued
            }
            Err(item) => {
                let (Some(event), _) = item.into_parts() else {
                    return IngestOutcome::Dropped;
                };
                let newest = self
                    .last_tick
                    .get(&source)
                    .filter(|(k, _)| *k == kind)
                    .and_then(|(_, slot)| slot.upgrade());
                if let Some(newest) = newest
                    && newest.replace(event).is_ok()
                {
                    self.stats.record_coalesced();
                    return IngestOutcome::Coalesced;
                }
                self.stats.record_dropped();
                debug!("[ingest] queue full, dropped {source} {} tick", kind.as_str());
                IngestOutcome::Dropped
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn order_status(raw: &RawOrderStatus) -> Result<OrderStatusUpdate, BridgeError> {
    Ok(OrderStatusUpdate {
        order_id: positive_id("order_id", raw.order_id)?,
        status: raw.status.parse::<OrderState>()?,
        filled: non_negative("filled", raw.filled)?,
        remaining: non_negative("remaining", raw.remaining)?,
        avg_fill_price: non_negative("avg_fill_price", raw.avg_fill_price)?,
        last_fill_price: non_negative("last_fill_price", raw.last_fill_price)?,
        perm_id: raw.perm_id,
        parent_id: raw.parent_id,
        client_id: raw.client_id,
        why_held: raw.why_held.clone(),
    })
}

fn execution(raw: &RawExecution) -> Result<ExecutionReport, BridgeError> {
    Ok(ExecutionReport {
        order_id: positive_id("order_id", raw.order_id)?,
        exec_id: non_empty("exec_id", &raw.exec_id)?,
        symbol: non_empty("symbol", &raw.symbol)?,
        side: raw.side.parse::<Side>()?,
        shares: non_negative("shares", raw.shares)?,
        price: non_negative("price", raw.price)?,
        cum_qty: non_negative("cum_qty", raw.cum_qty)?,
        avg_price: non_negative("avg_price", raw.avg_price)?,
        exchange: raw.exchange.clone(),
        exec_time_ms: raw.time_ms,
    })
}

fn account_value(raw: &RawAccountValue) -> Result<AccountValue, BridgeError> {
    Ok(AccountValue {
        account: non_empty("account", &raw.account)?,
        key: non_empty("key", &raw.key)?,
        value: raw.value.clone(),
        currency: raw.currency.clone(),
    })
}

fn non_negative(field: &str, v: f64) -> Result<f64, BridgeError> {
    if !is_set(v) {
        return Err(BridgeError::Validation(format!("{field} missing")));
    }
    if v < 0.0 {
        return Err(BridgeError::Validation(format!("{field} negative: {v}")));
    }
    Ok(v)
}

fn non_empty(field: &str, v: &str) -> Result<String, BridgeError> {
    if v.trim().is_empty() {
        Err(BridgeError::Validation(format!("{field} missing")))
    } else {
        Ok(v.to_string())
    }
}

fn positive_id(field: &str, v: i64) -> Result<i64, BridgeError> {
    if v > 0 { Ok(v) } else { Err(BridgeError::Validation(format!("{field} must be positive, got {v}"))) }
}
