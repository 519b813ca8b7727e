//! Typed events: the values flowing from ingestion to publication.
//!
//! An [`Event`] is created once on the broker callback thread, moved through
//! the relay queue into exactly one publisher worker, and discarded after it
//! is published or its retry budget is exhausted.
//!
//! # Timestamp convention
//!
//! `ingested_at_ms` and all exchange/execution times are **milliseconds since
//! Unix epoch**. The broker reports tick times in seconds; the adapter
//! multiplies by 1000.

use std::fmt;

use super::enums::{EventKind, OrderState, Side, TickKind};
use super::source::SourceId;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A normalized broker event stamped with its ingestion sequence number.
///
/// Fields are private: the sequence number is assigned exactly once by the
/// ingestion adapter and cannot be rewritten downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    seq: u64,
    ingested_at_ms: u64,
    source: SourceId,
    payload: EventPayload,
}

impl Event {
    pub fn new(seq: u64, ingested_at_ms: u64, source: SourceId, payload: EventPayload) -> Self {
        Self { seq, ingested_at_ms, source, payload }
    }

    /// Per-source sequence number, starting at 1.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn ingested_at_ms(&self) -> u64 {
        self.ingested_at_ms
    }

    #[inline]
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    #[inline]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}:{} {}", self.seq, self.source.namespace(), self.source, self.payload)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Kind-specific event content.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Tick(Tick),
    OrderStatus(OrderStatusUpdate),
    Execution(ExecutionReport),
    AccountUpdate(AccountValue),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Tick(_) => EventKind::Tick,
            Self::OrderStatus(_) => EventKind::OrderStatus,
            Self::Execution(_) => EventKind::Execution,
            Self::AccountUpdate(_) => EventKind::AccountUpdate,
        }
    }
}

impl fmt::Display for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tick(t) => t.fmt(f),
            Self::OrderStatus(o) => o.fmt(f),
            Self::Execution(x) => x.fmt(f),
            Self::AccountUpdate(a) => a.fmt(f),
        }
    }
}

/// A tick-by-tick market data update for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Broker request id the tick arrived on.
    pub ticker_id: i32,
    pub symbol: String,
    pub exchange_time_ms: i64,
    pub data: TickData,
}

impl Tick {
    #[inline]
    pub fn kind(&self) -> TickKind {
        match self.data {
            TickData::BidAsk { .. } => TickKind::BidAsk,
            TickData::AllLast { .. } => TickKind::AllLast,
        }
    }
}

/// Fields specific to each tick-by-tick callback.
#[derive(Debug, Clone, PartialEq)]
pub enum TickData {
    BidAsk {
        bid_price: f64,
        ask_price: f64,
        bid_size: f64,
        ask_size: f64,
    },
    AllLast {
        price: f64,
        size: f64,
        past_limit: bool,
        exchange: String,
    },
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            TickData::BidAsk { bid_price, ask_price, bid_size, ask_size } => write!(
                f,
                "Quote({} bid={bid_price}x{bid_size} ask={ask_price}x{ask_size})",
                self.symbol
            ),
            TickData::AllLast { price, size, exchange, .. } => {
                write!(f, "Last({} {price}x{size} @{exchange})", self.symbol)
            }
        }
    }
}

/// An order status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatusUpdate {
    pub order_id: i64,
    pub status: OrderState,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
    pub last_fill_price: f64,
    pub perm_id: i64,
    pub parent_id: i64,
    pub client_id: i32,
    pub why_held: String,
}

impl fmt::Display for OrderStatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OrderStatus({} {} filled={} remaining={})",
            self.order_id,
            self.status.as_str(),
            self.filled,
            self.remaining
        )
    }
}

/// A fill reported against an order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub order_id: i64,
    pub exec_id: String,
    pub symbol: String,
    pub side: Side,
    pub shares: f64,
    pub price: f64,
    pub cum_qty: f64,
    pub avg_price: f64,
    pub exchange: String,
    pub exec_time_ms: i64,
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Execution({} {} {} {}x{} id={})",
            self.order_id,
            self.symbol,
            self.side.as_str(),
            self.shares,
            self.price,
            self.exec_id
        )
    }
}

/// One account value (`NetLiquidation`, `BuyingPower`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct AccountValue {
    pub account: String,
    pub key: String,
    pub value: String,
    pub currency: String,
}

impl fmt::Display for AccountValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({} {}={} {})", self.account, self.key, self.value, self.currency)
    }
}
