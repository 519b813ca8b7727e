//! Combined per-instrument market state.
//!
//! Quote (BidAsk) and trade (AllLast) ticks arrive on separate broker
//! streams. The book merges them per symbol so consumers can subscribe to
//! one channel and receive complete snapshots without doing the merge
//! themselves. A snapshot is only emitted once an instrument has seen both a
//! quote and a trade.
//!
//! Each publisher worker owns its own book. Lane routing keeps every tick of
//! a symbol on the same worker, so no book is ever shared.

use ahash::AHashMap;
use twsb_core::config::Subscription;
use twsb_core::{Tick, TickData};

/// Static per-instrument metadata from the subscription list.
#[derive(Debug, Clone, Default)]
pub struct InstrumentMeta {
    pub con_id: i64,
    pub exchange: String,
}

impl InstrumentMeta {
    /// Build the symbol → metadata table from subscriptions.
    pub fn table(subscriptions: &[Subscription]) -> AHashMap<String, InstrumentMeta> {
        subscriptions
            .iter()
            .map(|s| {
                let meta = InstrumentMeta {
                    con_id: s.con_id.unwrap_or(0),
                    exchange: s.exchange.clone().unwrap_or_default(),
                };
                (s.symbol.clone(), meta)
            })
            .collect()
    }
}

/// Latest known quote and trade for one instrument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentSnapshot {
    pub symbol: String,
    pub con_id: i64,
    pub ticker_id: i32,

    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub quote_time_ms: i64,
    pub has_quote: bool,

    pub last_price: f64,
    pub last_size: f64,
    pub trade_time_ms: i64,
    pub has_trade: bool,

    pub exchange: String,
    pub past_limit: bool,
}

impl InstrumentSnapshot {
    /// Fold a tick into the snapshot.
    pub fn apply(&mut self, tick: &Tick) {
        self.ticker_id = tick.ticker_id;
        match &tick.data {
            TickData::BidAsk { bid_price, ask_price, bid_size, ask_size } => {
                self.bid_price = *bid_price;
                self.ask_price = *ask_price;
                self.bid_size = *bid_size;
                self.ask_size = *ask_size;
                self.quote_time_ms = tick.exchange_time_ms;
                self.has_quote = true;
            }
            TickData::AllLast { price, size, past_limit, exchange } => {
                self.last_price = *price;
                self.last_size = *size;
                self.trade_time_ms = tick.exchange_time_ms;
                self.has_trade = true;
                self.past_limit = *past_limit;
                if !exchange.is_empty() {
                    self.exchange.clone_from(exchange);
                }
            }
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.has_quote && self.has_trade
    }

    /// Most recent of the quote and trade timestamps.
    #[inline]
    pub fn latest_time_ms(&self) -> i64 {
        self.quote_time_ms.max(self.trade_time_ms)
    }
}

/// Per-worker collection of instrument snapshots.
pub struct SnapshotBook {
    meta: AHashMap<String, InstrumentMeta>,
    states: AHashMap<String, InstrumentSnapshot>,
}

impl SnapshotBook {
    pub fn new(meta: AHashMap<String, InstrumentMeta>) -> Self {
        Self { meta, states: AHashMap::new() }
    }

    /// Apply a tick; returns the merged snapshot once it is complete.
    pub fn apply(&mut self, tick: &Tick) -> Option<&InstrumentSnapshot> {
        let meta = &self.meta;
        let state = self.states.entry(tick.symbol.clone()).or_insert_with(|| {
            let m = meta.get(&tick.symbol).cloned().unwrap_or_default();
            InstrumentSnapshot {
                symbol: tick.symbol.clone(),
                con_id: m.con_id,
                exchange: m.exchange,
                ..Default::default()
            }
        });
        state.apply(tick);
        if state.is_complete() { Some(state) } else { None }
    }
}
