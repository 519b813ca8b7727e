//! Source identities.
//!
//! A [`SourceId`] names the stream an event belongs to. Sequence numbers are
//! counted per source, relay lanes are chosen per source, and Redis keys are
//! derived from it.

use std::fmt;

/// Identity of the stream an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceId {
    /// A subscribed instrument, by symbol (e.g. `"AAPL"`).
    Instrument(String),
    /// A broker order, by order id. Order status and execution events for
    /// the same order share this source.
    Order(i64),
    /// A brokerage account, by account code (e.g. `"DU123456"`).
    Account(String),
}

impl SourceId {
    /// Short namespace label used in logs and JSON payloads.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Instrument(_) => "instrument",
            Self::Order(_) => "order",
            Self::Account(_) => "account",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instrument(sym) => write!(f, "{sym}"),
            Self::Order(id) => write!(f, "{id}"),
            Self::Account(acct) => write!(f, "{acct}"),
        }
    }
}
