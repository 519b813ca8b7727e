//! Enumerations used throughout the bridge.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// Discriminant of an [`EventPayload`](super::EventPayload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Tick,
    OrderStatus,
    Execution,
    AccountUpdate,
}

impl EventKind {
    /// State transitions must never be coalesced and every drop is counted.
    /// Ticks are samples: only the latest value matters.
    #[inline]
    pub fn is_state_transition(self) -> bool {
        !matches!(self, Self::Tick)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::OrderStatus => "order_status",
            Self::Execution => "execution",
            Self::AccountUpdate => "account_update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tick kinds
// ---------------------------------------------------------------------------

/// Which tick-by-tick callback produced a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickKind {
    /// Best bid/ask quote.
    BidAsk,
    /// Last trade print.
    AllLast,
}

impl TickKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BidAsk => "bid_ask",
            Self::AllLast => "all_last",
        }
    }
}

// ---------------------------------------------------------------------------
// Order state
// ---------------------------------------------------------------------------

/// Broker order status.
///
/// Parsed from the status strings the broker sends in its order status
/// callback (`"Submitted"`, `"Filled"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    ApiPending,
    PendingSubmit,
    PendingCancel,
    PreSubmitted,
    Submitted,
    PartiallyFilled,
    ApiCancelled,
    Cancelled,
    Filled,
    Inactive,
}

impl OrderState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiPending => "ApiPending",
            Self::PendingSubmit => "PendingSubmit",
            Self::PendingCancel => "PendingCancel",
            Self::PreSubmitted => "PreSubmitted",
            Self::Submitted => "Submitted",
            Self::PartiallyFilled => "PartiallyFilled",
            Self::ApiCancelled => "ApiCancelled",
            Self::Cancelled => "Cancelled",
            Self::Filled => "Filled",
            Self::Inactive => "Inactive",
        }
    }

    /// Whether no further transitions are expected for the order.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ApiCancelled | Self::Cancelled | Self::Filled | Self::Inactive)
    }
}

impl FromStr for OrderState {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ApiPending" => Self::ApiPending,
            "PendingSubmit" => Self::PendingSubmit,
            "PendingCancel" => Self::PendingCancel,
            "PreSubmitted" => Self::PreSubmitted,
            "Submitted" => Self::Submitted,
            "PartiallyFilled" => Self::PartiallyFilled,
            "ApiCancelled" => Self::ApiCancelled,
            "Cancelled" => Self::Cancelled,
            "Filled" => Self::Filled,
            "Inactive" => Self::Inactive,
            other => return Err(BridgeError::Validation(format!("unknown order status '{other}'"))),
        })
    }
}

// ---------------------------------------------------------------------------
// Execution side
// ---------------------------------------------------------------------------

/// Execution side as reported by the broker (`"BOT"` / `"SLD"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bought,
    Sold,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bought => "BOT",
            Self::Sold => "SLD",
        }
    }
}

impl FromStr for Side {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOT" | "BUY" => Ok(Self::Bought),
            "SLD" | "SELL" => Ok(Self::Sold),
            other => Err(BridgeError::Validation(format!("unknown execution side '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Reachability of the downstream Redis endpoint.
///
/// Written only by the connection supervisor; publisher workers read it to
/// decide whether to attempt I/O. Stored as a `u8` in an atomic cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Ready = 2,
    Degraded = 3,
}

impl ConnectionState {
    /// Decode from the atomic representation. Unknown values read as
    /// `Disconnected`.
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Ready,
            3 => Self::Degraded,
            _ => Self::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_state_parses_broker_strings() {
        assert_eq!("Submitted".parse::<OrderState>().unwrap(), OrderState::Submitted);
        assert_eq!("ApiCancelled".parse::<OrderState>().unwrap(), OrderState::ApiCancelled);
        assert!("submitted".parse::<OrderState>().is_err());
        assert!("".parse::<OrderState>().is_err());
    }

    #[test]
    fn order_state_round_trips_through_str() {
        for s in [OrderState::PreSubmitted, OrderState::Filled, OrderState::Inactive] {
            assert_eq!(s.as_str().parse::<OrderState>().unwrap(), s);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(OrderState::Filled.is_terminal());
        assert!(!OrderState::Submitted.is_terminal());
    }

    #[test]
    fn side_accepts_both_spellings() {
        assert_eq!("BOT".parse::<Side>().unwrap(), Side::Bought);
        assert_eq!("SELL".parse::<Side>().unwrap(), Side::Sold);
        assert!(matches!("X".parse::<Side>(), Err(BridgeError::Validation(_))));
    }

    #[test]
    fn connection_state_u8_round_trip() {
        for st in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Ready,
            ConnectionState::Degraded,
        ] {
            assert_eq!(ConnectionState::from_u8(st as u8), st);
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Disconnected);
    }

    #[test]
    fn only_ticks_are_samples() {
        assert!(!EventKind::Tick.is_state_transition());
        assert!(EventKind::OrderStatus.is_state_transition());
        assert!(EventKind::Execution.is_state_transition());
        assert!(EventKind::AccountUpdate.is_state_transition());
    }
}
