//! Redis write plans and the link abstraction.
//!
//! A serialized event becomes a small list of [`WriteOp`]s according to the
//! [`WriteMode`] configured for its kind. Ops are applied through a
//! [`RedisLink`], a live connection owned by the supervisor and lent to one
//! worker. A [`Connector`] opens new links; the supervisor is its only
//! caller.
//!
//! Two connectors ship: [`RedisConnector`] for a real server and
//! [`MemoryConnector`], an in-process sink with failure injection.

mod memory;
mod redis_link;

pub use memory::MemoryConnector;
pub use redis_link::RedisConnector;

use twsb_core::BridgeError;
use twsb_core::config::WriteMode;

/// Stream field the JSON payload is stored under.
pub const STREAM_FIELD: &str = "data";

/// One Redis command in a write plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// `SET key value`
    Set { key: String, value: String },
    /// `PUBLISH channel message`
    Publish { channel: String, message: String },
    /// `XADD stream MAXLEN ~ maxlen * field value`
    Append { stream: String, maxlen: u64, field: String, value: String },
}

impl WriteOp {
    /// Key or channel the op targets.
    pub fn target(&self) -> &str {
        match self {
            Self::Set { key, .. } => key,
            Self::Publish { channel, .. } => channel,
            Self::Append { stream, .. } => stream,
        }
    }

    /// Payload the op writes.
    pub fn payload(&self) -> &str {
        match self {
            Self::Set { value, .. } => value,
            Self::Publish { message, .. } => message,
            Self::Append { value, .. } => value,
        }
    }
}

/// Translate one serialized event into Redis commands.
pub fn plan_writes(mode: WriteMode, destination: &str, payload: String, maxlen: u64) -> Vec<WriteOp> {
    match mode {
        WriteMode::Set => vec![WriteOp::Set { key: destination.to_string(), value: payload }],
        WriteMode::Publish => {
            vec![WriteOp::Publish { channel: destination.to_string(), message: payload }]
        }
        WriteMode::Stream => vec![WriteOp::Append {
            stream: destination.to_string(),
            maxlen,
            field: STREAM_FIELD.to_string(),
            value: payload,
        }],
        WriteMode::SetPublish => vec![
            WriteOp::Set { key: destination.to_string(), value: payload.clone() },
            WriteOp::Publish { channel: destination.to_string(), message: payload },
        ],
    }
}

/// A live connection to Redis.
///
/// Every call must return within the configured I/O timeout.
pub trait RedisLink: Send {
    /// Round-trip liveness check.
    fn ping(&mut self) -> Result<(), BridgeError>;

    /// Apply all ops, in order, as a single pipeline. Either the whole
    /// plan is acknowledged or an error is returned.
    fn apply(&mut self, ops: &[WriteOp]) -> Result<(), BridgeError>;
}

/// Factory for [`RedisLink`]s.
pub trait Connector: Send + Sync {
    /// Open a new link, within the configured connect timeout.
    fn connect(&self) -> Result<Box<dyn RedisLink>, BridgeError>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}
