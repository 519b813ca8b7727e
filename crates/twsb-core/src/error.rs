//! Typed error definitions for the bridge.
//!
//! [`BridgeError`] follows the four failure classes of the pipeline. Only
//! [`BridgeError::FatalConfig`] may end the process, and only at startup;
//! every other variant is contained at the component that observed it.

use thiserror::Error;

/// Domain-specific errors for the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Malformed inbound broker event. Logged, counted, event dropped.
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization defect for an event that passed validation.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Network or Redis-reported failure. Retried with backoff.
    #[error("transient io error: {0}")]
    TransientIo(String),

    /// Misconfiguration detected at startup.
    #[error("fatal config error: {0}")]
    FatalConfig(String),
}

impl BridgeError {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

impl From<redis::RedisError> for BridgeError {
    fn from(e: redis::RedisError) -> Self {
        Self::TransientIo(e.to_string())
    }
}
