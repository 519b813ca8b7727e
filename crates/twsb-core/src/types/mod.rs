//! Core data types: source identities, enums, typed events, raw callback inputs.
//!
//! Broker callbacks arrive as [`raw`] values (decoded, but not yet checked).
//! The ingestion adapter validates them into [`EventPayload`]s and stamps each
//! with a per-source sequence number to form an [`Event`].

pub mod enums;
pub mod event;
pub mod raw;
pub mod source;

pub use enums::*;
pub use event::*;
pub use raw::*;
pub use source::*;
