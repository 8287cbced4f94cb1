//! One-way diagnostics from an embedded render surface to its host.
//!
//! The surface cannot call into the host; it can only post small JSON
//! messages. This crate defines those messages ([`Event`]), parses them
//! defensively ([`Inbound`]), and carries them over a bounded channel that
//! never makes the surface wait ([`channel`]). On the host side a
//! [`DiagnosticSink`] decides what to do with them, usually
//! forwarding them to `tracing` through [`TracingSink`].

mod channel;
pub mod error;
mod protocol;
mod sink;

pub use crate::channel::{BridgeReceiver, BridgeSender, channel};
pub use crate::protocol::{Event, Inbound, LogLevel, PROTOCOL_VERSION};
#[cfg(any(test, feature = "mock"))]
pub use crate::sink::MemorySink;
pub use crate::sink::{DiagnosticSink, TracingSink};
