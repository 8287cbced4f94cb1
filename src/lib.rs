//! Lectern: progressive document delivery.
//!
//! A [`Reader`] ties the component crates together. Opening a document runs
//! three stages strictly in order, and nothing starts before the previous one
//! has succeeded:
//!
//! 1. the [`EntitlementGate`](lectern_entitlement::EntitlementGate) decides
//!    whether the reader may see the series at all,
//! 2. the [`CacheManager`](lectern_cache::CacheManager) makes the document
//!    local, downloading it (once, however many sessions ask) if needed,
//! 3. the [`RenderHost`](lectern_render::RenderHost) mounts it and renders the
//!    first batch of pages, rendering more as the reader scrolls.
//!
//! Closing a [`ReaderSession`], explicitly or by dropping it, releases all of
//! it: the surface, the download and screen capture protection.

pub mod error;
mod reader;
mod screen;

pub use crate::reader::{OpenOutcome, Reader, ReaderSession, RemoteDocumentRef, SessionAbort};
pub use crate::screen::{NoScreenGuard, ScreenGuard};
pub use lectern_bridge as bridge;
pub use lectern_cache as cache;
pub use lectern_config as config;
pub use lectern_entitlement as entitlement;
pub use lectern_render as render;
