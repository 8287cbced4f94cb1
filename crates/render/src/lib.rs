//! Progressive page rendering.
//!
//! A [`RenderHost`] mounts a document into a [`RenderSurface`] and renders it
//! in fixed-size batches, one page at a time, advancing only when the reader
//! scrolls near the end of what is already on screen. Diagnostics go back to
//! the host over the message bridge.

mod bundle;
pub mod error;
mod host;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod surface;

pub use crate::bundle::{ViewerBundle, ViewerSettings};
pub use crate::host::{PageSlot, RenderHost, RenderSession, RenderState, ScrollSignal};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{MockSurface, SurfaceProbe};
pub use crate::surface::{DocumentInfo, RenderSurface, RenderedPage, SurfaceSource, Viewport};
