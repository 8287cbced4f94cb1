//! Render Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A render error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for render operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The surface could not open the document at all.
    #[display("document could not be loaded: {_0}")]
    LoadFailed(#[error(not(source))] String),
    /// A single page could not be drawn. Neighbouring pages are unaffected.
    #[display("page {page} could not be rendered: {reason}")]
    PageFailed { page: u32, reason: String },
    /// Asked for a page past the end of the document.
    #[display("page {_0} is past the end of the document")]
    PageOutOfRange(#[error(not(source))] u32),
    /// The surface was torn down (or crashed) underneath the host.
    #[display("render surface is gone")]
    SurfaceGone,
    /// The operation doesn't apply to the session's current state.
    #[display("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: &'static str },
    /// Asset was not loadable from the embedded viewer bundle.
    #[display("viewer asset not found: {_0}")]
    AssetNotFound(#[error(not(source))] String),
    /// An embedded asset exists but can't be assembled into a page.
    #[display("viewer asset is unusable: {_0}")]
    InvalidAsset(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// A document that failed to load may load on a fresh surface; everything
    /// else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LoadFailed(_) | Self::SurfaceGone)
    }
}
