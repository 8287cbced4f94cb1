//! Reader Error Types
//!
//! Wraps the component crates' error kinds so a reader can decide what to do
//! (retry, show a message) without knowing which stage failed. A locked series
//! is not an error; see [`OpenOutcome::Locked`](crate::OpenOutcome::Locked).

use derive_more::{Display, Error};

/// A reader error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The document could not be made available locally.
    #[display("document download failed: {_0}")]
    Download(lectern_cache::error::ErrorKind),
    /// The document is local but could not be displayed.
    #[display("document could not be displayed: {_0}")]
    Render(lectern_render::error::ErrorKind),
    /// The session was closed while opening.
    #[display("reader closed")]
    Closed,
    /// `open` was called on a session that is already open or closed.
    #[display("reader session already used")]
    AlreadyOpened,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Download(kind) => kind.is_retryable(),
            Self::Render(kind) => kind.is_retryable(),
            Self::Closed | Self::AlreadyOpened => false,
        }
    }

    /// Convert a cache error into a reader error, preserving the cache's
    /// error tree as a child.
    #[track_caller]
    pub fn download(err: lectern_cache::error::Error) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Download(inner))
    }

    /// Convert a render error into a reader error, preserving the render
    /// crate's error tree as a child.
    #[track_caller]
    pub fn render(err: lectern_render::error::Error) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Render(inner))
    }
}

impl From<lectern_cache::error::ErrorKind> for ErrorKind {
    fn from(kind: lectern_cache::error::ErrorKind) -> Self {
        Self::Download(kind)
    }
}

impl From<lectern_render::error::ErrorKind> for ErrorKind {
    fn from(kind: lectern_render::error::ErrorKind) -> Self {
        Self::Render(kind)
    }
}
