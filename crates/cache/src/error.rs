//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! [`ErrorKind`] is `Clone` on purpose: a single download outcome is shared by
//! every caller attached to it, and each of them gets its own [`Error`] built
//! from the same kind.

use derive_more::{Display, Error};
use exn::Exn;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

/// A cache error with automatic location tracking.
pub type Error = Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The URL (or filename hint) does not yield a usable file name.
    #[display("invalid document url: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// Connection, DNS, TLS or mid-transfer failure.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The server answered, but not with the document.
    #[display("unexpected http status: {_0}")]
    HttpStatus(#[error(not(source))] u16),
    /// Writing into the cache root failed (disk full, permissions, ...).
    #[display("storage error at {}: {reason}", path.display())]
    Storage { path: PathBuf, reason: String },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Nothing in this crate retries on its own; this only decides whether a
    /// retry affordance is worth showing.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::HttpStatus(status) => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidUrl(_) | Self::Storage { .. } => false,
        }
    }

    /// Raise an I/O failure at `path` as a storage error, keeping the I/O
    /// error as a child frame.
    #[track_caller]
    pub(crate) fn storage(path: impl AsRef<Path>, err: std::io::Error) -> Error {
        let reason = match err.kind() {
            IoErrorKind::PermissionDenied => "permission denied".to_string(),
            IoErrorKind::StorageFull => "no space left on device".to_string(),
            IoErrorKind::ReadOnlyFilesystem => "read-only filesystem".to_string(),
            _ => err.to_string(),
        };
        Exn::new(err).raise(Self::Storage { path: path.as_ref().to_path_buf(), reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Network("reset".into()), true)]
    #[case(ErrorKind::HttpStatus(503), true)]
    #[case(ErrorKind::HttpStatus(429), true)]
    #[case(ErrorKind::HttpStatus(404), false)]
    #[case(ErrorKind::InvalidUrl("https://host/".into()), false)]
    #[case(ErrorKind::Storage { path: "/tmp".into(), reason: "full".into() }, false)]
    fn retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn storage_reason_names_the_problem() {
        let err = ErrorKind::storage("/cache/book.pdf", std::io::Error::from(IoErrorKind::PermissionDenied));
        assert_eq!(err.to_string(), "storage error at /cache/book.pdf: permission denied");
        assert_eq!(err.frame().children().len(), 1);
    }
}
