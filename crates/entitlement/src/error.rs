//! Entitlement Error Types
//!
//! These never reach callers of [`EntitlementGate::check_access`]; a failed
//! lookup is reported as a locked decision instead. They surface only from
//! the lower-level snapshot and provider APIs.
//!
//! [`EntitlementGate::check_access`]: crate::EntitlementGate::check_access

use derive_more::{Display, Error};

/// An entitlement error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for entitlement operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No provider is configured; nothing can be unlocked.
    #[display("no entitlement provider configured")]
    NotConfigured,
    /// The configured provider URL can't address a subscriber.
    #[display("invalid entitlement provider url: {_0}")]
    InvalidBaseUrl(#[error(not(source))] String),
    /// The provider could not be reached.
    #[display("entitlement provider unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// The provider answered with an error status.
    #[display("entitlement provider returned http status {_0}")]
    HttpStatus(#[error(not(source))] u16),
    /// The provider answered with something that isn't an entitlement list.
    #[display("unexpected entitlement response: {_0}")]
    InvalidResponse(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::HttpStatus(status) => *status >= 500 || *status == 429,
            Self::NotConfigured | Self::InvalidBaseUrl(_) | Self::InvalidResponse(_) => false,
        }
    }
}
