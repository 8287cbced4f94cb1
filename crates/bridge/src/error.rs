//! Bridge Error Types
//!
//! Only parsing can fail. Posting a message is fire-and-forget and never
//! reports an error to the sender.

use derive_more::{Display, Error};

/// A bridge error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a message from the surface could not be understood.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("message is not valid json: {_0}")]
    NotJson(#[error(not(source))] String),
    #[display("message is not a json object")]
    NotAnObject,
    #[display("unsupported protocol version: {_0}")]
    UnsupportedVersion(#[error(not(source))] String),
    #[display("unknown message type: {_0}")]
    UnknownType(#[error(not(source))] String),
    #[display("malformed {kind} message: {reason}")]
    InvalidEvent { kind: String, reason: String },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// The same bytes will never parse differently.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
