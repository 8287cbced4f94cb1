//! Where document bytes come from.
//!
//! [`RemoteSource`] is the seam between the cache and the network. The cache
//! only ever asks for "this URL, starting at this byte offset" and consumes the
//! body as a stream, so a multi-hundred-megabyte document never has to sit in
//! memory.

mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::http::HttpSource;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockSource;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Response body, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;
pub type SourceHandle = Arc<dyn RemoteSource + Send + Sync>;

/// Resume validators captured from a previous response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl Validators {
    /// Value for an `If-Range` header. Strong validators are preferred.
    pub fn if_range(&self) -> Option<&str> {
        self.etag.as_deref().or(self.last_modified.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Resume from this byte offset. Zero requests the whole document.
    pub offset: u64,
    /// Only honour `offset` if the remote document still matches these.
    pub validators: Validators,
}

/// Whether the server honoured the requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The body is the whole document, from byte zero.
    Full,
    /// The body starts at the requested offset.
    Partial,
    /// Nothing exists at or past the requested offset (HTTP 416). The body
    /// is empty.
    Unsatisfiable,
}

pub struct RemoteResponse {
    pub transfer: Transfer,
    /// Length of *this body*, when the server sent one.
    pub content_length: Option<u64>,
    pub validators: Validators,
    pub body: ByteStream,
}

/// Anything that can serve a document by URL.
#[async_trait]
pub trait RemoteSource {
    fn name(&self) -> &str;

    /// Start a transfer. Errors before the first byte are returned here;
    /// errors mid-transfer arrive through [`RemoteResponse::body`].
    async fn fetch(&self, request: &FetchRequest) -> Result<RemoteResponse>;
}
