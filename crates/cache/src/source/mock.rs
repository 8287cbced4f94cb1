//! In-memory document source for testing.

use super::{FetchRequest, RemoteResponse, RemoteSource, Transfer, Validators};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use bytes::Bytes;
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{RwLock, Semaphore};

#[derive(Clone)]
struct Document {
    data: Bytes,
    etag: String,
    status: Option<u16>,
    interrupt_after: Option<usize>,
}

/// Serves documents from memory, keyed by URL without its query string.
///
/// Every fetch is recorded, so tests can assert how many transfers were
/// started and which byte ranges were requested.
pub struct MockSource {
    documents: RwLock<HashMap<String, Document>>,
    requests: RwLock<Vec<FetchRequest>>,
    fetches: AtomicUsize,
    chunk_size: usize,
    send_length: bool,
    held: Option<Semaphore>,
}

impl MockSource {
    pub fn with_documents(documents: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let documents = documents
            .into_iter()
            .enumerate()
            .map(|(i, (url, data))| {
                let url: String = url.into();
                let document = Document {
                    data: Bytes::from(data.into()),
                    etag: format!("\"v{i}\""),
                    status: None,
                    interrupt_after: None,
                };
                (strip_query(&url).to_string(), document)
            })
            .collect();
        Self {
            documents: RwLock::new(documents),
            requests: RwLock::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            chunk_size: 4,
            send_length: true,
            held: None,
        }
    }

    /// Respond like a server that omits `Content-Length`.
    pub fn without_content_length(mut self) -> Self {
        self.send_length = false;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Park every fetch until [`release`](Self::release) is called.
    pub fn held(mut self) -> Self {
        self.held = Some(Semaphore::new(0));
        self
    }

    /// Let `n` parked fetches proceed.
    pub fn release(&self, n: usize) {
        if let Some(held) = &self.held {
            held.add_permits(n);
        }
    }

    /// Answer `url` with an HTTP error status.
    pub async fn fail_with_status(&self, url: &str, status: u16) {
        if let Some(document) = self.documents.write().await.get_mut(strip_query(url)) {
            document.status = Some(status);
        }
    }

    /// Break the connection after `bytes` bytes of the next transfer of `url`.
    pub async fn interrupt_after(&self, url: &str, bytes: usize) {
        if let Some(document) = self.documents.write().await.get_mut(strip_query(url)) {
            document.interrupt_after = Some(bytes);
        }
    }

    /// Replace a document's content, which also changes its ETag.
    pub async fn replace(&self, url: &str, data: impl Into<Vec<u8>>) {
        if let Some(document) = self.documents.write().await.get_mut(strip_query(url)) {
            document.data = Bytes::from(data.into());
            document.etag = format!("{}-changed", document.etag);
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<FetchRequest> {
        self.requests.read().await.clone()
    }
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or_default()
}

#[async_trait]
impl RemoteSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<RemoteResponse> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.requests.write().await.push(request.clone());
        if let Some(held) = &self.held {
            held.acquire().await.or_raise(|| ErrorKind::Network("mock source closed".into()))?.forget();
        }
        let document = {
            let mut documents = self.documents.write().await;
            let document = documents.get_mut(strip_query(&request.url)).ok_or_raise(|| ErrorKind::HttpStatus(404))?;
            // Interruptions are one-shot, like a dropped connection.
            let snapshot = document.clone();
            document.interrupt_after = None;
            snapshot
        };
        if let Some(status) = document.status {
            exn::bail!(ErrorKind::HttpStatus(status));
        }
        // Like `If-Range`: a stale validator gets the whole document.
        let resumable = request.offset > 0 && request.validators.if_range().is_none_or(|v| v == document.etag);
        let (transfer, body) = match resumable {
            true if (request.offset as usize) < document.data.len() => {
                (Transfer::Partial, document.data.slice(request.offset as usize..))
            },
            true => (Transfer::Unsatisfiable, Bytes::new()),
            false => (Transfer::Full, document.data.clone()),
        };
        let content_length = self.send_length.then_some(body.len() as u64);
        let mut chunks: Vec<Result<Bytes>> = Vec::new();
        let mut sent = 0;
        for start in (0..body.len()).step_by(self.chunk_size) {
            if let Some(limit) = document.interrupt_after
                && sent >= limit
            {
                chunks.push(Err(exn::Exn::from(ErrorKind::Network("connection reset".into()))));
                break;
            }
            let end = (start + self.chunk_size).min(body.len());
            sent += end - start;
            chunks.push(Ok(body.slice(start..end)));
        }
        let validators = Validators { etag: Some(document.etag), last_modified: None };
        Ok(RemoteResponse { transfer, content_length, validators, body: futures::stream::iter(chunks).boxed() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn request(url: &str, offset: u64, etag: Option<&str>) -> FetchRequest {
        FetchRequest {
            url: url.to_string(),
            offset,
            validators: Validators { etag: etag.map(String::from), last_modified: None },
        }
    }

    async fn collect(response: RemoteResponse) -> Result<Vec<u8>> {
        let chunks: Vec<Bytes> = response.body.try_collect().await?;
        Ok(chunks.concat())
    }

    #[tokio::test]
    async fn serves_whole_document() {
        let source = MockSource::with_documents([("https://h/a.pdf", b"0123456789".to_vec())]);
        let response = source.fetch(&request("https://h/a.pdf?sig=1", 0, None)).await.unwrap();
        assert_eq!(response.transfer, Transfer::Full);
        assert_eq!(response.content_length, Some(10));
        assert_eq!(collect(response).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn honours_matching_range() {
        let source = MockSource::with_documents([("https://h/a.pdf", b"0123456789".to_vec())]);
        let response = source.fetch(&request("https://h/a.pdf", 4, Some("\"v0\""))).await.unwrap();
        assert_eq!(response.transfer, Transfer::Partial);
        assert_eq!(collect(response).await.unwrap(), b"456789");
        // Stale validator: whole document again.
        let response = source.fetch(&request("https://h/a.pdf", 4, Some("\"stale\""))).await.unwrap();
        assert_eq!(response.transfer, Transfer::Full);
    }

    #[tokio::test]
    async fn range_past_the_end_is_unsatisfiable() {
        let source = MockSource::with_documents([("https://h/a.pdf", b"0123456789".to_vec())]);
        let response = source.fetch(&request("https://h/a.pdf", 10, Some("\"v0\""))).await.unwrap();
        assert_eq!(response.transfer, Transfer::Unsatisfiable);
        assert_eq!(response.content_length, Some(0));
        assert!(collect(response).await.unwrap().is_empty());
        // A changed document is sent whole instead.
        let response = source.fetch(&request("https://h/a.pdf", 10, Some("\"stale\""))).await.unwrap();
        assert_eq!(response.transfer, Transfer::Full);
    }

    #[tokio::test]
    async fn unknown_document_is_404() {
        let source = MockSource::with_documents([("https://h/a.pdf", b"x".to_vec())]);
        let err = source.fetch(&request("https://h/b.pdf", 0, None)).await.err().unwrap();
        assert_eq!(*err, ErrorKind::HttpStatus(404));
    }

    #[tokio::test]
    async fn interruption_is_one_shot() {
        let source = MockSource::with_documents([("https://h/a.pdf", b"0123456789".to_vec())]).with_chunk_size(2);
        source.interrupt_after("https://h/a.pdf", 4).await;
        let response = source.fetch(&request("https://h/a.pdf", 0, None)).await.unwrap();
        assert!(collect(response).await.is_err());
        let response = source.fetch(&request("https://h/a.pdf", 0, None)).await.unwrap();
        assert_eq!(collect(response).await.unwrap(), b"0123456789");
    }
}
