//! HTTP(S) document source.

use super::{FetchRequest, RemoteResponse, RemoteSource, Transfer, Validators};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use futures::StreamExt;
use lectern_config::CacheConfig;
use reqwest::header::{ETAG, HeaderMap, HeaderName, IF_RANGE, LAST_MODIFIED, RANGE};
use reqwest::{Client, StatusCode, redirect::Policy};
use std::time::Duration;

/// Fetches documents over HTTP(S) with `reqwest`.
///
/// Range requests are sent with an `If-Range` validator so a document that
/// changed upstream is re-sent whole instead of being spliced onto a stale
/// prefix.
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .redirect(Policy::limited(config.max_redirects))
            .build()
            .or_raise(|| ErrorKind::Network("could not build http client".to_string()))?;
        Ok(Self { client })
    }

    fn validators(headers: &HeaderMap) -> Validators {
        let header = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok()).map(String::from);
        Validators { etag: header(ETAG), last_modified: header(LAST_MODIFIED) }
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<RemoteResponse> {
        let mut rq = self.client.get(&request.url);
        if request.offset > 0 {
            rq = rq.header(RANGE, format!("bytes={}-", request.offset));
            if let Some(validator) = request.validators.if_range() {
                rq = rq.header(IF_RANGE, validator);
            }
        }
        let response = rq
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .or_raise(|| ErrorKind::Network("request failed".to_string()))?;
        let status = response.status();
        let transfer = match status {
            StatusCode::PARTIAL_CONTENT if request.offset > 0 => Transfer::Partial,
            StatusCode::RANGE_NOT_SATISFIABLE if request.offset > 0 => Transfer::Unsatisfiable,
            status if status.is_success() => Transfer::Full,
            status => exn::bail!(ErrorKind::HttpStatus(status.as_u16())),
        };
        tracing::debug!(status = status.as_u16(), length = ?response.content_length(), "Response received");
        let validators = Self::validators(response.headers());
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(reqwest::Error::without_url).or_raise(|| ErrorKind::Network("transfer interrupted".to_string()))
            })
            .boxed();
        Ok(RemoteResponse { transfer, content_length, validators, body })
    }
}
