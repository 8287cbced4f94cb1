//! A single transfer from a [`RemoteSource`] into the cache.

use crate::error::{Error, ErrorKind, Result};
use crate::source::{FetchRequest, RemoteSource, Transfer};
use crate::store::{CacheStore, ResumePoint, Sidecar};
use crate::{CacheEntry, CacheKey, DownloadSession};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::instrument;

/// Strip the query string and fragment, which often carry signed-URL secrets.
pub(crate) fn redact(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or_default()
}

/// Download `url` into the cache under `key`, resuming a previous partial
/// transfer when the source still serves the same document.
///
/// Progress is published to `progress` as bytes land on disk. It reads
/// `Completed` before the document appears in the cache, and the document
/// only appears once every byte has been written.
#[instrument(level = "debug", skip_all, fields(key = %key, url = redact(url)))]
pub(crate) async fn download(
    store: &CacheStore,
    source: &(dyn RemoteSource + Send + Sync),
    key: &CacheKey,
    url: &str,
    progress: &watch::Sender<DownloadSession>,
) -> Result<CacheEntry> {
    // Another download may have finished between the caller's check and ours.
    if let Some(entry) = store.lookup(key).await? {
        return Ok(entry);
    }
    store.prepare().await?;
    let origin = redact(url);
    let mut resume = store.resume_point(key, origin).await?;
    let response = loop {
        let request =
            FetchRequest { url: url.to_string(), offset: resume.offset, validators: resume.validators.clone() };
        let response = source.fetch(&request).await?;
        match response.transfer {
            // Typically the partial file already holds every byte.
            Transfer::Unsatisfiable if resume.offset > 0 => {
                tracing::info!(offset = resume.offset, "Nothing left to resume, restarting");
                store.discard_partial(key).await?;
                resume = ResumePoint::default();
            },
            Transfer::Unsatisfiable => exn::bail!(ErrorKind::HttpStatus(416)),
            Transfer::Full | Transfer::Partial => break response,
        }
    };

    let (mut received, append) = match response.transfer {
        Transfer::Partial => (resume.offset, true),
        Transfer::Full | Transfer::Unsatisfiable => (0, false),
    };
    if resume.offset > 0 {
        match append {
            true => tracing::info!(offset = resume.offset, "Resuming download"),
            false => tracing::info!(offset = resume.offset, "Source sent the whole document, restarting"),
        }
    }
    let total = response.content_length.map(|length| length + received);
    store.record_partial(key, &Sidecar { source: origin.to_string(), validators: response.validators }).await?;

    let mut file = store.open_partial(key, append).await?;
    let partial = store.partial_path(key);
    progress.send_if_modified(|session| session.advance(received, total));
    let mut body = response.body;
    let streamed = async {
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(|e| ErrorKind::storage(&partial, e))?;
            received += chunk.len() as u64;
            progress.send_if_modified(|session| session.advance(received, total));
        }
        Ok::<(), Error>(())
    }
    .await;
    // Whatever arrived stays on disk for the next attempt to resume from.
    file.flush().await.map_err(|e| ErrorKind::storage(&partial, e))?;
    drop(file);
    streamed?;

    if let Some(total) = total
        && received != total
    {
        exn::bail!(ErrorKind::Network(format!("transfer ended early: {received} of {total} bytes")));
    }
    progress.send_modify(|session| session.complete(received));
    let entry = store.commit(key, origin).await?;
    tracing::info!(bytes = entry.size_bytes, "Download complete");
    Ok(entry)
}
