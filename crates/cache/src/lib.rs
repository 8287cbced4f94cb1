//! Local document cache.
//!
//! Remote documents are stored under a single cache root, one file per
//! [`CacheKey`] (the sanitized basename of the document URL). A document is
//! either fully present or absent: bytes are streamed into a partial file and
//! only renamed into place once the transfer completes.
//!
//! # Concurrency
//! The [`CacheManager`] keeps at most one transfer per key. Callers that ask
//! for a key while it is downloading attach to the running transfer and see
//! the same progress and the same outcome. The transfer lives exactly as long
//! as somebody is waiting for it: drop every caller's future and it stops,
//! leaving the partial file behind for the next attempt to resume.

mod download;
mod entry;
pub mod error;
mod key;
pub mod source;
mod store;

pub use crate::entry::{CacheEntry, DownloadSession, DownloadState, Progress};
use crate::error::{ErrorKind, Result};
pub use crate::key::CacheKey;
use crate::source::{HttpSource, SourceHandle};
use crate::store::CacheStore;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use lectern_config::CacheConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tracing::instrument;

type Outcome = std::result::Result<CacheEntry, ErrorKind>;
type SharedDownload = Shared<BoxFuture<'static, Outcome>>;

struct InFlight {
    id: u64,
    download: WeakShared<BoxFuture<'static, Outcome>>,
    progress: watch::Receiver<DownloadSession>,
}

struct Inner {
    store: CacheStore,
    source: SourceHandle,
    inflight: Mutex<HashMap<CacheKey, InFlight>>,
    next_id: AtomicU64,
}

/// Makes remote documents available as local files.
///
/// Cheap to clone; clones share the same in-flight downloads.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("root", &self.inner.store.root())
            .field("source", &self.inner.source.name())
            .finish()
    }
}

impl CacheManager {
    /// Create a manager storing documents under `root`, which must be absolute.
    pub fn new(root: impl Into<PathBuf>, source: SourceHandle) -> Result<Self> {
        let inner = Inner {
            store: CacheStore::new(root)?,
            source,
            inflight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Create a manager downloading over HTTP(S), as configured.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let source = HttpSource::new(config)?;
        Self::new(&config.root, Arc::new(source))
    }

    pub fn root(&self) -> &Path {
        self.inner.store.root()
    }

    /// Return the local copy of `url`, downloading it first if necessary.
    ///
    /// `hint` overrides the file name derived from the URL.
    pub async fn ensure_cached(&self, url: &str, hint: Option<&str>) -> Result<CacheEntry> {
        self.ensure_cached_with_progress(url, hint, |_| {}).await
    }

    /// Like [`ensure_cached`](Self::ensure_cached), calling `on_progress` as the
    /// download advances.
    ///
    /// The last update always has a terminal state. Updates may be coalesced
    /// but never go backwards.
    #[instrument(level = "debug", skip(self, url, on_progress), fields(url = download::redact(url)))]
    pub async fn ensure_cached_with_progress(
        &self,
        url: &str,
        hint: Option<&str>,
        mut on_progress: impl FnMut(&DownloadSession),
    ) -> Result<CacheEntry> {
        let key = CacheKey::resolve(url, hint)?;
        if let Some(entry) = self.inner.store.lookup(&key).await? {
            tracing::debug!(key = %key, "Cache hit");
            self.warn_on_collision(&key, url).await;
            let mut session = DownloadSession::pending(key);
            session.complete(entry.size_bytes);
            on_progress(&session);
            return Ok(entry);
        }

        let (mut download, mut progress) = self.attach(key, url).await;
        let mut seen: Option<DownloadSession> = None;
        let mut watching = true;
        let outcome = loop {
            tokio::select! {
                outcome = &mut download => break outcome,
                changed = progress.changed(), if watching => match changed {
                    Ok(()) => {
                        let session = progress.borrow_and_update().clone();
                        on_progress(&session);
                        seen = Some(session);
                    },
                    // The transfer is finishing; its outcome is moments away.
                    Err(_) => watching = false,
                },
            }
        };
        let last = progress.borrow().clone();
        if seen.as_ref() != Some(&last) {
            on_progress(&last);
        }
        outcome.map_err(exn::Exn::from)
    }

    /// Join the running download for `key`, or start one.
    async fn attach(&self, key: CacheKey, url: &str) -> (SharedDownload, watch::Receiver<DownloadSession>) {
        let mut inflight = self.inner.inflight.lock().await;
        if let Some(running) = inflight.get(&key)
            && let Some(download) = running.download.upgrade()
        {
            tracing::debug!(key = %key, "Joining in-flight download");
            return (download, running.progress.clone());
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(DownloadSession::pending(key.clone()));
        let inner = Arc::clone(&self.inner);
        let url = url.to_string();
        let task_key = key.clone();
        let download = async move {
            let result = download::download(&inner.store, inner.source.as_ref(), &task_key, &url, &tx).await;
            {
                let mut inflight = inner.inflight.lock().await;
                if inflight.get(&task_key).is_some_and(|running| running.id == id) {
                    inflight.remove(&task_key);
                }
            }
            // Attached callers share the kind; the full error tree is logged here.
            result.map_err(|err| {
                tracing::warn!(key = %task_key, url = download::redact(&url), error = ?err, "Download failed");
                tx.send_modify(DownloadSession::fail);
                (*err).clone()
            })
        }
        .boxed()
        .shared();

        // A freshly created `Shared` always has a live strong reference: `download`.
        if let Some(weak) = download.downgrade() {
            inflight.insert(key, InFlight { id, download: weak, progress: rx.clone() });
        }
        (download, rx)
    }

    async fn warn_on_collision(&self, key: &CacheKey, url: &str) {
        let requested = download::redact(url);
        if let Some(origin) = self.inner.store.origin(key).await
            && origin != requested
        {
            tracing::warn!(
                key = %key,
                cached_from = %origin,
                requested = %requested,
                "Different documents share a cache key; serving the cached copy"
            );
        }
    }

    /// Look up a cached document by file name (or URL) without any network
    /// access.
    pub async fn is_cached(&self, hint: &str) -> Result<Option<CacheEntry>> {
        let key = CacheKey::from_hint(hint)?;
        self.inner.store.lookup(&key).await
    }

    /// Delete every cached document, including partial downloads.
    ///
    /// Deleting an already-empty cache is not an error.
    pub async fn clear_cache(&self) -> Result<()> {
        tracing::info!(root = %self.root().display(), "Clearing document cache");
        self.inner.store.clear().await
    }

    /// Keys with a download currently in progress.
    pub async fn active_downloads(&self) -> Vec<CacheKey> {
        let inflight = self.inner.inflight.lock().await;
        let mut keys: Vec<CacheKey> = inflight
            .iter()
            .filter(|(_, running)| running.download.upgrade().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockSource;
    use std::time::Duration;

    const URL: &str = "https://cdn.example/books/book.pdf";

    fn document(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn manager(source: Arc<MockSource>) -> (tempfile::TempDir, CacheManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(dir.path().join("book_cache"), source).unwrap();
        (dir, manager)
    }

    #[tokio::test]
    async fn downloads_then_serves_from_cache() {
        let source = Arc::new(MockSource::with_documents([(URL, document(40))]));
        let (_dir, cache) = manager(Arc::clone(&source));

        let entry = cache.ensure_cached(&format!("{URL}?token=a"), None).await.unwrap();
        assert_eq!(entry.cache_key.as_str(), "book.pdf");
        assert_eq!(entry.size_bytes, 40);
        assert_eq!(std::fs::read(&entry.local_path).unwrap(), document(40));

        // Rotated token, same file, no network.
        let again = cache.ensure_cached(&format!("{URL}?token=b"), None).await.unwrap();
        assert_eq!(again, entry);
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(cache.is_cached("book.pdf").await.unwrap(), Some(entry));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_requests_share_one_download() {
        let source = Arc::new(MockSource::with_documents([(URL, document(64))]).held());
        let (_dir, cache) = manager(Arc::clone(&source));

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.ensure_cached(URL, None).await }
        });
        let second = tokio::spawn({
            let cache = cache.clone();
            async move { cache.ensure_cached(URL, Some("book.pdf")).await }
        });
        while source.fetch_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        // Give the second caller a chance to attach before the transfer runs.
        tokio::task::yield_now().await;
        assert_eq!(cache.active_downloads().await, vec![CacheKey::from_url(URL).unwrap()]);
        source.release(1);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(source.fetch_count(), 1);
        assert!(cache.active_downloads().await.is_empty());
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_completed() {
        let source = Arc::new(MockSource::with_documents([(URL, document(100))]).with_chunk_size(7));
        let (_dir, cache) = manager(source);

        let mut updates = Vec::new();
        cache.ensure_cached_with_progress(URL, None, |session| updates.push(session.clone())).await.unwrap();

        let fractions: Vec<f64> = updates
            .iter()
            .map(|session| match session.progress {
                Progress::Fraction(fraction) => fraction,
                Progress::Indeterminate => panic!("length was known"),
            })
            .collect();
        assert!(fractions.windows(2).all(|pair| pair[0] <= pair[1]), "{fractions:?}");
        let last = updates.last().unwrap();
        assert_eq!(last.state, DownloadState::Completed);
        assert_eq!(last.progress, Progress::Fraction(1.0));
    }

    #[tokio::test]
    async fn missing_length_reports_indeterminate() {
        let source = Arc::new(MockSource::with_documents([(URL, document(30))]).without_content_length());
        let (_dir, cache) = manager(source);

        let mut updates = Vec::new();
        let entry = cache.ensure_cached_with_progress(URL, None, |session| updates.push(session.clone())).await.unwrap();

        assert_eq!(entry.size_bytes, 30);
        assert!(updates.iter().any(|session| session.progress == Progress::Indeterminate));
        assert_eq!(updates.last().unwrap().state, DownloadState::Completed);
    }

    #[tokio::test]
    async fn interrupted_download_resumes_from_partial_bytes() {
        let source = Arc::new(MockSource::with_documents([(URL, document(40))]));
        source.interrupt_after(URL, 12).await;
        let (_dir, cache) = manager(Arc::clone(&source));

        let mut states = Vec::new();
        let err = cache.ensure_cached_with_progress(URL, None, |session| states.push(session.state)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Network(_)));
        assert_eq!(states.last(), Some(&DownloadState::Failed));
        assert_eq!(cache.is_cached("book.pdf").await.unwrap(), None);

        let entry = cache.ensure_cached(URL, None).await.unwrap();
        assert_eq!(std::fs::read(&entry.local_path).unwrap(), document(40));
        let requests = source.requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].offset, 12);
        assert_eq!(requests[1].validators.etag.as_deref(), Some("\"v0\""));
    }

    #[tokio::test]
    async fn changed_document_restarts_from_zero() {
        let source = Arc::new(MockSource::with_documents([(URL, document(40))]));
        source.interrupt_after(URL, 12).await;
        let (_dir, cache) = manager(Arc::clone(&source));
        cache.ensure_cached(URL, None).await.unwrap_err();

        source.replace(URL, b"a different document".to_vec()).await;
        let entry = cache.ensure_cached(URL, None).await.unwrap();
        assert_eq!(std::fs::read(&entry.local_path).unwrap(), b"a different document");
    }

    #[tokio::test]
    async fn http_error_leaves_nothing_behind() {
        let source = Arc::new(MockSource::with_documents([(URL, document(8))]));
        source.fail_with_status(URL, 404).await;
        let (_dir, cache) = manager(source);

        let err = cache.ensure_cached(URL, None).await.unwrap_err();
        assert_eq!(*err, ErrorKind::HttpStatus(404));
        assert!(!err.is_retryable());
        assert_eq!(cache.is_cached("book.pdf").await.unwrap(), None);
        assert!(cache.active_downloads().await.is_empty());
    }

    #[tokio::test]
    async fn dropping_every_caller_cancels_the_download() {
        let source = Arc::new(MockSource::with_documents([(URL, document(16))]).held());
        let (_dir, cache) = manager(Arc::clone(&source));

        let pending = tokio::time::timeout(Duration::from_millis(20), cache.ensure_cached(URL, None)).await;
        assert!(pending.is_err());
        assert!(cache.active_downloads().await.is_empty());

        // The next request starts afresh rather than waiting on the dead one.
        source.release(1);
        cache.ensure_cached(URL, None).await.unwrap();
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn same_basename_from_another_path_is_served_from_cache() {
        let other = "https://mirror.example/series-2/book.pdf";
        let source = Arc::new(MockSource::with_documents([(URL, document(8)), (other, document(9))]));
        let (_dir, cache) = manager(Arc::clone(&source));

        let first = cache.ensure_cached(URL, None).await.unwrap();
        let second = cache.ensure_cached(other, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.fetch_count(), 1);

        // A hint keeps the two apart.
        let distinct = cache.ensure_cached(other, Some("series-2-book.pdf")).await.unwrap();
        assert_eq!(distinct.size_bytes, 9);
    }

    #[tokio::test]
    async fn clear_cache_is_idempotent() {
        let source = Arc::new(MockSource::with_documents([(URL, document(8))]));
        let (_dir, cache) = manager(source);
        cache.ensure_cached(URL, None).await.unwrap();

        cache.clear_cache().await.unwrap();
        assert_eq!(cache.is_cached("book.pdf").await.unwrap(), None);
        cache.clear_cache().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_any_fetch() {
        let source = Arc::new(MockSource::with_documents([(URL, document(8))]));
        let (_dir, cache) = manager(Arc::clone(&source));
        let err = cache.ensure_cached("https://cdn.example/", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
        assert_eq!(source.fetch_count(), 0);
    }
}
