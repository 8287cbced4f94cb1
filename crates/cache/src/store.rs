//! On-disk layout of the cache root.
//!
//! ```text
//! <root>/
//!   book.pdf              completed documents, named by cache key
//!   .partial/book.pdf     bytes of an unfinished transfer
//!   .partial/book.pdf.json   resume validators for that transfer
//!   .origin/book.pdf.json    which URL path a completed document came from
//! ```
//!
//! Keys never start with a dot, so the sidecar directories cannot collide
//! with a document.

use crate::error::{ErrorKind, Result};
use crate::source::Validators;
use crate::{CacheEntry, CacheKey};
use exn::{OptionExt, ResultExt};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::BufWriter;

const PARTIAL_DIR: &str = ".partial";
const ORIGIN_DIR: &str = ".origin";
const WRITE_BUFFER: usize = 1 << 16;

/// Sidecar describing where bytes on disk came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Sidecar {
    /// URL with query string and fragment removed.
    pub source: String,
    #[serde(flatten)]
    pub validators: Validators,
}

/// Where an interrupted transfer can pick up from.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ResumePoint {
    pub offset: u64,
    pub validators: Validators,
}

#[derive(Debug, Clone)]
pub(crate) struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::Storage { path: root, reason: "cache root must be absolute".to_string() });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    pub fn partial_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(PARTIAL_DIR).join(key.as_str())
    }

    fn partial_sidecar(&self, key: &CacheKey) -> PathBuf {
        self.root.join(PARTIAL_DIR).join(format!("{key}.json"))
    }

    fn origin_sidecar(&self, key: &CacheKey) -> PathBuf {
        self.root.join(ORIGIN_DIR).join(format!("{key}.json"))
    }

    /// Create the root and sidecar directories.
    pub async fn prepare(&self) -> Result<()> {
        for dir in [self.root.clone(), self.root.join(PARTIAL_DIR), self.root.join(ORIGIN_DIR)] {
            fs::create_dir_all(&dir).await.map_err(|e| ErrorKind::storage(&dir, e))?;
        }
        Ok(())
    }

    /// A completed document for `key`, if one exists.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                Ok(Some(CacheEntry { cache_key: key.clone(), local_path: path, size_bytes: meta.len() }))
            },
            Ok(_) => Ok(None),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(ErrorKind::storage(&path, e)),
        }
    }

    /// The source a completed document was downloaded from.
    pub async fn origin(&self, key: &CacheKey) -> Option<String> {
        read_sidecar(&self.origin_sidecar(key)).await.map(|sidecar| sidecar.source)
    }

    /// How much of `source` is already on disk for `key`.
    ///
    /// Partial bytes are only trusted when their sidecar names the same source
    /// and carries a validator; anything else is discarded so a changed
    /// document can never be spliced onto a stale prefix.
    pub async fn resume_point(&self, key: &CacheKey, source: &str) -> Result<ResumePoint> {
        let partial = self.partial_path(key);
        let length = match fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(ResumePoint::default()),
            Err(e) => return Err(ErrorKind::storage(&partial, e)),
        };
        match read_sidecar(&self.partial_sidecar(key)).await {
            Some(sidecar) if sidecar.source == source && !sidecar.validators.is_empty() && length > 0 => {
                Ok(ResumePoint { offset: length, validators: sidecar.validators })
            },
            _ => {
                tracing::debug!(key = %key, bytes = length, "Discarding partial download without usable validators");
                self.discard_partial(key).await?;
                Ok(ResumePoint::default())
            },
        }
    }

    pub async fn record_partial(&self, key: &CacheKey, sidecar: &Sidecar) -> Result<()> {
        write_sidecar(&self.partial_sidecar(key), sidecar).await
    }

    /// Open the partial file for writing, appending to resumed bytes or
    /// starting over.
    pub async fn open_partial(&self, key: &CacheKey, append: bool) -> Result<BufWriter<File>> {
        let path = self.partial_path(key);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| ErrorKind::storage(&path, e))?;
        Ok(BufWriter::with_capacity(WRITE_BUFFER, file))
    }

    /// Move a finished partial file into place. The document only becomes
    /// visible to [`lookup`](Self::lookup) here.
    pub async fn commit(&self, key: &CacheKey, source: &str) -> Result<CacheEntry> {
        let partial = self.partial_path(key);
        let target = self.entry_path(key);
        fs::rename(&partial, &target).await.map_err(|e| ErrorKind::storage(&target, e))?;
        remove_if_exists(&self.partial_sidecar(key)).await?;
        let origin = Sidecar { source: source.to_string(), validators: Validators::default() };
        // Losing the origin only weakens collision detection; the document is fine.
        if let Err(err) = write_sidecar(&self.origin_sidecar(key), &origin).await {
            tracing::warn!(key = %key, error = %*err, "Could not record document origin");
        }
        self.lookup(key)
            .await?
            .ok_or_raise(|| ErrorKind::Storage { path: target, reason: "committed file disappeared".to_string() })
    }

    pub async fn discard_partial(&self, key: &CacheKey) -> Result<()> {
        remove_if_exists(&self.partial_path(key)).await?;
        remove_if_exists(&self.partial_sidecar(key)).await
    }

    /// Remove the whole cache root. Missing roots are not an error.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(ErrorKind::storage(&self.root, e)),
        }
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(ErrorKind::storage(path, e)),
    }
}

async fn read_sidecar(path: &Path) -> Option<Sidecar> {
    let bytes = fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(sidecar) => Some(sidecar),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Ignoring unreadable sidecar");
            None
        },
    }
}

async fn write_sidecar(path: &Path, sidecar: &Sidecar) -> Result<()> {
    let bytes = serde_json::to_vec(sidecar)
        .or_raise(|| ErrorKind::Storage { path: path.to_path_buf(), reason: "could not encode sidecar".to_string() })?;
    fs::write(path, bytes).await.map_err(|e| ErrorKind::storage(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn key(name: &str) -> CacheKey {
        CacheKey::from_url(name).unwrap()
    }

    async fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("book_cache")).unwrap();
        store.prepare().await.unwrap();
        (dir, store)
    }

    async fn write_partial(store: &CacheStore, key: &CacheKey, data: &[u8]) {
        let mut file = store.open_partial(key, false).await.unwrap();
        file.write_all(data).await.unwrap();
        file.flush().await.unwrap();
    }

    #[test]
    fn relative_root_is_rejected() {
        let err = CacheStore::new("relative").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage { .. }));
    }

    #[tokio::test]
    async fn partial_files_are_invisible_until_committed() {
        let (_dir, store) = store().await;
        let key = key("book.pdf");
        write_partial(&store, &key, b"%PDF").await;
        assert_eq!(store.lookup(&key).await.unwrap(), None);
        let entry = store.commit(&key, "https://h/book.pdf").await.unwrap();
        assert_eq!(entry.size_bytes, 4);
        assert_eq!(store.lookup(&key).await.unwrap(), Some(entry));
        assert_eq!(store.origin(&key).await.as_deref(), Some("https://h/book.pdf"));
    }

    #[tokio::test]
    async fn resume_requires_matching_sidecar() {
        let (_dir, store) = store().await;
        let key = key("book.pdf");
        write_partial(&store, &key, b"0123").await;
        let sidecar = Sidecar {
            source: "https://h/book.pdf".to_string(),
            validators: Validators { etag: Some("\"v1\"".to_string()), last_modified: None },
        };
        store.record_partial(&key, &sidecar).await.unwrap();
        let point = store.resume_point(&key, "https://h/book.pdf").await.unwrap();
        assert_eq!(point.offset, 4);
        assert_eq!(point.validators, sidecar.validators);

        // Different source: the partial bytes are thrown away.
        let point = store.resume_point(&key, "https://other/book.pdf").await.unwrap();
        assert_eq!(point, ResumePoint::default());
        assert!(!store.partial_path(&key).exists());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let (_dir, store) = store().await;
        write_partial(&store, &key("a.pdf"), b"a").await;
        store.clear().await.unwrap();
        assert!(!store.root().exists());
        store.clear().await.unwrap();
    }
}
