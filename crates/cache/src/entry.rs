//! Cache entries and download progress.

use crate::CacheKey;
use std::path::PathBuf;

/// A document that is fully present in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub cache_key: CacheKey,
    /// Absolute path of the cached file.
    pub local_path: PathBuf,
    pub size_bytes: u64,
}

/// How far along a download is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// Known total: a fraction in `0.0..=1.0`.
    Fraction(f64),
    /// The server did not say how large the document is. Still a signal that
    /// bytes are arriving, just not how many remain.
    Indeterminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Observable state of the single in-flight download for a [`CacheKey`].
///
/// Every caller attached to the same download sees the same sequence of
/// sessions, and the reported fraction never goes backwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSession {
    pub cache_key: CacheKey,
    pub progress: Progress,
    pub state: DownloadState,
    /// Bytes present on disk, including any resumed prefix.
    pub received_bytes: u64,
    /// Total document size when the server reported one.
    pub total_bytes: Option<u64>,
}

impl DownloadSession {
    pub(crate) fn pending(cache_key: CacheKey) -> Self {
        Self {
            cache_key,
            progress: Progress::Fraction(0.0),
            state: DownloadState::Pending,
            received_bytes: 0,
            total_bytes: None,
        }
    }

    /// Record newly received bytes. Returns `true` when something observable
    /// changed.
    pub(crate) fn advance(&mut self, received: u64, total: Option<u64>) -> bool {
        let before = (self.progress, self.state, self.received_bytes);
        self.state = DownloadState::Downloading;
        self.received_bytes = self.received_bytes.max(received);
        self.total_bytes = total;
        self.progress = match (total, self.progress) {
            (Some(total), Progress::Fraction(previous)) if total > 0 => {
                let fraction = (self.received_bytes as f64 / total as f64).clamp(0.0, 1.0);
                Progress::Fraction(fraction.max(previous))
            },
            // Once indeterminate, stay indeterminate rather than jump around.
            (Some(_), Progress::Indeterminate) | (None, _) => Progress::Indeterminate,
            (Some(_), fraction) => fraction,
        };
        before != (self.progress, self.state, self.received_bytes)
    }

    pub(crate) fn complete(&mut self, size: u64) {
        self.state = DownloadState::Completed;
        self.progress = Progress::Fraction(1.0);
        self.received_bytes = size;
        self.total_bytes = Some(size);
    }

    pub(crate) fn fail(&mut self) {
        self.state = DownloadState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> DownloadSession {
        DownloadSession::pending(CacheKey::from_url("book.pdf").unwrap())
    }

    #[test]
    fn fraction_is_monotonic() {
        let mut s = session();
        assert!(s.advance(50, Some(100)));
        assert_eq!(s.progress, Progress::Fraction(0.5));
        // A stale, smaller count never moves progress backwards.
        assert!(!s.advance(20, Some(100)));
        assert_eq!(s.progress, Progress::Fraction(0.5));
        s.advance(100, Some(100));
        assert_eq!(s.progress, Progress::Fraction(1.0));
    }

    #[test]
    fn missing_length_is_indeterminate_but_downloading() {
        let mut s = session();
        s.advance(10, None);
        assert_eq!(s.progress, Progress::Indeterminate);
        assert_eq!(s.state, DownloadState::Downloading);
        s.complete(42);
        assert_eq!(s.progress, Progress::Fraction(1.0));
        assert!(s.state.is_terminal());
    }
}
