//! Cache key derivation.
//!
//! A [`CacheKey`] is the sanitized base filename of a remote document. Query
//! strings and fragments are stripped first, so signed URLs whose tokens rotate
//! on every request still land on the same local file.

use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use percent_encoding::percent_decode_str;
use std::fmt::{Display, Formatter, Result as FmtResult};
use url::Url;

const MAX_LEN: usize = 120;
// Windows refuses these as file stems regardless of extension.
const RESERVED: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8", "com9", "lpt1", "lpt2",
    "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Deterministic, filesystem-safe identifier of a cached document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a remote URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use lectern_cache::CacheKey;
    ///
    /// let a = CacheKey::from_url("https://cdn.example/books/book.pdf?token=A").unwrap();
    /// let b = CacheKey::from_url("https://cdn.example/books/book.pdf?token=B").unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str(), "book.pdf");
    /// // Nothing left after stripping the query.
    /// assert!(CacheKey::from_url("https://cdn.example/?id=1").is_err());
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let base = match Url::parse(url) {
            // `https://host` has no path at all; don't mistake the host for a basename.
            Ok(parsed) if !parsed.cannot_be_a_base() => parsed
                .path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                .map(str::to_string),
            // Bare filenames and Windows paths.
            _ => {
                let path = url.split(['?', '#']).next().unwrap_or_default();
                path.trim_end_matches(['/', '\\']).rsplit(['/', '\\']).next().map(str::to_string)
            },
        };
        let Some(base) = base.filter(|b| !b.is_empty()) else {
            exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
        };
        Self::sanitized(&percent_decode_str(&base).decode_utf8_lossy())
            .ok_or_raise(|| ErrorKind::InvalidUrl(url.to_string()))
    }

    /// Derive the key from a caller-supplied hint, which may be a bare
    /// filename or a full URL.
    pub fn from_hint(hint: &str) -> Result<Self> {
        Self::from_url(hint.trim())
    }

    /// Prefer an explicit hint, falling back to the URL's basename.
    ///
    /// URLs whose basename is meaningless (`.../uc?export=download&id=...`)
    /// need a hint, otherwise every such document shares one key.
    pub fn resolve(url: &str, hint: Option<&str>) -> Result<Self> {
        match hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => Self::from_hint(hint),
            None => Self::from_url(url),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn sanitized(input: &str) -> Option<Self> {
        #[inline]
        fn is_allowed(c: char) -> bool {
            matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | ' ')
        }
        // Replace runs of disallowed characters with a single underscore.
        let mut out = String::with_capacity(input.len());
        let mut last_was_us = false;
        for ch in input.chars() {
            if is_allowed(ch) {
                out.push(ch);
                last_was_us = false;
            } else if !last_was_us {
                out.push('_');
                last_was_us = true;
            }
        }
        // Leading dots would hide the file (and clash with our own sidecar
        // directories); trailing dots/spaces upset Windows.
        let trimmed = out.trim_matches(|c: char| c == ' ' || c == '.');
        if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
            return None;
        }
        let (stem, ext) = match trimmed.rfind('.') {
            Some(idx) if idx > 0 => (&trimmed[..idx], &trimmed[idx..]),
            _ => (trimmed, ""),
        };
        let mut stem = stem.to_string();
        if RESERVED.contains(&stem.to_ascii_lowercase().as_str()) {
            stem.push('_');
        }
        // Cap the length, keeping the extension whenever it fits.
        let ext = if ext.len() >= MAX_LEN / 2 { &ext[..MAX_LEN / 2] } else { ext };
        stem.truncate(MAX_LEN - ext.len());
        Some(Self(format!("{stem}{ext}")))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
