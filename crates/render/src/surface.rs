//! The embedded surface that actually draws pages.
//!
//! A [`RenderSurface`] is a sandboxed viewer (a web view, a canvas, a headless
//! renderer) that the host drives one page at a time. It keeps the pixels; the
//! host only tracks which pages exist and in what state.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::path::Path;
use url::Url;

/// What the surface should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceSource {
    /// A `file://` URL of the cached document.
    Url(String),
    /// A self-contained HTML page with the document embedded.
    Inline(String),
}

impl SurfaceSource {
    /// `file://` URL for an absolute local path.
    pub fn from_path(path: &Path) -> Result<Self> {
        match Url::from_file_path(path) {
            Ok(url) => Ok(Self::Url(url.into())),
            Err(()) => exn::bail!(ErrorKind::LoadFailed(format!("not an absolute path: {}", path.display()))),
        }
    }
}

/// Learned about the document once it has loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentInfo {
    /// `None` when the surface can't tell without rendering every page.
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedPage {
    pub page: u32,
    /// Rendered size in CSS pixels, at the requested scale.
    pub width: f32,
    pub height: f32,
}

/// Visible area of the surface, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 390.0, height: 844.0 }
    }
}

#[async_trait]
pub trait RenderSurface {
    /// Open a document. Nothing is rendered yet.
    async fn load(&mut self, source: SurfaceSource) -> Result<DocumentInfo>;

    /// Render one page (1-based) at `scale`.
    ///
    /// Past the end of the document this fails with
    /// [`ErrorKind::PageOutOfRange`](crate::error::ErrorKind::PageOutOfRange),
    /// which is how documents of unknown length are measured.
    async fn render_page(&mut self, page: u32, scale: f32) -> Result<RenderedPage>;

    /// Release the document and everything drawn from it. Must be idempotent.
    ///
    /// Synchronous so that it can run from `Drop`.
    fn teardown(&mut self);
}

#[async_trait]
impl<S: RenderSurface + Send + ?Sized> RenderSurface for Box<S> {
    async fn load(&mut self, source: SurfaceSource) -> Result<DocumentInfo> {
        (**self).load(source).await
    }

    async fn render_page(&mut self, page: u32, scale: f32) -> Result<RenderedPage> {
        (**self).render_page(page, scale).await
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}
