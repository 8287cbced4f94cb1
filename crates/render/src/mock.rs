//! Scriptable render surface for testing.

use crate::error::{ErrorKind, Result};
use crate::surface::{DocumentInfo, RenderSurface, RenderedPage, SurfaceSource};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Record {
    loaded: Vec<SurfaceSource>,
    rendered: Vec<u32>,
    teardowns: usize,
}

/// Read-only view of what a [`MockSurface`] was asked to do, usable after the
/// surface itself has been handed to a host.
#[derive(Debug, Clone)]
pub struct SurfaceProbe(Arc<Mutex<Record>>);

impl SurfaceProbe {
    fn with<T>(&self, f: impl FnOnce(&Record) -> T) -> T {
        f(&self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Every page render attempted, in call order.
    pub fn rendered(&self) -> Vec<u32> {
        self.with(|r| r.rendered.clone())
    }

    pub fn loaded(&self) -> Vec<SurfaceSource> {
        self.with(|r| r.loaded.clone())
    }

    pub fn teardowns(&self) -> usize {
        self.with(|r| r.teardowns)
    }
}

/// A surface serving a fixed number of identical pages.
#[derive(Debug)]
pub struct MockSurface {
    pages: u32,
    report_length: bool,
    failing: BTreeSet<u32>,
    fail_load: bool,
    record: Arc<Mutex<Record>>,
}

impl MockSurface {
    pub fn with_pages(pages: u32) -> Self {
        Self {
            pages,
            report_length: true,
            failing: BTreeSet::new(),
            fail_load: false,
            record: Arc::default(),
        }
    }

    /// Don't report a page count on load.
    pub fn unknown_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    pub fn failing_pages(mut self, pages: impl IntoIterator<Item = u32>) -> Self {
        self.failing.extend(pages);
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn probe(&self) -> SurfaceProbe {
        SurfaceProbe(Arc::clone(&self.record))
    }

    fn record(&self, f: impl FnOnce(&mut Record)) {
        f(&mut self.record.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

#[async_trait]
impl RenderSurface for MockSurface {
    async fn load(&mut self, source: SurfaceSource) -> Result<DocumentInfo> {
        self.record(|r| r.loaded.push(source));
        if self.fail_load {
            exn::bail!(ErrorKind::LoadFailed("invalid pdf structure".to_string()));
        }
        Ok(DocumentInfo { page_count: self.report_length.then_some(self.pages) })
    }

    async fn render_page(&mut self, page: u32, scale: f32) -> Result<RenderedPage> {
        if page == 0 || page > self.pages {
            exn::bail!(ErrorKind::PageOutOfRange(page));
        }
        self.record(|r| r.rendered.push(page));
        if self.failing.contains(&page) {
            exn::bail!(ErrorKind::PageFailed { page, reason: "corrupt page stream".to_string() });
        }
        Ok(RenderedPage { page, width: 612.0 * scale, height: 792.0 * scale })
    }

    fn teardown(&mut self) {
        self.record(|r| r.teardowns += 1);
    }
}
