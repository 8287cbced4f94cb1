//! Batch, scroll-driven rendering of one document.
//!
//! Only the first batch is rendered when the document is mounted. Every later
//! batch waits for the reader to scroll near the end of what has already been
//! rendered, so memory grows with what the reader has actually looked at, not
//! with the size of the document.

use crate::error::{ErrorKind, Result};
use crate::surface::{RenderSurface, RenderedPage, SurfaceSource, Viewport};
use lectern_bridge::{BridgeSender, Event};
use lectern_config::RenderConfig;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Loading,
    Ready,
    RenderingBatch,
    WaitingForScroll,
    Complete,
    Failed,
}

impl RenderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::RenderingBatch => "rendering",
            Self::WaitingForScroll => "waiting for scroll",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// What occupies a page's place in the layout.
#[derive(Debug, Clone, PartialEq)]
pub enum PageSlot {
    /// Space reserved ahead of rendering, so layout doesn't jump.
    Placeholder { height: f32 },
    Rendered(RenderedPage),
    /// Rendering failed; shown as an inline marker.
    Unavailable { reason: String },
}

/// Reported by the surface as the reader scrolls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollSignal {
    /// Scroll geometry, in CSS pixels.
    Proximity { offset: f32, viewport_height: f32, content_height: f32 },
    /// Page `n` came into view.
    PageVisible(u32),
}

/// Progress through one document.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSession {
    /// Next page to render, 1-based. Never decreases.
    pub page_cursor: u32,
    pub batch_size: u32,
    /// Known up front, or learned when rendering runs off the end.
    pub total_pages: Option<u32>,
    pub state: RenderState,
    /// One slot per page reserved so far, in page order. A batch reserves
    /// all of its placeholders before the first of its pages is rendered.
    pub slots: Vec<PageSlot>,
}

impl RenderSession {
    fn new(batch_size: u32) -> Self {
        Self { page_cursor: 1, batch_size, total_pages: None, state: RenderState::Idle, slots: Vec::new() }
    }

    /// Pages attempted so far.
    pub fn rendered(&self) -> u32 {
        self.page_cursor - 1
    }

    /// Whether another batch could still be rendered.
    pub fn has_more(&self) -> bool {
        !self.state.is_terminal() && self.total_pages.is_none_or(|total| self.page_cursor <= total)
    }

    pub fn slot(&self, page: u32) -> Option<&PageSlot> {
        self.slots.get(page.checked_sub(1)? as usize)
    }
}

/// Drives a [`RenderSurface`] through one document.
pub struct RenderHost<S> {
    surface: S,
    session: RenderSession,
    viewport: Viewport,
    scale: f32,
    prefetch_viewports: f32,
    visible_trigger_pages: u32,
    bridge: BridgeSender,
    torn_down: bool,
}

impl<S: RenderSurface + Send> RenderHost<S> {
    pub fn new(surface: S, config: &RenderConfig, viewport: Viewport, bridge: BridgeSender) -> Self {
        Self {
            surface,
            session: RenderSession::new(config.batch_size.max(1)),
            viewport,
            scale: config.scale,
            prefetch_viewports: config.prefetch_viewports,
            visible_trigger_pages: config.visible_trigger_pages.max(1),
            bridge,
            torn_down: false,
        }
    }

    pub fn session(&self) -> &RenderSession {
        &self.session
    }

    pub fn state(&self) -> RenderState {
        self.session.state
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    fn ensure(&self, action: &'static str, allowed: &[RenderState]) -> Result<()> {
        if self.torn_down {
            exn::bail!(ErrorKind::SurfaceGone);
        }
        if !allowed.contains(&self.session.state) {
            exn::bail!(ErrorKind::InvalidState { action, state: self.session.state.name() });
        }
        Ok(())
    }

    /// Load the document and render the first batch.
    ///
    /// A document that fails to load leaves the session `Failed`; there is no
    /// partial recovery from that.
    #[instrument(level = "debug", skip_all)]
    pub async fn mount(&mut self, source: SurfaceSource) -> Result<()> {
        self.ensure("mount", &[RenderState::Idle])?;
        self.session.state = RenderState::Loading;
        let info = match self.surface.load(source).await {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!(error = %*err, "Document failed to load");
                self.session.state = RenderState::Failed;
                self.bridge.post(Event::DocumentFailed { reason: (*err).to_string() });
                let reason = match &*err {
                    ErrorKind::LoadFailed(reason) => reason.clone(),
                    other => other.to_string(),
                };
                exn::bail!(ErrorKind::LoadFailed(reason));
            },
        };
        tracing::debug!(pages = ?info.page_count, "Document loaded");
        self.bridge.post(Event::DocumentLoaded { pages: info.page_count });
        self.session.total_pages = info.page_count;
        self.session.state = RenderState::Ready;
        if info.page_count == Some(0) {
            self.session.state = RenderState::Complete;
            return Ok(());
        }
        self.render_next_batch().await
    }

    /// React to the reader scrolling. Returns `true` when the signal started
    /// a batch.
    ///
    /// Signals that arrive while a batch is rendering, or after the document
    /// is complete, are ignored.
    pub async fn on_scroll(&mut self, signal: ScrollSignal) -> Result<bool> {
        if self.torn_down {
            exn::bail!(ErrorKind::SurfaceGone);
        }
        if self.session.state != RenderState::WaitingForScroll || !self.near_end(signal) {
            return Ok(false);
        }
        self.render_next_batch().await?;
        Ok(true)
    }

    fn near_end(&self, signal: ScrollSignal) -> bool {
        match signal {
            ScrollSignal::Proximity { offset, viewport_height, content_height } => {
                let remaining = content_height - (offset + viewport_height);
                remaining <= self.prefetch_viewports * viewport_height
            },
            ScrollSignal::PageVisible(page) => {
                page > self.session.rendered().saturating_sub(self.visible_trigger_pages)
            },
        }
    }

    /// Reserve placeholders for the next `batch_size` pages, then render them
    /// one at a time, in order.
    #[instrument(level = "debug", skip(self), fields(first = self.session.page_cursor))]
    async fn render_next_batch(&mut self) -> Result<()> {
        self.ensure("render", &[RenderState::Ready, RenderState::WaitingForScroll])?;
        self.session.state = RenderState::RenderingBatch;
        let first = self.session.page_cursor;
        let mut last = first.saturating_add(self.session.batch_size - 1);
        if let Some(total) = self.session.total_pages {
            last = last.min(total);
        }

        let placeholder = PageSlot::Placeholder { height: self.viewport.height };
        self.session.slots.resize(last as usize, placeholder);
        self.bridge.post(Event::BatchStarted { first, last });

        for page in first..=last {
            let index = page as usize - 1;
            match self.surface.render_page(page, self.scale).await {
                Ok(rendered) => {
                    self.session.slots[index] = PageSlot::Rendered(rendered);
                    self.bridge.post(Event::PageRendered { page });
                },
                Err(err) => match &*err {
                    ErrorKind::PageOutOfRange(_) => {
                        // Ran off the end of a document of unknown length.
                        self.session.slots.truncate(index);
                        self.session.total_pages = Some(page - 1);
                        break;
                    },
                    ErrorKind::SurfaceGone => {
                        self.session.slots.truncate(index);
                        self.session.state = RenderState::Failed;
                        self.bridge.post(Event::DocumentFailed { reason: ErrorKind::SurfaceGone.to_string() });
                        exn::bail!(ErrorKind::SurfaceGone);
                    },
                    other => {
                        tracing::warn!(page, error = %other, "Page failed to render");
                        let reason = match other {
                            ErrorKind::PageFailed { reason, .. } => reason.clone(),
                            other => other.to_string(),
                        };
                        self.bridge.post(Event::PageFailed { page, reason: reason.clone() });
                        self.session.slots[index] = PageSlot::Unavailable { reason };
                    },
                },
            }
            self.session.page_cursor = page + 1;
        }

        let rendered_to = self.session.rendered();
        if rendered_to >= first {
            self.bridge.post(Event::BatchComplete { first, last: rendered_to });
            tracing::debug!(first, last = rendered_to, "Batch rendered");
        }
        self.session.state = match self.session.total_pages {
            Some(total) if self.session.page_cursor > total => RenderState::Complete,
            _ => RenderState::WaitingForScroll,
        };
        Ok(())
    }

    /// Release the surface. Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.surface.teardown();
        tracing::debug!(rendered = self.session.rendered(), "Render surface torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}
