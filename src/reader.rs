//! Opening a document for reading: gate, then cache, then render.

use crate::error::{ErrorKind, Result};
use crate::screen::{NoScreenGuard, Protected, ScreenGuard};
use exn::ResultExt;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use lectern_bridge::{BridgeReceiver, BridgeSender, DiagnosticSink, TracingSink};
use lectern_cache::{CacheEntry, CacheManager, DownloadSession};
use lectern_config::RenderConfig;
use lectern_entitlement::{AccessDecision, EntitlementGate};
use lectern_render::{
    RenderHost, RenderSession, RenderState, RenderSurface, ScrollSignal, SurfaceSource, ViewerBundle, ViewerSettings,
    Viewport,
};
use std::sync::Arc;
use tracing::instrument;

/// A document as the catalog describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocumentRef {
    pub remote_url: String,
    /// Series the document belongs to; `None` for free documents.
    pub series_id: Option<String>,
    pub title: String,
    /// Local file name to use instead of the URL's basename.
    pub filename_hint: Option<String>,
}

impl RemoteDocumentRef {
    pub fn new(remote_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self { remote_url: remote_url.into(), series_id: None, title: title.into(), filename_hint: None }
    }

    pub fn in_series(mut self, series_id: impl Into<String>) -> Self {
        self.series_id = Some(series_id.into());
        self
    }

    pub fn with_filename(mut self, hint: impl Into<String>) -> Self {
        self.filename_hint = Some(hint.into());
        self
    }
}

/// Everything a reader needs, shared by every session.
#[derive(Clone)]
pub struct Reader {
    cache: CacheManager,
    gate: Arc<EntitlementGate>,
    render: RenderConfig,
    screen_guard: Arc<dyn ScreenGuard>,
    sink: Arc<dyn DiagnosticSink>,
}

impl Reader {
    pub fn new(cache: CacheManager, gate: Arc<EntitlementGate>, render: RenderConfig) -> Self {
        Self { cache, gate, render, screen_guard: Arc::new(NoScreenGuard), sink: Arc::new(TracingSink) }
    }

    pub fn with_screen_guard(mut self, guard: Arc<dyn ScreenGuard>) -> Self {
        self.screen_guard = guard;
        self
    }

    /// Where surface diagnostics go. Defaults to [`TracingSink`].
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn gate(&self) -> &EntitlementGate {
        &self.gate
    }

    /// Prepare a session for `document` on `surface`. Nothing happens until
    /// [`ReaderSession::open`].
    pub fn session<S: RenderSurface + Send>(
        &self,
        document: RemoteDocumentRef,
        surface: S,
        viewport: Viewport,
    ) -> ReaderSession<S> {
        let (bridge, diagnostics) = lectern_bridge::channel(self.render.bridge_capacity);
        let (abort, registration) = AbortHandle::new_pair();
        ReaderSession {
            reader: self.clone(),
            document,
            host: RenderHost::new(surface, &self.render, viewport, bridge.clone()),
            viewport,
            bridge,
            diagnostics,
            abort,
            registration: Some(registration),
            protection: None,
            entry: None,
            closed: false,
        }
    }
}

/// How an [`ReaderSession::open`] attempt ended, short of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// The reader lacks the entitlement; route them to the upsell instead.
    Locked(AccessDecision),
    /// The document is on screen and its first batch is rendered.
    Reading { entry: CacheEntry, decision: AccessDecision },
}

/// Cancels a session's download from outside the session.
#[derive(Debug, Clone)]
pub struct SessionAbort(AbortHandle);

impl SessionAbort {
    pub fn abort(&self) {
        self.0.abort();
    }
}

/// One document on screen, from entitlement check to teardown.
///
/// Whatever happens, the session is released together on the way out: the
/// surface is torn down, the download it started is cancelled, and screen
/// capture protection is switched off. That happens on [`close`](Self::close),
/// on any failed [`open`](Self::open), and on drop.
pub struct ReaderSession<S: RenderSurface + Send> {
    reader: Reader,
    document: RemoteDocumentRef,
    host: RenderHost<S>,
    viewport: Viewport,
    bridge: BridgeSender,
    diagnostics: BridgeReceiver,
    abort: AbortHandle,
    registration: Option<AbortRegistration>,
    protection: Option<Protected>,
    entry: Option<CacheEntry>,
    closed: bool,
}

impl<S: RenderSurface + Send> ReaderSession<S> {
    pub fn document(&self) -> &RemoteDocumentRef {
        &self.document
    }

    pub fn render_session(&self) -> &RenderSession {
        self.host.session()
    }

    pub fn state(&self) -> RenderState {
        self.host.state()
    }

    pub fn surface(&self) -> &S {
        self.host.surface()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The cached document, once [`open`](Self::open) got that far.
    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    /// The bridge end handed to the surface, for posting its console output.
    pub fn bridge(&self) -> BridgeSender {
        self.bridge.clone()
    }

    pub fn abort_handle(&self) -> SessionAbort {
        SessionAbort(self.abort.clone())
    }

    /// Check access, make the document local, and render the first batch.
    ///
    /// Nothing is downloaded or rendered unless access is granted. Any error
    /// closes the session.
    #[instrument(level = "debug", skip_all, fields(title = %self.document.title, series = ?self.document.series_id))]
    pub async fn open(&mut self, on_progress: impl FnMut(&DownloadSession)) -> Result<OpenOutcome> {
        let Some(registration) = self.registration.take().filter(|_| !self.closed) else {
            exn::bail!(ErrorKind::AlreadyOpened);
        };
        self.protection = Some(Protected::enable(Arc::clone(&self.reader.screen_guard)));

        let decision = self.reader.gate.check_access(self.document.series_id.as_deref()).await;
        if !decision.granted {
            tracing::info!(reason = ?decision.reason, "Series locked");
            self.close();
            return Ok(OpenOutcome::Locked(decision));
        }

        let result = self.load(registration, on_progress).await;
        self.flush_diagnostics();
        match result {
            Ok(entry) => {
                tracing::info!(key = %entry.cache_key, pages = ?self.host.session().total_pages, "Document open");
                Ok(OpenOutcome::Reading { entry, decision })
            },
            Err(err) => {
                self.close();
                Err(err)
            },
        }
    }

    async fn load(
        &mut self,
        registration: AbortRegistration,
        on_progress: impl FnMut(&DownloadSession),
    ) -> Result<CacheEntry> {
        let download = self.reader.cache.ensure_cached_with_progress(
            &self.document.remote_url,
            self.document.filename_hint.as_deref(),
            on_progress,
        );
        let entry = match Abortable::new(download, registration).await {
            Ok(Ok(entry)) => entry,
            Ok(Err(err)) => return Err(ErrorKind::download(err)),
            Err(_aborted) => {
                tracing::debug!("Download aborted by session teardown");
                exn::bail!(ErrorKind::Closed);
            },
        };
        self.entry = Some(entry.clone());
        let source = self.surface_source(&entry).await?;
        self.host.mount(source).await.map_err(ErrorKind::render)?;
        Ok(entry)
    }

    /// Small documents are inlined into the viewer page; larger ones are
    /// opened from disk.
    async fn surface_source(&self, entry: &CacheEntry) -> Result<SurfaceSource> {
        if entry.size_bytes > self.reader.render.inline_max_bytes {
            return SurfaceSource::from_path(&entry.local_path).map_err(ErrorKind::render);
        }
        let bytes = tokio::fs::read(&entry.local_path).await.or_raise(|| {
            ErrorKind::Download(lectern_cache::error::ErrorKind::Storage {
                path: entry.local_path.clone(),
                reason: "cached document is unreadable".to_string(),
            })
        })?;
        let settings = ViewerSettings::new(&self.reader.render, self.viewport);
        let html = ViewerBundle::inline(&bytes, &settings).map_err(ErrorKind::render)?;
        Ok(SurfaceSource::Inline(html))
    }

    /// Forward a scroll signal; renders the next batch when it is near the
    /// end of the rendered pages.
    pub async fn on_scroll(&mut self, signal: ScrollSignal) -> Result<bool> {
        if self.closed {
            exn::bail!(ErrorKind::Closed);
        }
        let result = self.host.on_scroll(signal).await;
        self.flush_diagnostics();
        result.map_err(ErrorKind::render)
    }

    fn flush_diagnostics(&mut self) {
        for message in self.diagnostics.drain() {
            self.reader.sink.record(&message);
        }
    }

    /// Tear everything down. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.abort.abort();
        self.host.teardown();
        self.protection = None;
        self.flush_diagnostics();
        tracing::debug!(title = %self.document.title, "Reader session closed");
    }
}

impl<S: RenderSurface + Send> Drop for ReaderSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}
