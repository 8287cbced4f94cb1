//! Screen-capture protection while a document is on screen.

use std::sync::Arc;

/// Platform hook that blocks screenshots and screen recording.
pub trait ScreenGuard: Send + Sync {
    fn enable(&self);
    fn disable(&self);
}

/// For hosts without screen-capture controls.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScreenGuard;

impl ScreenGuard for NoScreenGuard {
    fn enable(&self) {}
    fn disable(&self) {}
}

/// Protection that stays on for as long as this value lives.
pub(crate) struct Protected {
    guard: Arc<dyn ScreenGuard>,
}

impl Protected {
    pub(crate) fn enable(guard: Arc<dyn ScreenGuard>) -> Self {
        guard.enable();
        tracing::trace!("Screen capture protection enabled");
        Self { guard }
    }
}

impl Drop for Protected {
    fn drop(&mut self) {
        self.guard.disable();
        tracing::trace!("Screen capture protection disabled");
    }
}
