use crate::protocol::{Event, Inbound, LogLevel};
use std::sync::Arc;

/// Where bridge messages end up on the host.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, message: &Inbound);
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for Arc<T> {
    fn record(&self, message: &Inbound) {
        (**self).record(message);
    }
}

/// Re-emits surface diagnostics as `tracing` events under the `surface` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, message: &Inbound) {
        let event = match message {
            Inbound::Event(event) => event,
            Inbound::Raw { text, error } => {
                tracing::warn!(target: "surface", raw = %text, error = %error, "Unparseable bridge message");
                return;
            },
        };
        let kind = event.kind();
        match event {
            Event::Log { level: LogLevel::Debug, .. } => tracing::debug!(target: "surface", kind, "{event}"),
            Event::Log { level: LogLevel::Info, .. } => tracing::info!(target: "surface", kind, "{event}"),
            Event::Log { level: LogLevel::Warn, .. } => tracing::warn!(target: "surface", kind, "{event}"),
            Event::Log { level: LogLevel::Error, .. } | Event::Error { .. } => {
                tracing::error!(target: "surface", kind, "{event}")
            },
            Event::DocumentFailed { .. } | Event::PageFailed { .. } => {
                tracing::warn!(target: "surface", kind, "{event}")
            },
            Event::DocumentLoaded { .. }
            | Event::PageRendered { .. }
            | Event::BatchStarted { .. }
            | Event::BatchComplete { .. } => {
                tracing::debug!(target: "surface", kind, "{event}")
            },
        }
    }
}

#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemorySink;

#[cfg(any(test, feature = "mock"))]
mod memory {
    use super::DiagnosticSink;
    use crate::protocol::{Event, Inbound};
    use std::sync::{Mutex, PoisonError};

    /// Keeps every message in memory for assertions.
    #[derive(Debug, Default)]
    pub struct MemorySink {
        messages: Mutex<Vec<Inbound>>,
    }

    impl MemorySink {
        pub fn messages(&self) -> Vec<Inbound> {
            self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// Only the messages that parsed.
        pub fn events(&self) -> Vec<Event> {
            self.messages().into_iter().filter_map(|m| m.event().cloned()).collect()
        }
    }

    impl DiagnosticSink for MemorySink {
        fn record(&self, message: &Inbound) {
            self.messages.lock().unwrap_or_else(PoisonError::into_inner).push(message.clone());
        }
    }
}
