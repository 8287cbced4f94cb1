//! Bounded, lossy transport from surface to host.

use crate::protocol::{Event, Inbound};
use crate::sink::DiagnosticSink;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Create a bridge holding at most `capacity` undelivered messages.
pub fn channel(capacity: usize) -> (BridgeSender, BridgeReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (BridgeSender { tx, dropped: Arc::clone(&dropped) }, BridgeReceiver { rx, dropped })
}

/// Surface side of the bridge.
///
/// Posting never waits and never fails: when the host falls behind, or has
/// gone away, messages are dropped and counted.
#[derive(Debug, Clone)]
pub struct BridgeSender {
    tx: mpsc::Sender<Inbound>,
    dropped: Arc<AtomicU64>,
}

impl BridgeSender {
    pub fn post(&self, event: Event) {
        self.deliver(Inbound::Event(event));
    }

    /// Post text exactly as the surface produced it. Text that doesn't parse
    /// is delivered as [`Inbound::Raw`].
    pub fn post_raw(&self, text: &str) {
        self.deliver(Inbound::from_text(text));
    }

    fn deliver(&self, message: Inbound) {
        match self.tx.try_send(message) {
            Ok(()) => {},
            Err(TrySendError::Full(message)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(dropped, message = ?message, "Bridge full, dropping message");
            },
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Bridge closed, dropping message");
            },
        }
    }

    /// Messages lost so far because the host was not keeping up.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Host side of the bridge.
#[derive(Debug)]
pub struct BridgeReceiver {
    rx: mpsc::Receiver<Inbound>,
    dropped: Arc<AtomicU64>,
}

impl BridgeReceiver {
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<Inbound> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Forward every message to `sink` until all senders are gone.
    pub async fn pump(mut self, sink: impl DiagnosticSink) {
        while let Some(message) = self.rx.recv().await {
            sink.record(&message);
        }
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "Bridge closed after dropping diagnostics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[test]
    fn full_bridge_drops_instead_of_blocking() {
        let (tx, mut rx) = channel(2);
        for page in 1..=5 {
            tx.post(Event::PageRendered { page });
        }
        assert_eq!(tx.dropped(), 3);
        let pages: Vec<_> = rx.drain().into_iter().filter_map(|m| m.event().cloned()).collect();
        assert_eq!(pages, vec![Event::PageRendered { page: 1 }, Event::PageRendered { page: 2 }]);
    }

    #[test]
    fn posting_after_host_is_gone_is_harmless() {
        let (tx, rx) = channel(4);
        drop(rx);
        tx.post(Event::DocumentFailed { reason: "gone".into() });
        assert_eq!(tx.dropped(), 1);
    }

    #[tokio::test]
    async fn pump_forwards_everything_including_garbage() {
        let (tx, rx) = channel(8);
        let sink = Arc::new(MemorySink::default());
        tx.post(Event::DocumentLoaded { pages: Some(3) });
        tx.post_raw("{oops");
        tx.post_raw(r#"{"type":"log","message":"hi"}"#);
        drop(tx);

        rx.pump(Arc::clone(&sink)).await;

        let messages = sink.messages();
        assert_eq!(messages.len(), 3);
        assert!(matches!(&messages[1], Inbound::Raw { text, .. } if text == "{oops"));
        assert_eq!(sink.events().last(), Some(&Event::Log { level: Default::default(), message: "hi".into() }));
    }
}
