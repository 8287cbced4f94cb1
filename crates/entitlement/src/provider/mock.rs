//! In-memory entitlement provider for testing.

use super::EntitlementProvider;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::watch;

/// Serves one set of keys to every user and can push changes to subscribers.
pub struct MockProvider {
    keys: watch::Sender<BTreeSet<String>>,
    unavailable: AtomicBool,
    lookups: AtomicUsize,
}

impl MockProvider {
    pub fn with_keys<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        let (keys, _) = watch::channel(keys.into_iter().map(Into::into).collect());
        Self { keys, unavailable: AtomicBool::new(false), lookups: AtomicUsize::new(0) }
    }

    /// Make every lookup fail as if the provider were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Change the active keys without telling anyone, like a purchase made on
    /// another device.
    pub fn set_keys<K: Into<String>>(&self, keys: impl IntoIterator<Item = K>) {
        let keys: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        self.keys.send_if_modified(|current| {
            *current = keys;
            false
        });
    }

    /// Change the active keys and notify every subscriber.
    pub fn push<K: Into<String>>(&self, keys: impl IntoIterator<Item = K>) {
        self.keys.send_replace(keys.into_iter().map(Into::into).collect());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitlementProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn active_keys(&self, _app_user_id: &str) -> Result<BTreeSet<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Unavailable("mock provider offline".to_string()));
        }
        Ok(self.keys.borrow().clone())
    }

    fn subscribe(&self, _app_user_id: &str) -> Option<watch::Receiver<BTreeSet<String>>> {
        Some(self.keys.subscribe())
    }
}
