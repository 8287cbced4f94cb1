//! Where entitlements come from.

mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::http::HttpEntitlementProvider;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockProvider;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use lectern_config::EntitlementConfig;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

pub type ProviderHandle = Arc<dyn EntitlementProvider + Send + Sync>;

#[async_trait]
pub trait EntitlementProvider {
    fn name(&self) -> &str;

    /// Entitlement keys currently active for `app_user_id`.
    async fn active_keys(&self, app_user_id: &str) -> Result<BTreeSet<String>>;

    /// Unsolicited updates for `app_user_id`, e.g. after a purchase or a
    /// renewal made elsewhere. Providers without push return `None`.
    fn subscribe(&self, _app_user_id: &str) -> Option<watch::Receiver<BTreeSet<String>>> {
        None
    }
}

/// Stands in when no provider is configured. Every lookup fails, so every
/// gated series stays locked.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl EntitlementProvider for Unconfigured {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn active_keys(&self, _app_user_id: &str) -> Result<BTreeSet<String>> {
        exn::bail!(ErrorKind::NotConfigured)
    }
}

/// The provider described by `config`.
pub fn from_config(config: &EntitlementConfig) -> Result<ProviderHandle> {
    match config.base_url.as_deref() {
        Some(base_url) => Ok(Arc::new(HttpEntitlementProvider::new(base_url, config)?)),
        None => {
            tracing::info!("No entitlement provider configured; gated series will stay locked");
            Ok(Arc::new(Unconfigured))
        },
    }
}
