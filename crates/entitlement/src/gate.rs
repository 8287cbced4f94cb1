use crate::error::Result;
use crate::provider::ProviderHandle;
use crate::series::SeriesAliases;
use crate::snapshot::{AccessDecision, AccessReason, EntitlementSnapshot, Identity};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{RwLock, watch};
use tracing::instrument;

type Pushes = watch::Receiver<BTreeSet<String>>;

struct GateState {
    identity: Identity,
    snapshot: Option<EntitlementSnapshot>,
}

/// Decides whether the current user may open a series.
///
/// Holds at most one [`EntitlementSnapshot`], for the current identity. The
/// gate is its only writer; every check reads it. Lookups fail closed: if the
/// provider can't be asked, gated series are locked.
pub struct EntitlementGate {
    provider: ProviderHandle,
    aliases: SeriesAliases,
    state: RwLock<GateState>,
    pushes: Mutex<Option<Pushes>>,
}

impl EntitlementGate {
    pub fn new(provider: ProviderHandle, aliases: SeriesAliases) -> Self {
        let pushes = provider.subscribe(Identity::Anonymous.app_user_id());
        Self {
            provider,
            aliases,
            state: RwLock::new(GateState { identity: Identity::Anonymous, snapshot: None }),
            pushes: Mutex::new(pushes),
        }
    }

    pub fn aliases(&self) -> &SeriesAliases {
        &self.aliases
    }

    pub async fn identity(&self) -> Identity {
        self.state.read().await.identity.clone()
    }

    /// Switch to `user_id` and load their entitlements.
    ///
    /// The previous user's snapshot is discarded even if loading fails, so
    /// one user's purchases can never unlock content for another.
    #[instrument(level = "debug", skip(self))]
    pub async fn login(&self, user_id: &str) -> Result<EntitlementSnapshot> {
        let identity = Identity::User(user_id.to_string());
        *self.pushes_lock() = self.provider.subscribe(identity.app_user_id());
        {
            let mut state = self.state.write().await;
            state.identity = identity;
            state.snapshot = None;
        }
        self.fetch_snapshot(true).await
    }

    /// Back to anonymous, forgetting everything known about the last user.
    pub async fn logout(&self) {
        *self.pushes_lock() = self.provider.subscribe(Identity::Anonymous.app_user_id());
        let mut state = self.state.write().await;
        state.identity = Identity::Anonymous;
        state.snapshot = None;
        tracing::debug!("Entitlements cleared on logout");
    }

    /// Drop the snapshot so the next check asks the provider again.
    pub async fn invalidate(&self) {
        self.state.write().await.snapshot = None;
    }

    fn pushes_lock(&self) -> std::sync::MutexGuard<'_, Option<Pushes>> {
        self.pushes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the latest pushed key set, if one arrived since the last look.
    fn pending_push(&self) -> Option<BTreeSet<String>> {
        let mut pushes = self.pushes_lock();
        let receiver = pushes.as_mut()?;
        match receiver.has_changed() {
            Ok(true) => Some(receiver.borrow_and_update().clone()),
            Ok(false) => None,
            Err(_) => {
                // The provider stopped pushing; fall back to polling only.
                *pushes = None;
                None
            },
        }
    }

    /// Replace the snapshot with keys delivered outside a lookup, such as a
    /// purchase confirmation.
    pub async fn apply_push(&self, active_keys: BTreeSet<String>) -> EntitlementSnapshot {
        let mut state = self.state.write().await;
        let snapshot = EntitlementSnapshot::new(state.identity.clone(), active_keys);
        tracing::info!(keys = snapshot.active_keys.len(), "Entitlements updated by push");
        state.snapshot = Some(snapshot.clone());
        snapshot
    }

    /// The current snapshot, asking the provider only if there is none or
    /// `force_refresh` is set.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_snapshot(&self, force_refresh: bool) -> Result<EntitlementSnapshot> {
        if let Some(keys) = self.pending_push() {
            self.apply_push(keys).await;
        }
        let identity = {
            let state = self.state.read().await;
            if let Some(snapshot) = &state.snapshot
                && !force_refresh
            {
                return Ok(snapshot.clone());
            }
            state.identity.clone()
        };
        let active_keys = self.provider.active_keys(identity.app_user_id()).await?;
        let snapshot = EntitlementSnapshot::new(identity.clone(), active_keys);
        let mut state = self.state.write().await;
        // Logged out (or in as someone else) while the lookup was running.
        if state.identity != identity {
            tracing::debug!("Identity changed during lookup; discarding result");
            return Ok(EntitlementSnapshot::new(state.identity.clone(), BTreeSet::new()));
        }
        tracing::debug!(provider = self.provider.name(), keys = snapshot.active_keys.len(), "Entitlements fetched");
        state.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Decide access to `series_id`. `None` (or blank) means the document is
    /// not part of any series.
    ///
    /// Never fails: an unreachable provider yields a refusal with
    /// [`AccessReason::ProviderUnavailable`].
    #[instrument(level = "debug", skip(self))]
    pub async fn check_access(&self, series_id: Option<&str>) -> AccessDecision {
        let Some(series) = series_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return AccessDecision::new(series_id, AccessReason::Ungated);
        };
        let snapshot = match self.fetch_snapshot(false).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(series, error = %*err, "Entitlement lookup failed; access refused");
                return AccessDecision::new(Some(series), AccessReason::ProviderUnavailable);
            },
        };
        let reason = match self.aliases.matching_key(series, &snapshot.active_keys) {
            Some(key) => AccessReason::Entitled { key: key.clone() },
            None => AccessReason::NotEntitled,
        };
        tracing::debug!(series, reason = ?reason, "Access decided");
        AccessDecision::new(Some(series), reason)
    }

    /// Whether the current user may open `series_id`.
    pub async fn has_series_access(&self, series_id: &str) -> bool {
        self.check_access(Some(series_id)).await.granted
    }

    /// The series a store product unlocks.
    pub fn series_id_from_product(&self, product_id: &str) -> Option<String> {
        self.aliases.series_id_from_product(product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use std::sync::Arc;

    fn gate(provider: &Arc<MockProvider>) -> EntitlementGate {
        EntitlementGate::new(Arc::clone(provider) as ProviderHandle, SeriesAliases::default())
    }

    #[tokio::test]
    async fn letter_coded_key_unlocks_numeric_series() {
        let provider = Arc::new(MockProvider::with_keys(["series_a_access"]));
        let gate = gate(&provider);
        assert!(gate.has_series_access("1").await);
        assert!(!gate.has_series_access("2").await);
        let decision = gate.check_access(Some("1")).await;
        assert_eq!(decision.reason, AccessReason::Entitled { key: "series_a_access".to_string() });
    }

    #[tokio::test]
    async fn no_keys_no_access() {
        let provider = Arc::new(MockProvider::with_keys(Vec::<String>::new()));
        let gate = gate(&provider);
        let decision = gate.check_access(Some("1")).await;
        assert!(!decision.granted);
        assert_eq!(decision.reason, AccessReason::NotEntitled);
    }

    #[tokio::test]
    async fn provider_failure_fails_closed() {
        let provider = Arc::new(MockProvider::with_keys(["series_1"]));
        provider.set_unavailable(true);
        let gate = gate(&provider);
        assert!(!gate.has_series_access("1").await);
        assert_eq!(gate.check_access(Some("1")).await.reason, AccessReason::ProviderUnavailable);
        assert!(gate.fetch_snapshot(false).await.is_err());
    }

    #[tokio::test]
    async fn ungated_documents_skip_the_provider() {
        let provider = Arc::new(MockProvider::with_keys(Vec::<String>::new()));
        provider.set_unavailable(true);
        let gate = gate(&provider);
        for series in [None, Some(""), Some("  ")] {
            let decision = gate.check_access(series).await;
            assert!(decision.granted);
            assert_eq!(decision.reason, AccessReason::Ungated);
        }
        assert_eq!(provider.lookups(), 0);
    }

    #[tokio::test]
    async fn snapshot_is_reused_until_forced() {
        let provider = Arc::new(MockProvider::with_keys(Vec::<String>::new()));
        let gate = gate(&provider);
        assert!(!gate.has_series_access("2").await);

        // Bought elsewhere, no push: the cached snapshot still says no.
        provider.set_keys(["series_2"]);
        assert!(!gate.has_series_access("2").await);
        assert_eq!(provider.lookups(), 1);

        gate.fetch_snapshot(true).await.unwrap();
        assert!(gate.has_series_access("2").await);
        assert_eq!(provider.lookups(), 2);
    }

    #[tokio::test]
    async fn push_replaces_snapshot_without_refetch() {
        let provider = Arc::new(MockProvider::with_keys(Vec::<String>::new()));
        let gate = gate(&provider);
        gate.login("reader-1").await.unwrap();
        assert!(!gate.has_series_access("2").await);

        provider.push(["series_b_monthly"]);
        assert!(gate.has_series_access("2").await);
        assert_eq!(provider.lookups(), 1);
    }

    #[tokio::test]
    async fn logout_forgets_entitlements() {
        let provider = Arc::new(MockProvider::with_keys(["series_1"]));
        let gate = gate(&provider);
        let snapshot = gate.login("reader-1").await.unwrap();
        assert_eq!(snapshot.identity, Identity::User("reader-1".to_string()));
        assert!(gate.has_series_access("1").await);

        gate.logout().await;
        assert_eq!(gate.identity().await, Identity::Anonymous);
        provider.set_keys(Vec::<String>::new());
        assert!(!gate.has_series_access("1").await);
    }

    #[tokio::test]
    async fn invalidate_forces_next_lookup() {
        let provider = Arc::new(MockProvider::with_keys(["series_1"]));
        let gate = gate(&provider);
        assert!(gate.has_series_access("1").await);
        gate.invalidate().await;
        provider.set_keys(Vec::<String>::new());
        assert!(!gate.has_series_access("1").await);
        assert_eq!(provider.lookups(), 2);
    }
}
