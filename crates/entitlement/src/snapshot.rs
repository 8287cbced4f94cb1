use std::collections::BTreeSet;
use time::UtcDateTime;

/// Who the gate is asking about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Nobody is logged in. Anonymous users can still hold entitlements
    /// bought on this device.
    Anonymous,
    User(String),
}

impl Identity {
    pub const ANONYMOUS_ID: &'static str = "$anonymous";

    /// The id sent to the provider.
    pub fn app_user_id(&self) -> &str {
        match self {
            Self::Anonymous => Self::ANONYMOUS_ID,
            Self::User(id) => id,
        }
    }
}

/// The user's active entitlements as of one provider response (or push).
///
/// Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementSnapshot {
    pub identity: Identity,
    pub active_keys: BTreeSet<String>,
    pub fetched_at: UtcDateTime,
}

impl EntitlementSnapshot {
    pub fn new(identity: Identity, active_keys: BTreeSet<String>) -> Self {
        Self { identity, active_keys, fetched_at: UtcDateTime::now() }
    }
}

/// Why access was granted or refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessReason {
    /// The document belongs to no series.
    Ungated,
    /// `key` is active and covers the series.
    Entitled { key: String },
    NotEntitled,
    /// The provider couldn't be asked; access is refused until it can.
    ProviderUnavailable,
}

/// The outcome of one access check. Computed per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub series_id: Option<String>,
    pub granted: bool,
    pub reason: AccessReason,
}

impl AccessDecision {
    pub(crate) fn new(series_id: Option<&str>, reason: AccessReason) -> Self {
        let granted = matches!(reason, AccessReason::Ungated | AccessReason::Entitled { .. });
        Self { series_id: series_id.map(str::to_string), granted, reason }
    }
}
