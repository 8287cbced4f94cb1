//! Series entitlement checks.
//!
//! Reading a document that belongs to a series requires an active entitlement
//! for that series. The [`EntitlementGate`] answers that question from a
//! cached [`EntitlementSnapshot`] of the user's active keys, refreshed from an
//! [`EntitlementProvider`] on login, on demand, or when the provider pushes a
//! change. Whenever the answer can't be determined, the answer is no.

pub mod error;
mod gate;
pub mod provider;
mod series;
mod snapshot;

pub use crate::gate::EntitlementGate;
pub use crate::provider::{EntitlementProvider, HttpEntitlementProvider, ProviderHandle};
pub use crate::series::SeriesAliases;
pub use crate::snapshot::{AccessDecision, AccessReason, EntitlementSnapshot, Identity};
use lectern_config::EntitlementConfig;

impl EntitlementGate {
    /// A gate backed by the configured provider and alias table.
    pub fn from_config(config: &EntitlementConfig) -> error::Result<Self> {
        let provider = provider::from_config(config)?;
        Ok(Self::new(provider, SeriesAliases::with_overrides(&config.series_aliases)))
    }
}
