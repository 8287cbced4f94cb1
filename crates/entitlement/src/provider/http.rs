//! Subscription backend speaking the RevenueCat REST shape.

use super::EntitlementProvider;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use lectern_config::EntitlementConfig;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::instrument;
use url::Url;

#[derive(Debug, Deserialize)]
struct SubscriberResponse {
    subscriber: Subscriber,
}

#[derive(Debug, Deserialize)]
struct Subscriber {
    #[serde(default)]
    entitlements: BTreeMap<String, Entitlement>,
}

#[derive(Debug, Deserialize)]
struct Entitlement {
    /// `null` for lifetime purchases.
    #[serde(default)]
    expires_date: Option<String>,
}

/// Queries `GET {base_url}/subscribers/{app_user_id}`.
#[derive(Debug, Clone)]
pub struct HttpEntitlementProvider {
    client: Client,
    base: Url,
    api_key: Option<String>,
}

impl HttpEntitlementProvider {
    /// Provider rooted at `base_url`; timeout, user agent and API key come
    /// from `config`.
    pub fn new(base_url: &str, config: &EntitlementConfig) -> Result<Self> {
        let base = Url::parse(base_url).or_raise(|| ErrorKind::InvalidBaseUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            exn::bail!(ErrorKind::InvalidBaseUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .or_raise(|| ErrorKind::Unavailable("could not build http client".to_string()))?;
        Ok(Self { client, base, api_key: config.api_key.clone() })
    }

    fn url(&self, app_user_id: &str) -> Url {
        let mut url = self.base.clone();
        // `new` only accepts URLs that can take path segments.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("subscribers").push(app_user_id);
        }
        url
    }
}

#[async_trait]
impl EntitlementProvider for HttpEntitlementProvider {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(level = "debug", skip(self))]
    async fn active_keys(&self, app_user_id: &str) -> Result<BTreeSet<String>> {
        let mut request = self.client.get(self.url(app_user_id)).header(ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        let response = request
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .or_raise(|| ErrorKind::Unavailable("request failed".to_string()))?;
        match response.status() {
            status if status.is_success() => {},
            StatusCode::NOT_FOUND => {
                // Unknown subscribers simply have nothing.
                tracing::debug!("Subscriber not known to provider");
                return Ok(BTreeSet::new());
            },
            status => exn::bail!(ErrorKind::HttpStatus(status.as_u16())),
        }
        let body: SubscriberResponse = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .or_raise(|| ErrorKind::InvalidResponse("body is not a subscriber".to_string()))?;
        Ok(active_entitlements(&body, OffsetDateTime::now_utc()))
    }
}

/// Entitlements with no expiry, or one still in the future.
fn active_entitlements(response: &SubscriberResponse, now: OffsetDateTime) -> BTreeSet<String> {
    response
        .subscriber
        .entitlements
        .iter()
        .filter(|(key, entitlement)| match entitlement.expires_date.as_deref() {
            None => true,
            Some(expires) => match OffsetDateTime::parse(expires, &Rfc3339) {
                Ok(expires) => expires > now,
                Err(e) => {
                    tracing::warn!(key = %key, expires = %expires, error = %e, "Unreadable expiry; treating as expired");
                    false
                },
            },
        })
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[test]
    fn only_unexpired_entitlements_are_active() {
        let body = r#"{"subscriber": {"entitlements": {
            "series_1": {"expires_date": "2030-01-01T00:00:00Z", "product_identifier": "series_1_monthly"},
            "series_b_access": {"expires_date": null},
            "series_3": {"expires_date": "2020-01-01T00:00:00Z"},
            "series_4": {"expires_date": "next tuesday"}
        }}}"#;
        let response: SubscriberResponse = serde_json::from_str(body).unwrap();
        let active = active_entitlements(&response, datetime!(2025-06-01 0:00 UTC));
        assert_eq!(active, BTreeSet::from(["series_1".to_string(), "series_b_access".to_string()]));
    }

    #[test]
    fn subscriber_without_entitlements() {
        let response: SubscriberResponse = serde_json::from_str(r#"{"subscriber": {}}"#).unwrap();
        assert!(active_entitlements(&response, OffsetDateTime::now_utc()).is_empty());
    }

    #[test]
    fn user_id_is_path_encoded() {
        let provider = HttpEntitlementProvider::new("https://api.example/v1/", &EntitlementConfig::default()).unwrap();
        assert_eq!(provider.url("$anonymous/1").as_str(), "https://api.example/v1/subscribers/$anonymous%2F1");
        let provider = HttpEntitlementProvider::new("https://api.example/v1", &EntitlementConfig::default()).unwrap();
        assert_eq!(provider.url("user 7").as_str(), "https://api.example/v1/subscribers/user%207");
    }

    #[rstest]
    #[case("api.example/v1")]
    #[case("mailto:billing@api.example")]
    fn base_url_must_be_absolute(#[case] base_url: &str) {
        let err = HttpEntitlementProvider::new(base_url, &EntitlementConfig::default()).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidBaseUrl(base_url.to_string()));
        assert!(!err.is_retryable());
    }
}
