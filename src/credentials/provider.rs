//! Pluggable credential providers: refresh, validate, revoke.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use thiserror::Error;

use super::object::{CredentialKind, CredentialObject, DEFAULT_REFRESH_BUFFER_SECS};

/// Failure from a provider operation. Surfaced to callers as
/// `CredentialRefreshError`; the stale value is never returned alongside it.
#[derive(Debug, Error)]
#[error("provider {provider_id} failed: {message}")]
pub struct ProviderError {
    pub provider_id: String,
    pub message: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(provider_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            message: message.into(),
        }
    }
}

/// Contract a provider implements for the kinds it supports.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn id(&self) -> &str;

    fn supported_kinds(&self) -> &[CredentialKind];

    /// Whether the object should be refreshed before use. Defaults to the
    /// 5-minute expiry buffer.
    fn should_refresh(&self, object: &CredentialObject) -> bool {
        object.needs_refresh(Utc::now(), Duration::seconds(DEFAULT_REFRESH_BUFFER_SECS))
    }

    /// Produce a refreshed object (new secrets, new expiries).
    async fn refresh(&self, object: CredentialObject)
    -> Result<CredentialObject, ProviderError>;

    /// Check the credential against its issuer.
    async fn validate(&self, object: &CredentialObject) -> bool;

    /// Revoke the credential at its issuer. Returns success.
    async fn revoke(&self, object: &CredentialObject) -> bool;
}

/// Id of the built-in static provider.
pub const STATIC_PROVIDER_ID: &str = "static";

/// The default provider: static secrets, no refresh capability.
///
/// `should_refresh` is always false; an explicit `refresh` call fails so a
/// genuinely expired static credential surfaces as a refresh error rather
/// than a silently stale value.
#[derive(Debug, Default)]
pub struct StaticProvider;

#[async_trait]
impl CredentialProvider for StaticProvider {
    fn id(&self) -> &str {
        STATIC_PROVIDER_ID
    }

    fn supported_kinds(&self) -> &[CredentialKind] {
        &[
            CredentialKind::ApiKey,
            CredentialKind::OAuth2,
            CredentialKind::Custom,
        ]
    }

    fn should_refresh(&self, _object: &CredentialObject) -> bool {
        false
    }

    async fn refresh(
        &self,
        object: CredentialObject,
    ) -> Result<CredentialObject, ProviderError> {
        Err(ProviderError::new(
            STATIC_PROVIDER_ID,
            format!("credential {} has no refresh capability", object.id),
        ))
    }

    async fn validate(&self, object: &CredentialObject) -> bool {
        object.keys.iter().all(|k| !k.secret.is_empty())
    }

    async fn revoke(&self, _object: &CredentialObject) -> bool {
        false
    }
}
