//! Credential objects: named bundles of one or more secret keys.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::secret::Secret;

/// Default expiry buffer a provider uses when deciding whether a
/// credential needs a refresh.
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;

/// Credential flavor; providers declare which kinds they can serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    OAuth2,
    Custom,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialKind::ApiKey => "api_key",
            CredentialKind::OAuth2 => "oauth2",
            CredentialKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// One named secret within a credential, with an optional expiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialKey {
    pub name: String,
    pub secret: Secret,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialKey {
    #[must_use]
    pub fn new(name: impl Into<String>, secret: impl Into<Secret>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            expires_at: None,
        }
    }

    #[must_use]
    pub fn expiring(
        name: impl Into<String>,
        secret: impl Into<Secret>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            expires_at: Some(expires_at),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.expires_at.is_some_and(|at| at - now <= buffer)
    }
}

/// A named bundle of credential keys with an optional provider.
///
/// Equality and hashing are defined over `(id, version)`, never over the
/// secret bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialObject {
    pub id: String,
    pub kind: CredentialKind,
    /// Keys in declaration order; "first defined" is the default fallback.
    pub keys: Vec<CredentialKey>,
    pub provider_id: Option<String>,
    pub auto_refresh: bool,
    pub last_refreshed: Option<DateTime<Utc>>,
    /// Bumped on every save/refresh; part of the object's identity.
    #[serde(default)]
    pub version: u64,
}

impl PartialEq for CredentialObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.version == other.version
    }
}

impl Eq for CredentialObject {}

impl std::hash::Hash for CredentialObject {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.version.hash(state);
    }
}

impl CredentialObject {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: CredentialKind) -> Self {
        Self {
            id: id.into(),
            kind,
            keys: Vec::new(),
            provider_id: None,
            auto_refresh: false,
            last_refreshed: None,
            version: 0,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: CredentialKey) -> Self {
        self.keys.push(key);
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    #[must_use]
    pub fn with_auto_refresh(mut self, auto_refresh: bool) -> Self {
        self.auto_refresh = auto_refresh;
        self
    }

    #[must_use]
    pub fn key(&self, name: &str) -> Option<&CredentialKey> {
        self.keys.iter().find(|k| k.name == name)
    }

    /// The default key: `api_key`, then `access_token`, then the first
    /// defined key.
    #[must_use]
    pub fn default_key(&self) -> Option<&CredentialKey> {
        self.key("api_key")
            .or_else(|| self.key("access_token"))
            .or_else(|| self.keys.first())
    }

    /// Replace or insert a key by name.
    pub fn upsert_key(&mut self, key: CredentialKey) {
        match self.keys.iter_mut().find(|k| k.name == key.name) {
            Some(existing) => *existing = key,
            None => self.keys.push(key),
        }
    }

    /// Whether any key expires within the buffer.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.keys.iter().any(|k| k.expires_within(now, buffer))
    }
}
