//! The credential store facade.
//!
//! Wraps a storage backend with provider-driven auto-refresh and template
//! resolution. Writes and refreshes are serialized per credential id;
//! the auto-refresh path uses double-checked locking so concurrent
//! readers only block while a refresh is actually in flight.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::instrument;

use super::object::CredentialObject;
use super::provider::{CredentialProvider, STATIC_PROVIDER_ID, StaticProvider};
use super::secret::Secret;
use super::storage::{CredentialStorage, CredentialStorageError};
use super::template::{ResolveMode, Segment, parse_segments};
use crate::error::CoreError;

fn map_storage_err(err: CredentialStorageError) -> CoreError {
    match err {
        CredentialStorageError::Corrupt { id } => CoreError::CredentialCorrupt { id },
        other => CoreError::StorageFailure {
            message: other.to_string(),
        },
    }
}

/// Process-wide credential store.
pub struct CredentialStore {
    storage: Arc<dyn CredentialStorage>,
    providers: RwLock<FxHashMap<String, Arc<dyn CredentialProvider>>>,
    locks: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialStore {
    /// Create a store over a backend. The static provider is registered
    /// out of the box.
    #[must_use]
    pub fn new(storage: Arc<dyn CredentialStorage>) -> Self {
        let store = Self {
            storage,
            providers: RwLock::new(FxHashMap::default()),
            locks: Mutex::new(FxHashMap::default()),
        };
        store.register_provider(Arc::new(StaticProvider));
        store
    }

    pub fn register_provider(&self, provider: Arc<dyn CredentialProvider>) {
        self.providers
            .write()
            .insert(provider.id().to_string(), provider);
    }

    fn provider_for(&self, object: &CredentialObject) -> Result<Arc<dyn CredentialProvider>, CoreError> {
        let provider_id = object
            .provider_id
            .as_deref()
            .unwrap_or(STATIC_PROVIDER_ID);
        self.providers
            .read()
            .get(provider_id)
            .cloned()
            .ok_or_else(|| CoreError::CredentialRefreshError {
                id: object.id.clone(),
                message: format!("provider {provider_id} is not registered"),
            })
    }

    fn id_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    async fn load_required(&self, id: &str) -> Result<CredentialObject, CoreError> {
        self.storage
            .load(id)
            .await
            .map_err(map_storage_err)?
            .ok_or_else(|| CoreError::CredentialNotFound { id: id.to_string() })
    }

    /// Load a credential, refreshing it first when its provider says so.
    async fn load_fresh(&self, id: &str) -> Result<CredentialObject, CoreError> {
        let object = self.load_required(id).await?;
        if !object.auto_refresh {
            return Ok(object);
        }
        let provider = self.provider_for(&object)?;
        if !provider.should_refresh(&object) {
            return Ok(object);
        }

        // Double-checked: take the per-id lock, re-load, re-check. A
        // concurrent caller may have refreshed while we waited.
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        let object = self.load_required(id).await?;
        if !provider.should_refresh(&object) {
            return Ok(object);
        }

        let prior_version = object.version;
        let mut refreshed =
            provider
                .refresh(object)
                .await
                .map_err(|e| CoreError::CredentialRefreshError {
                    id: id.to_string(),
                    message: e.message,
                })?;
        refreshed.version = prior_version + 1;
        refreshed.last_refreshed = Some(Utc::now());
        self.storage
            .save(&refreshed)
            .await
            .map_err(map_storage_err)?;
        Ok(refreshed)
    }

    /// Get the credential's default key (api_key, access_token, or the
    /// first defined key), auto-refreshing when configured.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Secret, CoreError> {
        let object = self.load_fresh(id).await?;
        let key = object
            .default_key()
            .ok_or_else(|| CoreError::CredentialNotFound { id: id.to_string() })?;
        if object.auto_refresh && key.is_expired(Utc::now()) {
            // The refresh path ran (or was skipped by the provider) and the
            // key is still expired: never hand back a stale secret.
            return Err(CoreError::CredentialRefreshError {
                id: id.to_string(),
                message: format!("key {} is expired after refresh", key.name),
            });
        }
        Ok(key.secret.clone())
    }

    /// Get a specific key by name, auto-refreshing when configured.
    #[instrument(skip(self))]
    pub async fn get_key(&self, id: &str, key_name: &str) -> Result<Secret, CoreError> {
        let object = self.load_fresh(id).await?;
        let key = object
            .key(key_name)
            .ok_or_else(|| CoreError::CredentialNotFound {
                id: format!("{id}.{key_name}"),
            })?;
        if object.auto_refresh && key.is_expired(Utc::now()) {
            return Err(CoreError::CredentialRefreshError {
                id: id.to_string(),
                message: format!("key {key_name} is expired after refresh"),
            });
        }
        Ok(key.secret.clone())
    }

    /// Persist a credential. Requires at least one key; a declared
    /// provider must be registered.
    pub async fn save_credential(&self, object: CredentialObject) -> Result<(), CoreError> {
        if object.keys.is_empty() {
            return Err(CoreError::StorageFailure {
                message: format!("credential {} must have at least one key", object.id),
            });
        }
        if object.provider_id.is_some() {
            self.provider_for(&object)?;
        }
        let lock = self.id_lock(&object.id);
        let _guard = lock.lock().await;
        let mut object = object;
        object.version += 1;
        self.storage.save(&object).await.map_err(map_storage_err)
    }

    pub async fn delete(&self, id: &str) -> Result<(), CoreError> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        self.storage.delete(id).await.map_err(map_storage_err)
    }

    pub async fn list(&self) -> Result<Vec<String>, CoreError> {
        self.storage.list().await.map_err(map_storage_err)
    }

    /// Force a provider refresh regardless of expiry state.
    #[instrument(skip(self))]
    pub async fn refresh(&self, id: &str) -> Result<(), CoreError> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        let object = self.load_required(id).await?;
        let provider = self.provider_for(&object)?;
        let prior_version = object.version;
        let mut refreshed =
            provider
                .refresh(object)
                .await
                .map_err(|e| CoreError::CredentialRefreshError {
                    id: id.to_string(),
                    message: e.message,
                })?;
        refreshed.version = prior_version + 1;
        refreshed.last_refreshed = Some(Utc::now());
        self.storage.save(&refreshed).await.map_err(map_storage_err)
    }

    /// Validate the credential with its provider.
    pub async fn validate(&self, id: &str) -> Result<bool, CoreError> {
        let object = self.load_required(id).await?;
        let provider = self.provider_for(&object)?;
        Ok(provider.validate(&object).await)
    }

    /// Revoke the credential at its issuer and delete it locally on success.
    pub async fn revoke(&self, id: &str) -> Result<bool, CoreError> {
        let object = self.load_required(id).await?;
        let provider = self.provider_for(&object)?;
        let revoked = provider.revoke(&object).await;
        if revoked {
            self.delete(id).await?;
        }
        Ok(revoked)
    }

    /// Substitute `{{id}}` / `{{id.key}}` placeholders with secret values.
    ///
    /// Strict mode fails with `CredentialNotFound` on unknown ids or keys;
    /// lenient mode leaves the placeholder literal.
    pub async fn resolve(&self, template: &str, mode: ResolveMode) -> Result<String, CoreError> {
        let mut out = String::with_capacity(template.len());
        for segment in parse_segments(template) {
            match segment {
                Segment::Literal(text) => out.push_str(&text),
                Segment::Placeholder { raw, id, key } => {
                    let lookup = match &key {
                        Some(key) => self.get_key(&id, key).await,
                        None => self.get(&id).await,
                    };
                    match (lookup, mode) {
                        (Ok(secret), _) => out.push_str(secret.reveal()),
                        (Err(CoreError::CredentialNotFound { .. }), ResolveMode::Lenient) => {
                            out.push_str(&raw);
                        }
                        (Err(err), _) => return Err(err),
                    }
                }
            }
        }
        Ok(out)
    }

    /// Resolve every value of a header map. The input map is untouched on
    /// failure; the resolved copy is only returned when every value
    /// resolves.
    pub async fn resolve_headers(
        &self,
        headers: &FxHashMap<String, String>,
        mode: ResolveMode,
    ) -> Result<FxHashMap<String, String>, CoreError> {
        let mut resolved = FxHashMap::default();
        for (name, value) in headers {
            resolved.insert(name.clone(), self.resolve(value, mode).await?);
        }
        Ok(resolved)
    }

    /// Resolve every value of a query/request parameter map. Same
    /// semantics as [`resolve_headers`](Self::resolve_headers).
    pub async fn resolve_params(
        &self,
        params: &FxHashMap<String, String>,
        mode: ResolveMode,
    ) -> Result<FxHashMap<String, String>, CoreError> {
        self.resolve_headers(params, mode).await
    }
}
