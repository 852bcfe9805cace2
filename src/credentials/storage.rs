//! Credential storage backends.
//!
//! The [`CredentialStorage`] trait is deliberately tiny (load/save/delete/
//! list); the interesting backends are the encrypted file store (see
//! [`super::encrypted`]), the read-only environment backend, and the
//! layered composite whose reads try the primary then each fallback and
//! whose writes always go to the primary.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use super::object::{CredentialKey, CredentialKind, CredentialObject};

/// Errors from storage backends.
#[derive(Debug, Error, Diagnostic)]
pub enum CredentialStorageError {
    /// Ciphertext failed authentication or decryption.
    #[error("credential storage corrupt for {id}")]
    #[diagnostic(code(agentloom::credentials::storage_corrupt))]
    Corrupt { id: String },

    /// Backend is read-only (environment variables).
    #[error("storage backend is read-only")]
    #[diagnostic(code(agentloom::credentials::read_only))]
    ReadOnly,

    /// Filesystem or serialization failure.
    #[error("storage backend error: {message}")]
    #[diagnostic(code(agentloom::credentials::storage_backend))]
    Backend { message: String },
}

pub type Result<T> = std::result::Result<T, CredentialStorageError>;

/// Abstract credential persistence.
#[async_trait]
pub trait CredentialStorage: Send + Sync {
    /// Load by id; `Ok(None)` when absent. Decryption failure is an error
    /// ([`CredentialStorageError::Corrupt`]), never a silent `None`.
    async fn load(&self, id: &str) -> Result<Option<CredentialObject>>;

    async fn save(&self, object: &CredentialObject) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<String>>;
}

/// Volatile in-process backend.
#[derive(Default)]
pub struct InMemoryCredentialStorage {
    inner: RwLock<FxHashMap<String, CredentialObject>>,
}

impl InMemoryCredentialStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStorage for InMemoryCredentialStorage {
    async fn load(&self, id: &str) -> Result<Option<CredentialObject>> {
        Ok(self.inner.read().get(id).cloned())
    }

    async fn save(&self, object: &CredentialObject) -> Result<()> {
        self.inner
            .write()
            .insert(object.id.clone(), object.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.write().remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.inner.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Read-only backend that maps credential ids to environment variables.
///
/// Loads materialize as single-key `api_key` credentials; writes fail with
/// [`CredentialStorageError::ReadOnly`].
pub struct EnvCredentialStorage {
    mappings: FxHashMap<String, String>,
}

impl EnvCredentialStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mappings: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_mapping(mut self, id: impl Into<String>, env_var: impl Into<String>) -> Self {
        self.mappings.insert(id.into(), env_var.into());
        self
    }
}

impl Default for EnvCredentialStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStorage for EnvCredentialStorage {
    async fn load(&self, id: &str) -> Result<Option<CredentialObject>> {
        let Some(var) = self.mappings.get(id) else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(value) => Ok(Some(
                CredentialObject::new(id, CredentialKind::ApiKey)
                    .with_key(CredentialKey::new("api_key", value)),
            )),
            Err(_) => Ok(None),
        }
    }

    async fn save(&self, _object: &CredentialObject) -> Result<()> {
        Err(CredentialStorageError::ReadOnly)
    }

    async fn delete(&self, _id: &str) -> Result<()> {
        Err(CredentialStorageError::ReadOnly)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .mappings
            .iter()
            .filter(|(_, var)| std::env::var(var).is_ok())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Composite backend: reads try the primary then each fallback in order;
/// writes and deletes go to the primary only.
pub struct LayeredCredentialStorage {
    primary: Arc<dyn CredentialStorage>,
    fallbacks: Vec<Arc<dyn CredentialStorage>>,
}

impl LayeredCredentialStorage {
    #[must_use]
    pub fn new(primary: Arc<dyn CredentialStorage>) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn CredentialStorage>) -> Self {
        self.fallbacks.push(fallback);
        self
    }
}

#[async_trait]
impl CredentialStorage for LayeredCredentialStorage {
    async fn load(&self, id: &str) -> Result<Option<CredentialObject>> {
        if let Some(found) = self.primary.load(id).await? {
            return Ok(Some(found));
        }
        for fallback in &self.fallbacks {
            if let Some(found) = fallback.load(id).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn save(&self, object: &CredentialObject) -> Result<()> {
        self.primary.save(object).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.primary.delete(id).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = self.primary.list().await?;
        for fallback in &self.fallbacks {
            for id in fallback.list().await? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(id: &str, secret: &str) -> CredentialObject {
        CredentialObject::new(id, CredentialKind::ApiKey)
            .with_key(CredentialKey::new("api_key", secret))
    }

    #[tokio::test]
    async fn layered_reads_fall_through() {
        let primary = Arc::new(InMemoryCredentialStorage::new());
        let fallback = Arc::new(InMemoryCredentialStorage::new());
        fallback.save(&cred("only-fallback", "x")).await.unwrap();

        let layered = LayeredCredentialStorage::new(primary.clone())
            .with_fallback(fallback);
        assert!(layered.load("only-fallback").await.unwrap().is_some());

        layered.save(&cred("written", "y")).await.unwrap();
        assert!(primary.load("written").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn env_storage_is_read_only() {
        let storage = EnvCredentialStorage::new().with_mapping("svc", "AGENTLOOM_TEST_SVC_KEY");
        assert!(matches!(
            storage.save(&cred("svc", "x")).await,
            Err(CredentialStorageError::ReadOnly)
        ));
    }
}
