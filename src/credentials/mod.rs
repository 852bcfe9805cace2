//! Encrypted multi-key credential store with pluggable providers and
//! `{{id.key}}` template resolution.
//!
//! Secrets live inside opaque [`Secret`] wrappers whose only read is
//! `reveal()`, used at the request-resolution boundary; no error message,
//! log line, or query result ever carries secret bytes.

pub mod encrypted;
pub mod object;
pub mod provider;
pub mod secret;
pub mod storage;
pub mod store;
pub mod template;

pub use encrypted::{EncryptedFileStorage, KEY_ENV_VAR};
pub use object::{
    CredentialKey, CredentialKind, CredentialObject, DEFAULT_REFRESH_BUFFER_SECS,
};
pub use provider::{CredentialProvider, ProviderError, STATIC_PROVIDER_ID, StaticProvider};
pub use secret::Secret;
pub use storage::{
    CredentialStorage, CredentialStorageError, EnvCredentialStorage, InMemoryCredentialStorage,
    LayeredCredentialStorage,
};
pub use store::CredentialStore;
pub use template::ResolveMode;
