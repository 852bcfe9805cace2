//! Encrypted file backend for credential storage.
//!
//! Each credential is one file `<dir>/<id>.cred` holding a random 96-bit
//! nonce followed by AES-256-GCM ciphertext of the credential's JSON form.
//! GCM authenticates the ciphertext, so any tampering (or a wrong key)
//! surfaces as [`CredentialStorageError::Corrupt`] — never as a silently
//! missing or garbled credential. A cleartext `index.json` lists ids.
//!
//! The master key resolves in order: explicit bytes, the
//! `AGENTLOOM_CREDENTIAL_KEY` environment variable (64 hex chars), or a
//! freshly generated key persisted to `<dir>/master.key` with a one-time
//! warning telling the operator to move it somewhere safer.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::object::CredentialObject;
use super::storage::{CredentialStorage, CredentialStorageError, Result};
use crate::session_store::write_atomic;

/// Environment variable holding the 64-hex-char master key.
pub const KEY_ENV_VAR: &str = "AGENTLOOM_CREDENTIAL_KEY";

const NONCE_LEN: usize = 12;

/// AES-256-GCM encrypted file storage.
pub struct EncryptedFileStorage {
    dir: PathBuf,
    cipher: Aes256Gcm,
}

impl EncryptedFileStorage {
    /// Open (creating if needed) an encrypted store in `dir`.
    ///
    /// With `key: None` the key resolves from the environment or, failing
    /// that, is generated and written next to the store.
    pub fn open(dir: impl Into<PathBuf>, key: Option<[u8; 32]>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CredentialStorageError::Backend {
            message: format!("create {}: {e}", dir.display()),
        })?;
        let key_bytes = match key {
            Some(bytes) => bytes,
            None => Self::resolve_key(&dir)?,
        };
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            dir,
            cipher: Aes256Gcm::new(key),
        })
    }

    fn resolve_key(dir: &Path) -> Result<[u8; 32]> {
        if let Ok(hex) = std::env::var(KEY_ENV_VAR) {
            return decode_hex_key(&hex).ok_or_else(|| CredentialStorageError::Backend {
                message: format!("{KEY_ENV_VAR} must be 64 hex characters"),
            });
        }
        let key_path = dir.join("master.key");
        if let Ok(hex) = std::fs::read_to_string(&key_path) {
            if let Some(bytes) = decode_hex_key(hex.trim()) {
                return Ok(bytes);
            }
        }
        let generated = Aes256Gcm::generate_key(OsRng);
        let bytes: [u8; 32] = generated.into();
        write_atomic(dir, &key_path, encode_hex(&bytes).as_bytes()).map_err(|e| {
            CredentialStorageError::Backend {
                message: format!("write {}: {e}", key_path.display()),
            }
        })?;
        tracing::warn!(
            key_path = %key_path.display(),
            "no credential encryption key configured; generated one. \
             Persist it (e.g. as {KEY_ENV_VAR}) or credentials saved now \
             will be unreadable if this file is lost",
        );
        Ok(bytes)
    }

    fn credential_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.cred"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(self.index_path()) {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|e| CredentialStorageError::Backend {
                    message: format!("decode index: {e}"),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CredentialStorageError::Backend {
                message: format!("read index: {e}"),
            }),
        }
    }

    fn write_index(&self, ids: &[String]) -> Result<()> {
        let json =
            serde_json::to_string(ids).map_err(|e| CredentialStorageError::Backend {
                message: format!("encode index: {e}"),
            })?;
        write_atomic(&self.dir, &self.index_path(), json.as_bytes()).map_err(|e| {
            CredentialStorageError::Backend {
                message: format!("write index: {e}"),
            }
        })
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex_key(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let high = (chunk[0] as char).to_digit(16)?;
        let low = (chunk[1] as char).to_digit(16)?;
        out[i] = ((high << 4) | low) as u8;
    }
    Some(out)
}

#[async_trait]
impl CredentialStorage for EncryptedFileStorage {
    async fn load(&self, id: &str) -> Result<Option<CredentialObject>> {
        let path = self.credential_path(id);
        let blob = match std::fs::read(&path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CredentialStorageError::Backend {
                    message: format!("read {}: {e}", path.display()),
                });
            }
        };
        if blob.len() <= NONCE_LEN {
            return Err(CredentialStorageError::Corrupt { id: id.to_string() });
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredentialStorageError::Corrupt { id: id.to_string() })?;
        let object = serde_json::from_slice(&plaintext)
            .map_err(|_| CredentialStorageError::Corrupt { id: id.to_string() })?;
        Ok(Some(object))
    }

    async fn save(&self, object: &CredentialObject) -> Result<()> {
        let plaintext =
            serde_json::to_vec(object).map_err(|e| CredentialStorageError::Backend {
                message: format!("encode credential {}: {e}", object.id),
            })?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| CredentialStorageError::Backend {
                message: format!("encrypt credential {}: {e}", object.id),
            })?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);

        let path = self.credential_path(&object.id);
        write_atomic(&self.dir, &path, &blob).map_err(|e| CredentialStorageError::Backend {
            message: format!("write {}: {e}", path.display()),
        })?;

        let mut index = self.read_index()?;
        if !index.contains(&object.id) {
            index.push(object.id.clone());
            index.sort();
            self.write_index(&index)?;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.credential_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CredentialStorageError::Backend {
                    message: format!("delete {}: {e}", path.display()),
                });
            }
        }
        let mut index = self.read_index()?;
        index.retain(|existing| existing != id);
        self.write_index(&index)
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.read_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::object::{CredentialKey, CredentialKind};

    fn cred(id: &str) -> CredentialObject {
        CredentialObject::new(id, CredentialKind::ApiKey)
            .with_key(CredentialKey::new("api_key", "sk-test-123"))
    }

    #[tokio::test]
    async fn round_trip_with_explicit_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = EncryptedFileStorage::open(dir.path(), Some([7u8; 32])).unwrap();
        storage.save(&cred("svc")).await.unwrap();

        let loaded = storage.load("svc").await.unwrap().unwrap();
        assert_eq!(loaded.key("api_key").unwrap().secret.reveal(), "sk-test-123");
        assert_eq!(storage.list().await.unwrap(), vec!["svc".to_string()]);
    }

    #[tokio::test]
    async fn ciphertext_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let storage = EncryptedFileStorage::open(dir.path(), Some([7u8; 32])).unwrap();
        storage.save(&cred("svc")).await.unwrap();

        let blob = std::fs::read(dir.path().join("svc.cred")).unwrap();
        let raw = String::from_utf8_lossy(&blob);
        assert!(!raw.contains("sk-test-123"));
    }

    #[tokio::test]
    async fn tampering_surfaces_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let storage = EncryptedFileStorage::open(dir.path(), Some([7u8; 32])).unwrap();
        storage.save(&cred("svc")).await.unwrap();

        let path = dir.path().join("svc.cred");
        let mut blob = std::fs::read(&path).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        std::fs::write(&path, &blob).unwrap();

        let err = storage.load("svc").await.unwrap_err();
        assert!(matches!(err, CredentialStorageError::Corrupt { id } if id == "svc"));
    }

    #[tokio::test]
    async fn wrong_key_surfaces_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = EncryptedFileStorage::open(dir.path(), Some([7u8; 32])).unwrap();
            storage.save(&cred("svc")).await.unwrap();
        }
        let other = EncryptedFileStorage::open(dir.path(), Some([8u8; 32])).unwrap();
        assert!(matches!(
            other.load("svc").await,
            Err(CredentialStorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn hex_round_trip() {
        let bytes = [0xABu8; 32];
        let hex = encode_hex(&bytes);
        assert_eq!(decode_hex_key(&hex), Some(bytes));
        assert_eq!(decode_hex_key("zz"), None);
    }
}
