//! Local persistence for the user's private key.
//!
//! At most one [`StoredKey`] per user id. The store never interprets the key
//! material; [`KeyStore::load_validated`] runs it through the
//! [`KeyValidator`] before anything trusts it.

mod memory;
mod redb;

use async_trait::async_trait;
pub use memory::MemoryKeyStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use veilchat_crypto::{ChaCha20Rng, CryptoError, KeyPair, KeyValidator};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use self::redb::RedbKeyStore;

/// Key storage failures. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// The single per-user record: PKCS#8 PEM private key plus its version.
///
/// Zeroized on drop; `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredKey {
    /// PKCS#8 PEM private key.
    pub private_key_pem: String,
    /// Version of the key pair.
    pub version: u64,
}

impl StoredKey {
    /// Capture the private half of a key pair.
    pub fn from_pair(pair: &KeyPair) -> Result<Self, CryptoError> {
        let pem = pair.private_key().to_pem()?;
        Ok(Self { private_key_pem: pem.as_str().to_owned(), version: pair.version() })
    }
}

impl std::fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKey")
            .field("private_key_pem", &"<redacted>")
            .field("version", &self.version)
            .finish()
    }
}

/// Persistence for the local private key.
///
/// Implementations share state across clones or behind `Arc`, and must be
/// safe to call from concurrent tasks.
#[async_trait]
pub trait KeyStore: Send + Sync + 'static {
    /// Persist `key` for `user_id`, overwriting any existing record.
    async fn store(&self, user_id: &str, key: &StoredKey) -> Result<(), StorageError>;

    /// Stored record for `user_id`, if any.
    async fn retrieve(&self, user_id: &str) -> Result<Option<StoredKey>, StorageError>;

    /// Remove the record for `user_id`. Removing a missing record succeeds.
    async fn clear(&self, user_id: &str) -> Result<(), StorageError>;

    /// Swap the record for `user_id`.
    ///
    /// Backends that can do so atomically override this; the default clears
    /// then stores.
    async fn replace(&self, user_id: &str, key: &StoredKey) -> Result<(), StorageError> {
        self.clear(user_id).await?;
        self.store(user_id, key).await
    }

    /// Whether the stored record exists and passes validation.
    async fn validate_stored(
        &self,
        user_id: &str,
        validator: &KeyValidator,
        rng: &mut ChaCha20Rng,
    ) -> Result<bool, StorageError> {
        Ok(self.load_validated(user_id, validator, rng).await?.is_some())
    }

    /// Rebuild the stored key pair, treating a record that fails validation
    /// as absent.
    async fn load_validated(
        &self,
        user_id: &str,
        validator: &KeyValidator,
        rng: &mut ChaCha20Rng,
    ) -> Result<Option<KeyPair>, StorageError> {
        let Some(stored) = self.retrieve(user_id).await? else {
            return Ok(None);
        };

        match validator.validate_stored(&stored.private_key_pem, stored.version, rng) {
            Ok(pair) => Ok(Some(pair)),
            Err(error) => {
                tracing::warn!(user_id, version = stored.version, %error, "stored key failed validation");
                Ok(None)
            },
        }
    }
}
