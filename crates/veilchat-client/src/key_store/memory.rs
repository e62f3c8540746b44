#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use super::{KeyStore, StorageError, StoredKey};

/// In-memory key store for tests and ephemeral sessions.
///
/// Clone shares the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    inner: Arc<Mutex<HashMap<String, StoredKey>>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with a stored key.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no user has a stored key.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, StoredKey>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore").field("users", &self.len()).finish()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn store(&self, user_id: &str, key: &StoredKey) -> Result<(), StorageError> {
        self.entries().insert(user_id.to_owned(), key.clone());
        Ok(())
    }

    async fn retrieve(&self, user_id: &str) -> Result<Option<StoredKey>, StorageError> {
        Ok(self.entries().get(user_id).cloned())
    }

    async fn clear(&self, user_id: &str) -> Result<(), StorageError> {
        self.entries().remove(user_id);
        Ok(())
    }

    async fn replace(&self, user_id: &str, key: &StoredKey) -> Result<(), StorageError> {
        self.store(user_id, key).await
    }
}
