#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use super::{Credential, DirectoryError, KeyDirectory, PublicKeyRecord};

/// In-process directory for tests and single-machine use.
///
/// Accepts any credential unless one is required with
/// [`Self::requiring_credential`]. Counts requests so tests can assert on
/// network traffic. Clone shares the same records and counters.
#[derive(Clone, Default)]
pub struct MemoryKeyDirectory {
    inner: Arc<Mutex<MemoryDirectoryInner>>,
}

#[derive(Default)]
struct MemoryDirectoryInner {
    records: HashMap<String, PublicKeyRecord>,
    required_token: Option<String>,
    get_count: usize,
    put_count: usize,
}

impl MemoryKeyDirectory {
    /// Empty directory accepting any credential.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty directory that rejects every other credential as unauthorized.
    pub fn requiring_credential(credential: &Credential) -> Self {
        let directory = Self::new();
        directory.lock().required_token = Some(credential.expose().to_owned());
        directory
    }

    /// Publish a record directly, bypassing request counting.
    pub fn insert(&self, user_id: &str, record: PublicKeyRecord) {
        self.lock().records.insert(user_id.to_owned(), record);
    }

    /// Remove a user's record.
    pub fn remove(&self, user_id: &str) {
        self.lock().records.remove(user_id);
    }

    /// Currently published record for a user.
    pub fn record(&self, user_id: &str) -> Option<PublicKeyRecord> {
        self.lock().records.get(user_id).cloned()
    }

    /// Number of lookups served.
    pub fn get_count(&self) -> usize {
        self.lock().get_count
    }

    /// Number of uploads accepted or rejected.
    pub fn put_count(&self) -> usize {
        self.lock().put_count
    }

    fn lock(&self) -> MutexGuard<'_, MemoryDirectoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryDirectoryInner {
    fn authorize(&self, credential: &Credential) -> Result<(), DirectoryError> {
        match &self.required_token {
            Some(token) if token != credential.expose() => Err(DirectoryError::Unauthorized),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for MemoryKeyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryKeyDirectory")
            .field("users", &inner.records.len())
            .field("get_count", &inner.get_count)
            .field("put_count", &inner.put_count)
            .finish()
    }
}

#[async_trait]
impl KeyDirectory for MemoryKeyDirectory {
    async fn get_public_key(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<PublicKeyRecord, DirectoryError> {
        let mut inner = self.lock();
        inner.get_count += 1;
        inner.authorize(credential)?;

        inner
            .records
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound { user_id: user_id.to_owned() })
    }

    async fn put_public_key(
        &self,
        user_id: &str,
        record: &PublicKeyRecord,
        credential: &Credential,
    ) -> Result<u64, DirectoryError> {
        let mut inner = self.lock();
        inner.put_count += 1;
        inner.authorize(credential)?;

        inner.records.insert(user_id.to_owned(), record.clone());
        Ok(record.key_version)
    }
}
