//! Cached, retrying front end to a [`KeyDirectory`].
//!
//! Lookups consult the [`KeyCache`] first. A cached PEM is re-parsed on every
//! hit; a malformed entry is evicted and refetched. Network calls go through
//! the shared [`RetryPolicy`], and each attempt races its own timeout so a
//! hanging directory surfaces as [`DirectoryError::Timeout`] instead of
//! blocking the caller.

use std::{future::Future, sync::Arc, time::Duration};

use veilchat_core::{Environment, RetryPolicy};
use veilchat_crypto::PublicKey;

use super::{
    CacheLookup, CachedPublicKey, Credential, DirectoryError, KeyCache, KeyDirectory,
    PublicKeyRecord,
};
use crate::config::DirectoryClientConfig;

/// A parsed public key and its directory version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedKey {
    /// Parsed public key.
    pub public_key: PublicKey,
    /// Version reported by the directory.
    pub version: u64,
}

/// Key directory access with TTL cache, per-attempt timeout and retry.
pub struct KeyDirectoryClient<E: Environment> {
    directory: Arc<dyn KeyDirectory>,
    cache: KeyCache<E::Instant>,
    env: E,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl<E: Environment> KeyDirectoryClient<E> {
    /// Client with default cache and retry settings.
    pub fn new(directory: Arc<dyn KeyDirectory>, env: E) -> Self {
        Self::with_config(directory, env, &DirectoryClientConfig::default())
    }

    /// Client with explicit settings.
    pub fn with_config(
        directory: Arc<dyn KeyDirectory>,
        env: E,
        config: &DirectoryClientConfig,
    ) -> Self {
        Self {
            directory,
            cache: KeyCache::new(config.cache_ttl, config.cache_capacity),
            env,
            retry: config.retry,
            attempt_timeout: config.attempt_timeout,
        }
    }

    /// The cache, for inspection.
    pub fn cache(&self) -> &KeyCache<E::Instant> {
        &self.cache
    }

    /// Public key for `user_id`, from cache when fresh.
    ///
    /// # Errors
    ///
    /// - Transient failures after all retries are exhausted
    /// - `NotFound`, `Unauthorized` or `Rejected` immediately
    /// - `MalformedKey` if the directory serves something that is not a
    ///   public key (not retried, not cached)
    pub async fn fetch_public_key(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<FetchedKey, DirectoryError> {
        match self.cache.lookup(user_id, self.env.now()) {
            CacheLookup::Fresh(entry) => match PublicKey::from_pem(&entry.public_key_pem) {
                Ok(public_key) => {
                    tracing::debug!(user_id, version = entry.version, "public key cache hit");
                    return Ok(FetchedKey { public_key, version: entry.version });
                },
                Err(error) => {
                    tracing::warn!(user_id, %error, "cached public key is malformed, refetching");
                    self.cache.remove(user_id);
                },
            },
            CacheLookup::Expired => tracing::debug!(user_id, "cached public key expired"),
            CacheLookup::Miss => {},
        }

        let fetched = self.fetch_remote(user_id, credential).await?;
        self.cache.insert(CachedPublicKey {
            owner_id: user_id.to_owned(),
            public_key_pem: fetched.public_key.to_pem().to_owned(),
            version: fetched.version,
            fetched_at: self.env.now(),
        });

        Ok(fetched)
    }

    /// Fetch from the directory, bypassing and not updating the cache.
    pub async fn fetch_remote(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<FetchedKey, DirectoryError> {
        let record = self
            .retry
            .run(&self.env, "fetch_public_key", DirectoryError::is_transient, move |_| {
                self.attempt(self.directory.get_public_key(user_id, credential))
            })
            .await?;

        parse_record(user_id, &record)
    }

    /// Publish our public key. Retried like fetches.
    ///
    /// Returns the version the directory acknowledged.
    pub async fn upload_public_key(
        &self,
        user_id: &str,
        public_key: &PublicKey,
        version: u64,
        credential: &Credential,
    ) -> Result<u64, DirectoryError> {
        let record = PublicKeyRecord { public_key: public_key.to_pem().to_owned(), key_version: version };
        let record = &record;

        let acked = self
            .retry
            .run(&self.env, "upload_public_key", DirectoryError::is_transient, move |_| {
                self.attempt(self.directory.put_public_key(user_id, record, credential))
            })
            .await?;

        tracing::info!(user_id, version, acked, "public key uploaded");
        Ok(acked)
    }

    /// Evict then refetch. Used after a rotation is detected.
    pub async fn refresh(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<FetchedKey, DirectoryError> {
        self.cache.remove(user_id);
        self.fetch_public_key(user_id, credential).await
    }

    /// Whether the cached key for `user_id` is stale.
    ///
    /// True if the cached entry is malformed or the directory reports a
    /// higher version. With nothing cached, the key is fetched and cached and
    /// the answer is false.
    pub async fn check_rotation_needed(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<bool, DirectoryError> {
        let Some(cached) = self.cache.peek(user_id) else {
            self.fetch_public_key(user_id, credential).await?;
            return Ok(false);
        };

        if PublicKey::from_pem(&cached.public_key_pem).is_err() {
            return Ok(true);
        }

        let remote = self.fetch_remote(user_id, credential).await?;
        Ok(remote.version > cached.version)
    }

    /// Drop the cached key for `user_id`.
    pub fn invalidate(&self, user_id: &str) {
        self.cache.remove(user_id);
    }

    /// Version of the cached key for `user_id`, if cached.
    pub fn cached_version(&self, user_id: &str) -> Option<u64> {
        self.cache.peek(user_id).map(|entry| entry.version)
    }

    /// Drop every cached key.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn attempt<T>(
        &self,
        request: impl Future<Output = Result<T, DirectoryError>>,
    ) -> Result<T, DirectoryError> {
        tokio::select! {
            biased;
            result = request => result,
            () = self.env.sleep(self.attempt_timeout) => {
                Err(DirectoryError::Timeout(self.attempt_timeout))
            },
        }
    }
}

impl<E: Environment> std::fmt::Debug for KeyDirectoryClient<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDirectoryClient")
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

fn parse_record(user_id: &str, record: &PublicKeyRecord) -> Result<FetchedKey, DirectoryError> {
    let public_key = PublicKey::from_pem(&record.public_key).map_err(|e| {
        DirectoryError::MalformedKey { user_id: user_id.to_owned(), reason: e.to_string() }
    })?;

    Ok(FetchedKey { public_key, version: record.key_version })
}
