//! Bounded TTL cache of other users' public keys.
//!
//! Entries hold the PEM text as fetched; callers re-parse on every hit so a
//! corrupted entry is caught and evicted rather than trusted. Eviction is
//! least-recently-inserted once capacity is reached. An entry fetched at
//! `t0` is served until `t0 + ttl` inclusive.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{HashMap, VecDeque},
    ops::Sub,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Default maximum number of cached keys.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default time a fetched key is served without refetching.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Result of inserting into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResult {
    /// Entry was stored.
    Success,
    /// Entry was stored and the oldest entry was evicted.
    Evicted,
    /// Cache has zero capacity; nothing was stored.
    Full,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<I> {
    /// Entry within its TTL.
    Fresh(CachedPublicKey<I>),
    /// Entry existed but outlived its TTL; it has been removed.
    Expired,
    /// No entry.
    Miss,
}

/// A fetched public key and when it was fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPublicKey<I> {
    /// User the key belongs to.
    pub owner_id: String,
    /// SPKI PEM text as served by the directory.
    pub public_key_pem: String,
    /// Version reported by the directory.
    pub version: u64,
    /// When the key was fetched.
    pub fetched_at: I,
}

impl<I> CachedPublicKey<I>
where
    I: Copy + Sub<Output = Duration>,
{
    /// Whether the entry is past its TTL at `now`.
    pub fn is_expired(&self, now: I, ttl: Duration) -> bool {
        now - self.fetched_at > ttl
    }
}

/// In-memory key cache with TTL expiry and LRU eviction.
///
/// Thread-safe via `Arc<Mutex<_>>`; the lock is never held across an await.
/// Clone shares the same entries.
#[derive(Clone)]
pub struct KeyCache<I> {
    inner: Arc<Mutex<KeyCacheInner<I>>>,
    ttl: Duration,
}

struct KeyCacheInner<I> {
    entries: HashMap<String, CachedPublicKey<I>>,
    /// Insertion order, most recent at back.
    lru_order: VecDeque<String>,
    max_capacity: usize,
}

impl<I> KeyCache<I>
where
    I: Copy + Sub<Output = Duration>,
{
    /// Empty cache.
    pub fn new(ttl: Duration, max_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(KeyCacheInner {
                entries: HashMap::new(),
                lru_order: VecDeque::new(),
                max_capacity,
            })),
            ttl,
        }
    }

    /// Configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or overwrite the entry for `entry.owner_id`.
    ///
    /// Concurrent inserts for the same user are last-writer-wins.
    pub fn insert(&self, entry: CachedPublicKey<I>) -> StoreResult {
        let mut inner = self.lock();
        let owner_id = entry.owner_id.clone();

        let is_new_entry = !inner.entries.contains_key(&owner_id);
        if !is_new_entry {
            inner.lru_order.retain(|id| *id != owner_id);
        }

        let result = if is_new_entry && inner.entries.len() >= inner.max_capacity {
            match inner.lru_order.pop_front() {
                Some(oldest_id) => {
                    inner.entries.remove(&oldest_id);
                    StoreResult::Evicted
                },
                None => return StoreResult::Full,
            }
        } else {
            StoreResult::Success
        };

        inner.entries.insert(owner_id.clone(), entry);
        inner.lru_order.push_back(owner_id);

        result
    }

    /// Look up `user_id` as of `now`. Expired entries are removed.
    pub fn lookup(&self, user_id: &str, now: I) -> CacheLookup<I> {
        let mut inner = self.lock();

        let Some(entry) = inner.entries.get(user_id) else {
            return CacheLookup::Miss;
        };

        if entry.is_expired(now, self.ttl) {
            inner.entries.remove(user_id);
            inner.lru_order.retain(|id| id != user_id);
            return CacheLookup::Expired;
        }

        CacheLookup::Fresh(entry.clone())
    }

    /// Entry for `user_id` regardless of age.
    pub fn peek(&self, user_id: &str) -> Option<CachedPublicKey<I>> {
        self.lock().entries.get(user_id).cloned()
    }

    /// Remove the entry for `user_id`. Returns whether one existed.
    pub fn remove(&self, user_id: &str) -> bool {
        let mut inner = self.lock();

        let existed = inner.entries.remove(user_id).is_some();
        if existed {
            inner.lru_order.retain(|id| id != user_id);
        }

        existed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.lru_order.clear();
    }

    /// Number of cached keys, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.lock().max_capacity
    }

    fn lock(&self) -> MutexGuard<'_, KeyCacheInner<I>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<I> std::fmt::Debug for KeyCache<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}
