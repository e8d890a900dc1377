use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

use crate::error::BoxError;
use crate::expiration::Expiration;
use crate::key::CacheKey;
use crate::response::CachedResponse;

/// Failure of a storage backend. The executor logs these and carries on as if the cache were empty.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached
    #[error("cache backend unavailable: {0}")]
    Unavailable(#[source] BoxError),
    /// The backend answered, but with something unusable
    #[error("cache backend failed: {0}")]
    Backend(#[source] BoxError),
}

/// Result of a storage operation
pub type StorageResult<T> = Result<T, StorageError>;

/// Where [`CachedResponse`]s live between requests.
///
/// Every operation must work against a cold or empty backend. Implementations
/// shared between threads are responsible for their own synchronization.
pub trait CacheStorage: Send + Sync {
    /// The stored response, `None` when missing or past its storage TTL
    fn get(&self, key: &CacheKey) -> StorageResult<Option<CachedResponse>>;

    /// Stores `response` under its own key until `ttl`, replacing any previous entry.
    ///
    /// `ttl` is the retention window and is unrelated to the response's max-age.
    fn save(&self, response: CachedResponse, ttl: Expiration) -> StorageResult<()>;

    /// Removes one entry. Missing keys are not an error.
    fn delete(&self, key: &CacheKey) -> StorageResult<()>;

    /// Removes everything
    fn clear(&self) -> StorageResult<()>;
}

impl<S: CacheStorage + ?Sized> CacheStorage for Arc<S> {
    fn get(&self, key: &CacheKey) -> StorageResult<Option<CachedResponse>> {
        (**self).get(key)
    }
    fn save(&self, response: CachedResponse, ttl: Expiration) -> StorageResult<()> {
        (**self).save(response, ttl)
    }
    fn delete(&self, key: &CacheKey) -> StorageResult<()> {
        (**self).delete(key)
    }
    fn clear(&self) -> StorageResult<()> {
        (**self).clear()
    }
}

impl<S: CacheStorage + ?Sized> CacheStorage for &S {
    fn get(&self, key: &CacheKey) -> StorageResult<Option<CachedResponse>> {
        (**self).get(key)
    }
    fn save(&self, response: CachedResponse, ttl: Expiration) -> StorageResult<()> {
        (**self).save(response, ttl)
    }
    fn delete(&self, key: &CacheKey) -> StorageResult<()> {
        (**self).delete(key)
    }
    fn clear(&self) -> StorageResult<()> {
        (**self).clear()
    }
}

/// Storage that never keeps anything. Every lookup is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl CacheStorage for NullStorage {
    fn get(&self, _key: &CacheKey) -> StorageResult<Option<CachedResponse>> {
        Ok(None)
    }
    fn save(&self, _response: CachedResponse, _ttl: Expiration) -> StorageResult<()> {
        Ok(())
    }
    fn delete(&self, _key: &CacheKey) -> StorageResult<()> {
        Ok(())
    }
    fn clear(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// In-process storage that drops entries once their storage TTL has passed.
///
/// Expired entries are evicted lazily: on `get` of the same key, on every `save`, or in bulk
/// with [`MemoryStorage::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<CacheKey, (CachedResponse, Expiration)>>,
}

impl MemoryStorage {
    /// Empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// No entries at all
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every entry whose storage TTL has passed at `now`. Returns how many were dropped.
    pub fn purge_expired(&self, now: SystemTime) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, (_, ttl)| ttl.is_fresh_at(now));
        before - entries.len()
    }

    fn get_at(&self, key: &CacheKey, now: SystemTime) -> Option<CachedResponse> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some((response, ttl)) if ttl.is_fresh_at(now) => return Some(response.clone()),
                Some(_) => {}
            }
        }
        // re-check under the write lock, a concurrent save may have replaced it
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|(_, ttl)| ttl.is_expired_at(now)) {
            entries.remove(key);
        }
        None
    }
}

impl CacheStorage for MemoryStorage {
    fn get(&self, key: &CacheKey) -> StorageResult<Option<CachedResponse>> {
        Ok(self.get_at(key, SystemTime::now()))
    }

    fn save(&self, response: CachedResponse, ttl: Expiration) -> StorageResult<()> {
        let now = SystemTime::now();
        let mut entries = self.entries.write();
        entries.retain(|_, (_, expires)| expires.is_fresh_at(now));
        entries.insert(response.key().clone(), (response, ttl));
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}
