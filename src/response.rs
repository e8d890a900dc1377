use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::etag::Etag;
use crate::expiration::Expiration;
use crate::key::CacheKey;

/// A hydrated domain object. Shared, so a cache hit hands out the very same object.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A hydrated response as kept by [`CacheStorage`](crate::CacheStorage).
///
/// Never mutated: a changed response is stored as a new `CachedResponse` under the same key.
#[derive(Clone)]
pub struct CachedResponse {
    key: CacheKey,
    payload: Payload,
    max_age: Expiration,
    etag: Option<Etag>,
}

impl CachedResponse {
    /// `max_age` is the protocol freshness, independent of how long storage keeps the entry.
    pub fn new(key: CacheKey, payload: Payload, max_age: Expiration, etag: Option<Etag>) -> Self {
        Self { key, payload, max_age, etag }
    }

    /// Key the response is stored under
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The hydrated object
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The payload as a concrete type, `None` if it is something else
    pub fn downcast_payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast().ok()
    }

    /// When the response stops being fresh
    pub fn max_age(&self) -> Expiration {
        self.max_age
    }

    /// Validator for conditional revalidation
    pub fn etag(&self) -> Option<&Etag> {
        self.etag.as_ref()
    }

    /// Can be served without contacting the origin
    pub fn is_fresh(&self) -> bool {
        self.max_age.is_fresh()
    }
}

impl fmt::Debug for CachedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedResponse")
            .field("key", &self.key)
            .field("max_age", &self.max_age)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}
