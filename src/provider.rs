//! The storage seam the cache facade persists through.
//!
//! A provider is a narrow contract over a keyed store with TTL support.
//! Anything network-shaped (Redis, Valkey, Memcached, ...) lives outside
//! this crate; the bundled implementations cover in-process use and
//! explicitly disabled caching.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::CacheEntry;

/// Abstracts storage for encoded cache entries.
///
/// Implementations must be safe for concurrent use. There are no ordering
/// guarantees between keys, and the facade never retries provider errors.
pub trait CacheProvider: Send + Sync {
    /// The storage representation this provider persists.
    type Stored: Send + 'static;

    /// Retrieves a value by key.
    ///
    /// A genuine miss is `Ok(None)`; transient backend failures surface as
    /// errors.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheEntry<Option<Self::Stored>>>;

    /// Stores a value under `key`.
    ///
    /// A zero `ttl` stores without backend expiry; a positive `ttl` sets an
    /// absolute TTL at the backend.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Self::Stored,
        ttl: Duration,
    ) -> BoxFuture<'a, CacheEntry<()>>;

    /// Removes a value by key. Deleting a missing key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheEntry<()>>;
}

/// A provider that does nothing.
///
/// Every `get` is a miss and `set`/`delete` succeed without storing.
/// Useful for tests or when caching should be explicitly disabled.
#[derive(Debug)]
pub struct NoopProvider<S> {
    _stored: PhantomData<fn() -> S>,
}

impl<S> NoopProvider<S> {
    pub fn new() -> Self {
        NoopProvider {
            _stored: PhantomData,
        }
    }
}

impl<S> Default for NoopProvider<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> CacheProvider for NoopProvider<S>
where
    S: Send + Sync + 'static,
{
    type Stored = S;

    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, CacheEntry<Option<S>>> {
        Box::pin(async { Ok(None) })
    }

    fn set<'a>(&'a self, _key: &'a str, _value: S, _ttl: Duration) -> BoxFuture<'a, CacheEntry<()>> {
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, CacheEntry<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// An in-process provider backed by a mutex-guarded map.
///
/// Honors the TTL contract: entries stored with a positive TTL report as
/// misses once it elapses and are dropped lazily on access. Entries stored
/// with a zero TTL never expire at this layer.
#[derive(Debug)]
pub struct MemoryProvider<S> {
    entries: Mutex<HashMap<String, StoredEntry<S>>>,
}

#[derive(Debug)]
struct StoredEntry<S> {
    value: S,
    expires_at: Option<Instant>,
}

impl<S> MemoryProvider<S> {
    pub fn new() -> Self {
        MemoryProvider {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The number of live entries, counting expired-but-unswept ones.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<S> Default for MemoryProvider<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> CacheProvider for MemoryProvider<S>
where
    S: Clone + Send + Sync + 'static,
{
    type Stored = S;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheEntry<Option<S>>> {
        Box::pin(async move {
            let mut entries = self.entries.lock();
            let expired = entries
                .get(key)
                .is_some_and(|entry| entry.expires_at.is_some_and(|at| Instant::now() >= at));
            if expired {
                entries.remove(key);
                return Ok(None);
            }
            Ok(entries.get(key).map(|entry| entry.value.clone()))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: S, ttl: Duration) -> BoxFuture<'a, CacheEntry<()>> {
        Box::pin(async move {
            let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
            self.entries
                .lock()
                .insert(key.to_owned(), StoredEntry { value, expires_at });
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheEntry<()>> {
        Box::pin(async move {
            self.entries.lock().remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_always_misses() {
        let provider = NoopProvider::<u32>::new();
        provider.set("k", 1, Duration::ZERO).await.unwrap();
        assert_eq!(provider.get("k").await.unwrap(), None);
        provider.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn memory_round_trip_and_delete() {
        let provider = MemoryProvider::new();
        provider.set("k", 7u32, Duration::ZERO).await.unwrap();
        assert_eq!(provider.get("k").await.unwrap(), Some(7));

        provider.delete("k").await.unwrap();
        assert_eq!(provider.get("k").await.unwrap(), None);

        // Deleting a missing key succeeds.
        provider.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn memory_honors_backend_ttl() {
        let provider = MemoryProvider::new();
        provider
            .set("k", 1u32, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(provider.get("k").await.unwrap(), Some(1));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(provider.get("k").await.unwrap(), None);
        assert!(provider.is_empty());
    }
}
