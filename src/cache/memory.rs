//! In-process [`CacheStore`] on a bounded moka cache.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;
use tokio::time::Instant;
use tracing::trace;

use super::{CacheError, CacheStore};

/// Entries kept before least-recently-used ones are evicted.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Longest TTL an entry may carry. Longer ones are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

#[derive(Clone)]
struct Entry {
    value: Bytes,
    ttl: Duration,
    /// Read-side deadline on the tokio clock, so paused-time tests see expiry.
    expires_at: Instant,
}

/// Evicts each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// A process-local cache backend.
///
/// Each entry expires after the TTL it was written with and is evicted by
/// moka's housekeeping. The cache holds at most `max_entries` entries.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Entry>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Number of entries held, after pending evictions have run.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let value = self
            .entries
            .get(key)
            .await
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value);
        trace!(key, hit = value.is_some(), "memory cache read");
        Ok(value)
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let ttl = ttl.min(MAX_TTL);
        let entry = Entry {
            value,
            ttl,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_owned(), entry).await;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), CacheError> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn put_get_forget() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.put("k", Bytes::from_static(b"v1"), MINUTE).await.unwrap();
        cache.put("k", Bytes::from_static(b"v2"), MINUTE).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from_static(b"v2")));
        assert_eq!(cache.len().await, 1);

        cache.forget("k").await.unwrap();
        cache.forget("k").await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache.put("k", Bytes::from_static(b"v"), MINUTE).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn put_refreshes_ttl() {
        let cache = MemoryCache::new();
        cache.put("k", Bytes::from_static(b"v"), MINUTE).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.put("k", Bytes::from_static(b"v"), MINUTE).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(cache.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_evicted() {
        let cache = MemoryCache::new();
        for i in 0..100 {
            let key = format!("search_{i}_posts");
            cache
                .put(&key, Bytes::from_static(b"{}"), Duration::from_millis(20))
                .await
                .unwrap();
        }
        assert_eq!(cache.len().await, 100);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn capacity_bounds_the_entry_count() {
        let cache = MemoryCache::with_capacity(10);
        for i in 0..50 {
            let key = format!("search_{i}_posts");
            cache.put(&key, Bytes::from_static(b"{}"), MINUTE).await.unwrap();
        }
        assert!(cache.len().await <= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ttl_is_clamped() {
        let cache = MemoryCache::new();
        cache.put("k", Bytes::from_static(b"v"), Duration::MAX).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        tokio::time::advance(MAX_TTL).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }
}
