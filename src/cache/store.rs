//! Typed search-parameter persistence on top of a [`CacheStore`].

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use super::{CacheError, CacheKey, CacheStore};
use crate::params::{SearchParameters, backfill_defaults, satisfies_defaults};

/// How long saved parameters live after their last write.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Reads and writes [`SearchParameters`] under a [`CacheKey`].
///
/// None of the read-modify-write operations are atomic. Two requests touching
/// the same key at once can interleave and the later write wins, dropping the
/// other's changes. Callers that need stronger guarantees must serialize
/// access themselves.
#[derive(Debug, Clone)]
pub struct ParameterStore<C> {
    cache: C,
    ttl: Duration,
}

impl<C: CacheStore> ParameterStore<C> {
    pub fn new(cache: C) -> Self {
        Self {
            cache,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Loads the saved parameters, backfilling `defaults`.
    ///
    /// On a miss, or when a default key is absent or blank in the saved
    /// value, the missing defaults are merged in and the result is written
    /// back. A hit that already covers every default is returned as is.
    pub async fn get(
        &self,
        key: &CacheKey,
        defaults: &SearchParameters,
    ) -> Result<SearchParameters, CacheError> {
        let cached = self.read(key).await?;
        let hit = cached.is_some();
        let mut params = cached.unwrap_or_default();

        if hit && satisfies_defaults(&params, defaults) {
            debug!(key = %key, "search parameters served from cache");
            return Ok(params);
        }

        backfill_defaults(&mut params, defaults);
        self.write(key, &params).await?;
        debug!(key = %key, hit, keys = params.len(), "search parameters backfilled");
        Ok(params)
    }

    /// Replaces the saved parameters.
    pub async fn put(&self, key: &CacheKey, params: &SearchParameters) -> Result<(), CacheError> {
        self.write(key, params).await?;
        debug!(key = %key, keys = params.len(), "search parameters stored");
        Ok(())
    }

    /// Merges `partial` over the saved parameters and returns the result.
    pub async fn update(
        &self,
        key: &CacheKey,
        partial: &SearchParameters,
    ) -> Result<SearchParameters, CacheError> {
        let mut params = self.read(key).await?.unwrap_or_default();
        params.merge(partial);
        self.write(key, &params).await?;
        debug!(key = %key, changed = partial.len(), "search parameters updated");
        Ok(params)
    }

    /// Sets every default whose key is absent or blank in the saved
    /// parameters, keeping supplied values, and returns the result.
    pub async fn store_defaults(
        &self,
        key: &CacheKey,
        defaults: &SearchParameters,
    ) -> Result<SearchParameters, CacheError> {
        let mut params = self.read(key).await?.unwrap_or_default();
        backfill_defaults(&mut params, defaults);
        self.write(key, &params).await?;
        debug!(key = %key, "search defaults stored");
        Ok(params)
    }

    pub async fn clear(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.cache.forget(key.as_str()).await?;
        debug!(key = %key, "search parameters cleared");
        Ok(())
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<SearchParameters>, CacheError> {
        let Some(blob) = self.cache.get(key.as_str()).await? else {
            return Ok(None);
        };

        match serde_json::from_slice(&blob) {
            Ok(params) => Ok(Some(params)),
            Err(err) => {
                warn!(key = %key, error = %err, "discarding undecodable cached search parameters");
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &CacheKey, params: &SearchParameters) -> Result<(), CacheError> {
        let blob = serde_json::to_vec(params).map_err(CacheError::Encode)?;
        self.cache.put(key.as_str(), Bytes::from(blob), self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    fn params<const N: usize>(pairs: [(&str, Value); N]) -> SearchParameters {
        pairs.into_iter().collect()
    }

    fn key() -> CacheKey {
        CacheKey::derive(None, "posts.index", "search_")
    }

    /// Counts writes so tests can tell a pure read from a backfill.
    #[derive(Default)]
    struct CountingCache {
        inner: MemoryCache,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for CountingCache {
        async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, value, ttl).await
        }

        async fn forget(&self, key: &str) -> Result<(), CacheError> {
            self.inner.forget(key).await
        }
    }

    async fn cached(store: &ParameterStore<impl CacheStore>, key: &CacheKey) -> Option<Value> {
        let blob = store.cache().get(key.as_str()).await.unwrap()?;
        Some(serde_json::from_slice(&blob).unwrap())
    }

    #[tokio::test]
    async fn miss_writes_defaults() {
        let store = ParameterStore::new(MemoryCache::new());
        let defaults = params([("pagination", json!(15))]);

        let got = store.get(&key(), &defaults).await.unwrap();
        assert_eq!(got, defaults);
        assert_eq!(cached(&store, &key()).await, Some(json!({"pagination": 15})));
    }

    #[tokio::test]
    async fn get_is_idempotent_and_hits_do_not_write() {
        let store = ParameterStore::new(CountingCache::default());
        let defaults = params([("status", json!("published")), ("pagination", json!(15))]);

        let first = store.get(&key(), &defaults).await.unwrap();
        let second = store.get(&key(), &defaults).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.cache().puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_backfills_only_unsatisfied_keys() {
        let store = ParameterStore::new(MemoryCache::new());
        store
            .put(&key(), &params([("status", json!("draft")), ("year", json!("all"))]))
            .await
            .unwrap();

        let defaults = params([("status", json!("published")), ("year", json!(2024))]);
        let got = store.get(&key(), &defaults).await.unwrap();
        assert_eq!(got.get("status"), Some(&json!("draft")));
        assert_eq!(got.get("year"), Some(&json!(2024)));
    }

    #[tokio::test]
    async fn update_merges_and_returns() {
        let store = ParameterStore::new(MemoryCache::new());
        store.put(&key(), &params([("a", json!(1)), ("b", json!(2))])).await.unwrap();

        let merged = store.update(&key(), &params([("b", json!(3)), ("c", json!(4))])).await.unwrap();
        assert_eq!(Value::from(merged), json!({"a": 1, "b": 3, "c": 4}));
        assert_eq!(cached(&store, &key()).await, Some(json!({"a": 1, "b": 3, "c": 4})));
    }

    #[tokio::test]
    async fn store_defaults_preserves_supplied_values() {
        let store = ParameterStore::new(MemoryCache::new());
        store.put(&key(), &params([("status", json!("draft")), ("q", json!(""))])).await.unwrap();

        let defaults = params([("status", json!("published")), ("q", json!("rust"))]);
        let stored = store.store_defaults(&key(), &defaults).await.unwrap();
        assert_eq!(Value::from(stored), json!({"status": "draft", "q": "rust"}));
    }

    #[tokio::test]
    async fn clear_removes_entry() {
        let store = ParameterStore::new(MemoryCache::new());
        store.put(&key(), &params([("a", json!(1))])).await.unwrap();
        store.clear(&key()).await.unwrap();
        assert_eq!(cached(&store, &key()).await, None);
        store.clear(&key()).await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_blob_is_a_miss() {
        let store = ParameterStore::new(MemoryCache::new());
        store
            .cache()
            .put(key().as_str(), Bytes::from_static(b"not json"), DEFAULT_TTL)
            .await
            .unwrap();

        let got = store.get(&key(), &params([("pagination", json!(15))])).await.unwrap();
        assert_eq!(Value::from(got), json!({"pagination": 15}));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_configured_ttl() {
        let store = ParameterStore::new(MemoryCache::new()).with_ttl(Duration::from_secs(30));
        store.put(&key(), &params([("a", json!(1))])).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cached(&store, &key()).await, None);
    }

    struct FailingCache;

    #[async_trait]
    impl CacheStore for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        async fn put(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        async fn forget(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }
    }

    #[tokio::test]
    async fn backend_failures_propagate() {
        let store = ParameterStore::new(FailingCache);
        let err = store.get(&key(), &SearchParameters::new()).await.unwrap_err();
        assert!(matches!(err, CacheError::Unavailable { .. }));
        assert!(store.clear(&key()).await.is_err());
    }

    /// Holds every reader until two reads are in flight.
    struct GatedCache {
        inner: MemoryCache,
        gate: Barrier,
    }

    #[async_trait]
    impl CacheStore for GatedCache {
        async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
            let value = self.inner.get(key).await;
            self.gate.wait().await;
            value
        }

        async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
            self.inner.put(key, value, ttl).await
        }

        async fn forget(&self, key: &str) -> Result<(), CacheError> {
            self.inner.forget(key).await
        }
    }

    #[tokio::test]
    async fn concurrent_updates_lose_a_write() {
        let store = Arc::new(ParameterStore::new(GatedCache {
            inner: MemoryCache::new(),
            gate: Barrier::new(2),
        }));

        let left = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.update(&key(), &params([("a", json!(1))])).await })
        };
        let right = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.update(&key(), &params([("b", json!(2))])).await })
        };
        left.await.unwrap().unwrap();
        right.await.unwrap().unwrap();

        let blob = store.cache().inner.get(key().as_str()).await.unwrap().unwrap();
        let saved: Value = serde_json::from_slice(&blob).unwrap();
        let saved = saved.as_object().unwrap();
        assert_eq!(saved.len(), 1, "both partials survived: {saved:?}");
        assert!(saved.contains_key("a") || saved.contains_key("b"));
    }
}
