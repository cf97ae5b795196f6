//! Caching layer: where search parameters live between requests.
//!
//! - [`CacheStore`]: the pluggable TTL backend (Redis, Memcached, …).
//! - [`MemoryCache`]: an in-process backend.
//! - [`CacheKey`]: the per-user, per-route key.
//! - [`ParameterStore`]: typed get/put/update/defaults/clear on top of a backend.
//!
//! Backends store opaque bytes; encoding parameters is the store's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod key;
pub mod memory;
pub mod store;

pub use key::CacheKey;
pub use memory::MemoryCache;
pub use store::ParameterStore;

/// Errors surfaced by cache backends and the parameter store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached or refused the operation.
    #[error("cache backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("failed to encode search parameters: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// A key/value store with per-entry expiry.
///
/// Implementations must be safe to share across tasks. No transactional
/// guarantee is expected: concurrent writers to one key race, last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Store `value` under `key`, replacing any previous entry and its TTL.
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn forget(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<T> CacheStore for Arc<T>
where
    T: CacheStore + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        (**self).put(key, value, ttl).await
    }

    async fn forget(&self, key: &str) -> Result<(), CacheError> {
        (**self).forget(key).await
    }
}
