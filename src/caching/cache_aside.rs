//! # Cache-Aside
//!
//! Read-through and invalidation shared by every repository. A repository
//! owns one [`CacheAside`] bound to its backend and collection; reads go
//! through [`CacheAside::read_through`] / [`CacheAside::read_optional`] and
//! writes finish with [`CacheAside::invalidate_entity`] or
//! [`CacheAside::invalidate_collection`].

use super::{CacheClient, CacheKeyCodec};
use crate::core::error::DataResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cache-aside decorator for one collection or table
#[derive(Debug, Clone)]
pub struct CacheAside {
    client: Arc<CacheClient>,
    codec: CacheKeyCodec,
    ttl: Duration,
    enabled: bool,
}

impl CacheAside {
    /// Enabled cache-aside with `<backend>:<collection>:` keys
    pub fn new(client: Arc<CacheClient>, backend: &str, collection: &str, ttl: Duration) -> Self {
        Self::with_codec(client, CacheKeyCodec::new(backend, collection), ttl)
    }

    pub fn with_codec(client: Arc<CacheClient>, codec: CacheKeyCodec, ttl: Duration) -> Self {
        Self {
            client,
            codec,
            ttl,
            enabled: true,
        }
    }

    /// Turn caching on or off for the whole repository
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn codec(&self) -> &CacheKeyCodec {
        &self.codec
    }

    pub fn client(&self) -> &Arc<CacheClient> {
        &self.client
    }

    /// Effective cache participation for one call
    pub fn should_use(&self, per_call: Option<bool>) -> bool {
        per_call.unwrap_or(self.enabled)
    }

    pub fn key_for_id(&self, id: &str) -> String {
        self.codec.id_key(id)
    }

    pub fn operation_key<C: Serialize + ?Sized, O: Serialize + ?Sized>(
        &self,
        operation: &str,
        criteria: &C,
        options: &O,
    ) -> String {
        self.codec.operation_key(operation, criteria, options)
    }

    pub fn collection_key(&self) -> String {
        self.codec.collection_key()
    }

    /// Return the cached value under `key`, or load it and cache the result.
    ///
    /// Backend errors propagate and leave the cache untouched.
    pub async fn read_through<T, F, Fut>(&self, key: &str, use_cache: bool, load: F) -> DataResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = DataResult<T>>,
    {
        if !use_cache {
            return load().await;
        }

        if let Some(cached) = self.client.get::<T>(key).await {
            return Ok(cached);
        }

        let value = load().await?;
        self.client.set_with_ttl(key, &value, self.ttl).await;
        Ok(value)
    }

    /// Like [`read_through`](Self::read_through) for lookups that may find
    /// nothing. Absence is not cached, so a later insert is seen immediately.
    pub async fn read_optional<T, F, Fut>(
        &self,
        key: &str,
        use_cache: bool,
        load: F,
    ) -> DataResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = DataResult<Option<T>>>,
    {
        if !use_cache {
            return load().await;
        }

        if let Some(cached) = self.client.get::<T>(key).await {
            return Ok(Some(cached));
        }

        let value = load().await?;
        if let Some(found) = &value {
            self.client.set_with_ttl(key, found, self.ttl).await;
        }
        Ok(value)
    }

    /// Drop the identity entry of `id` and the collection key
    pub async fn invalidate_entity(&self, id: &str) {
        let key = self.key_for_id(id);
        self.client.delete(&key).await;
        debug!(key = %key, "Invalidated entity cache entry");
        self.invalidate_collection().await;
    }

    /// Drop the collection key only
    pub async fn invalidate_collection(&self) {
        let key = self.collection_key();
        self.client.delete(&key).await;
        debug!(key = %key, "Invalidated collection cache entry");
    }
}
