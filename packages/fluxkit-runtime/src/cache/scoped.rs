//! Scope-prefixed cache wrapper.

use std::collections::HashMap;
use std::time::Duration;

use fluxkit_core::{scope_prefix, scoped_key, Clock, JsonSerializer, SerializerError, SystemClock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::engine::CacheEngine;

/// Prefixes every key with a fixed scope before delegating to an underlying
/// [`CacheEngine`]. Bulk-flush operations stay bounded to the scope by
/// mapping onto `remove_by_prefix` instead of clearing the whole cache.
#[derive(Clone)]
pub struct ScopedCache<S = JsonSerializer, C = SystemClock> {
    scope: String,
    inner: CacheEngine<S, C>,
}

impl<S, C> ScopedCache<S, C>
where
    S: fluxkit_core::Serializer + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Wraps `inner`, prefixing every key with `scope`.
    #[must_use]
    pub fn new(scope: impl Into<String>, inner: CacheEngine<S, C>) -> Self {
        Self {
            scope: scope.into(),
            inner,
        }
    }

    fn key(&self, key: &str) -> String {
        scoped_key(&self.scope, key)
    }

    /// # Errors
    ///
    /// Returns a decode error if the stored bytes don't match `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SerializerError> {
        self.inner.get(&self.key(key))
    }

    /// # Errors
    ///
    /// Returns a decode error if any stored value fails to decode as `T`.
    pub fn get_all<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, T>, SerializerError> {
        let scoped: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let raw = self.inner.get_all::<T>(&scoped)?;
        let prefix = scope_prefix(&self.scope);
        Ok(raw
            .into_iter()
            .map(|(k, v)| (k.trim_start_matches(&prefix).to_string(), v))
            .collect())
    }

    /// # Errors
    ///
    /// Returns an encode error if `value` cannot be serialized.
    pub fn add<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, SerializerError> {
        self.inner.add(&self.key(key), value, ttl)
    }

    /// # Errors
    ///
    /// Returns an encode error if `value` cannot be serialized.
    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), SerializerError> {
        self.inner.set(&self.key(key), value, ttl)
    }

    /// # Errors
    ///
    /// Returns an encode error if `value` cannot be serialized.
    pub fn replace<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, SerializerError> {
        self.inner.replace(&self.key(key), value, ttl)
    }

    /// Removes `key` within the scope.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.remove(&self.key(key))
    }

    /// Removes every key in `keys` within the scope.
    pub fn remove_all(&self, keys: &[String]) -> usize {
        let scoped: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        self.inner.remove_all(&scoped)
    }

    /// Removes every key within the scope whose suffix starts with `prefix`.
    pub fn remove_by_prefix(&self, prefix: &str) -> usize {
        self.inner.remove_by_prefix(&self.key(prefix))
    }

    /// Flushes the entire scope -- `RemoveAll(null)` maps to a prefix removal
    /// over the whole scope rather than a global clear.
    pub fn flush_scope(&self) -> usize {
        self.inner.remove_by_prefix(&scope_prefix(&self.scope))
    }

    /// Remaining time to live for `key` within the scope.
    #[must_use]
    pub fn get_expiration(&self, key: &str) -> Option<Duration> {
        self.inner.get_expiration(&self.key(key))
    }

    /// Updates `key`'s expiry within the scope.
    pub fn set_expiration(&self, key: &str, ttl: Duration) {
        self.inner.set_expiration(&self.key(key), ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::engine::CacheEngineConfig;
    use fluxkit_core::clock::testing::FixedClock;
    use fluxkit_core::JsonSerializer;

    fn scoped() -> ScopedCache<JsonSerializer, FixedClock> {
        let (clock, _handle) = FixedClock::new(0);
        let inner = CacheEngine::new(CacheEngineConfig::default(), JsonSerializer, clock);
        ScopedCache::new("tenant-a", inner)
    }

    #[tokio::test]
    async fn keys_are_prefixed_transparently() {
        let cache = scoped();
        cache.set("users:1", &"alice", None).unwrap();
        let value: Option<String> = cache.get("users:1").unwrap();
        assert_eq!(value.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn scopes_do_not_see_each_others_keys() {
        let (clock, _handle) = FixedClock::new(0);
        let inner = CacheEngine::new(CacheEngineConfig::default(), JsonSerializer, clock);
        let a = ScopedCache::new("a", inner.clone());
        let b = ScopedCache::new("b", inner);

        a.set("k", &1_i32, None).unwrap();
        let from_b: Option<i32> = b.get("k").unwrap();
        assert_eq!(from_b, None);
    }

    #[tokio::test]
    async fn flush_scope_only_clears_own_scope() {
        let (clock, _handle) = FixedClock::new(0);
        let inner = CacheEngine::new(CacheEngineConfig::default(), JsonSerializer, clock);
        let a = ScopedCache::new("a", inner.clone());
        let b = ScopedCache::new("b", inner);

        a.set("k1", &1_i32, None).unwrap();
        a.set("k2", &2_i32, None).unwrap();
        b.set("k1", &3_i32, None).unwrap();

        let removed = a.flush_scope();
        assert_eq!(removed, 2);

        let b_value: Option<i32> = b.get("k1").unwrap();
        assert_eq!(b_value, Some(3));
    }
}
