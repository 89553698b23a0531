//! Bounded, TTL-aware in-memory cache engine.
//!
//! Backed by a [`DashMap`] for lock-free reads and fine-grained writer
//! sharding. Cross-key operations the shard locks alone can't make safe --
//! overflow eviction, the numeric read-modify-write ops, and the expiry
//! sweep -- serialize on one extra mutex, per the concurrency model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fluxkit_core::{Clock, JsonSerializer, Serializer, SerializerError, SystemClock};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tracing::warn;

use super::entry::CacheEntry;

/// Configuration accepted by [`CacheEngine::new`].
#[derive(Debug, Clone, Copy)]
pub struct CacheEngineConfig {
    /// Soft upper bound on the number of entries. `None` disables eviction.
    pub max_items: Option<usize>,
    /// Capacity of the `ItemExpired` broadcast channel.
    pub expired_channel_capacity: usize,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            max_items: None,
            expired_channel_capacity: 256,
        }
    }
}

struct Shared<S, C> {
    entries: DashMap<String, CacheEntry>,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    max_items: Option<usize>,
    serializer: S,
    clock: C,
    expired_tx: broadcast::Sender<String>,
    wakeup: Mutex<Option<i64>>,
    notify: Notify,
    write_lock: Mutex<()>,
}

/// A bounded, TTL-aware key/value store with access-ordered eviction.
///
/// Cheap to clone: internally an `Arc` over the shared state, so handing
/// copies to the hybrid cache, the metric aggregator, and callers is free.
pub struct CacheEngine<S = JsonSerializer, C = SystemClock> {
    shared: Arc<Shared<S, C>>,
}

impl<S, C> Clone for CacheEngine<S, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, C> CacheEngine<S, C>
where
    S: Serializer + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Builds a cache engine and spawns its maintenance sweep task.
    ///
    /// Must be called from within a Tokio runtime: the sweep task is
    /// spawned immediately and lives for as long as the engine does.
    #[must_use]
    pub fn new(config: CacheEngineConfig, serializer: S, clock: C) -> Self {
        let (expired_tx, _rx) = broadcast::channel(config.expired_channel_capacity);
        let shared = Arc::new(Shared {
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            max_items: config.max_items,
            serializer,
            clock,
            expired_tx,
            wakeup: Mutex::new(None),
            notify: Notify::new(),
            write_lock: Mutex::new(()),
        });

        tokio::spawn(maintenance_loop(Arc::clone(&shared)));

        Self { shared }
    }

    /// Subscribes to the `ItemExpired` event fired by the maintenance sweep.
    #[must_use]
    pub fn subscribe_expired(&self) -> broadcast::Receiver<String> {
        self.shared.expired_tx.subscribe()
    }

    /// Total successful `get`-family lookups.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.shared.hits.load(Ordering::Relaxed)
    }

    /// Total absent/expired `get`-family lookups.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.shared.misses.load(Ordering::Relaxed)
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    /// `true` if the engine holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }

    fn now(&self) -> i64 {
        self.shared.clock.now_millis()
    }

    fn expires_at(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|d| self.now() + duration_millis(d))
    }

    fn schedule_wakeup(&self, at: i64) {
        let mut wakeup = self.shared.wakeup.lock();
        let should_notify = match *wakeup {
            None => true,
            Some(existing) => at < existing,
        };
        if should_notify {
            *wakeup = Some(at);
            drop(wakeup);
            self.shared.notify.notify_one();
        }
    }

    /// Reads `key`, returning the decoded value if present and unexpired.
    ///
    /// Expired entries encountered on read are removed silently -- no
    /// `ItemExpired` event fires for lazily-pruned reads, only for sweep
    /// removals.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the stored bytes don't match `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SerializerError> {
        let now = self.now();
        let Some(mut entry) = self.shared.entries.get_mut(key) else {
            self.shared.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        if entry.is_expired(now) {
            drop(entry);
            self.shared.entries.remove(key);
            self.shared.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        entry.touch(now);
        let value = self.shared.serializer.decode(&entry.payload)?;
        self.shared.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(value))
    }

    /// Reads several keys at once. Absent/expired keys are omitted.
    ///
    /// # Errors
    ///
    /// Returns a decode error if any stored value fails to decode as `T`.
    pub fn get_all<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, T>, SerializerError> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get::<T>(key)? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    /// Reads a raw numeric payload written by [`Self::increment`].
    ///
    /// Numeric ops store an `i64` as little-endian bytes directly, bypassing
    /// the serializer, so reading one back through [`Self::get`] would try
    /// to JSON-decode raw bytes and fail. Use this accessor (or
    /// [`Self::get_f64`]) for keys only ever touched by the numeric ops.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let now = self.now();
        let mut entry = self.shared.entries.get_mut(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.shared.entries.remove(key);
            self.shared.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        entry.touch(now);
        self.shared.hits.fetch_add(1, Ordering::Relaxed);
        Some(decode_i64(&entry.payload))
    }

    /// Reads a raw numeric payload written by [`Self::set_if_higher`] or
    /// [`Self::set_if_lower`]. See [`Self::get_i64`] for why this bypasses
    /// the serializer.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        let now = self.now();
        let mut entry = self.shared.entries.get_mut(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.shared.entries.remove(key);
            self.shared.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        entry.touch(now);
        self.shared.hits.fetch_add(1, Ordering::Relaxed);
        Some(decode_f64(&entry.payload))
    }

    /// Writes `value` under `key` iff it is absent or expired.
    ///
    /// # Errors
    ///
    /// Returns an encode error if `value` cannot be serialized.
    pub fn add<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, SerializerError> {
        let now = self.now();
        let _guard = self.shared.write_lock.lock();

        if let Some(existing) = self.shared.entries.get(key) {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }

        let payload = self.shared.serializer.encode(value)?;
        self.insert_locked(key, payload, ttl, now);
        Ok(true)
    }

    /// Unconditional upsert.
    ///
    /// # Errors
    ///
    /// Returns an encode error if `value` cannot be serialized.
    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), SerializerError> {
        let now = self.now();
        let payload = self.shared.serializer.encode(value)?;
        let _guard = self.shared.write_lock.lock();
        self.insert_locked(key, payload, ttl, now);
        Ok(())
    }

    /// Writes every `(key, value)` pair, returning the count written.
    ///
    /// # Errors
    ///
    /// Returns an encode error if any value cannot be serialized.
    pub fn set_all<T: Serialize>(
        &self,
        values: &[(String, T)],
        ttl: Option<Duration>,
    ) -> Result<usize, SerializerError> {
        for (key, value) in values {
            self.set(key, value, ttl)?;
        }
        Ok(values.len())
    }

    /// Writes `value` under `key` iff the key is currently present and
    /// unexpired; expired entries are treated as absent (see `DESIGN.md`).
    ///
    /// # Errors
    ///
    /// Returns an encode error if `value` cannot be serialized.
    pub fn replace<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, SerializerError> {
        let now = self.now();
        let _guard = self.shared.write_lock.lock();

        match self.shared.entries.get(key) {
            Some(existing) if !existing.is_expired(now) => {}
            _ => return Ok(false),
        }

        let payload = self.shared.serializer.encode(value)?;
        self.insert_locked(key, payload, ttl, now);
        Ok(true)
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.shared.entries.remove(key).is_some()
    }

    /// Removes every key in `keys`, returning the count actually removed.
    pub fn remove_all(&self, keys: &[String]) -> usize {
        keys.iter().filter(|k| self.remove(k)).count()
    }

    /// Removes every key starting with `prefix`, returning the count removed.
    pub fn remove_by_prefix(&self, prefix: &str) -> usize {
        let matching: Vec<String> = self
            .shared
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect();
        matching.iter().filter(|k| self.remove(k)).count()
    }

    /// Atomic read-modify-write on an `i64` payload.
    ///
    /// Creates the entry with value `delta` if absent. `Duration` has no
    /// negative values in this crate's API, so "a negative ttl removes the
    /// key" is expressed as `ttl == Some(Duration::ZERO)`; see `DESIGN.md`.
    pub fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> i64 {
        if ttl == Some(Duration::ZERO) {
            self.remove(key);
            return -1;
        }
        let now = self.now();
        let _guard = self.shared.write_lock.lock();

        let new_value = {
            let mut entry = self.shared.entries.entry(key.to_string()).or_insert_with(|| {
                CacheEntry::new(0_i64.to_le_bytes().to_vec(), now, None, self.next_sequence())
            });
            let current = decode_i64(&entry.payload);
            let updated = current + delta;
            entry.payload = updated.to_le_bytes().to_vec();
            entry.last_modified = now;
            entry.last_access = now;
            updated
        };

        // `increment` resets expiry to the provided ttl, so a `None` ttl
        // clears any expiry the entry previously had rather than retaining it.
        let expires_at = self.expires_at(ttl);
        self.shared.entries.get_mut(key).unwrap().expires_at = expires_at;
        if let Some(at) = expires_at {
            self.schedule_wakeup(at);
        }
        drop(_guard);

        self.maybe_evict();
        new_value
    }

    /// Sets an `f64` payload iff `value` is greater than the current value
    /// (or the key is absent/expired).
    pub fn set_if_higher(&self, key: &str, value: f64, ttl: Option<Duration>) {
        self.set_if_cmp(key, value, ttl, |current, new| new > current);
    }

    /// Sets an `f64` payload iff `value` is lower than the current value
    /// (or the key is absent/expired).
    pub fn set_if_lower(&self, key: &str, value: f64, ttl: Option<Duration>) {
        self.set_if_cmp(key, value, ttl, |current, new| new < current);
    }

    fn set_if_cmp(
        &self,
        key: &str,
        value: f64,
        ttl: Option<Duration>,
        should_replace: impl Fn(f64, f64) -> bool,
    ) {
        let now = self.now();
        let _guard = self.shared.write_lock.lock();

        let write = match self.shared.entries.get(key) {
            Some(existing) if !existing.is_expired(now) => {
                should_replace(decode_f64(&existing.payload), value)
            }
            _ => true,
        };

        if write {
            let payload = value.to_le_bytes().to_vec();
            self.insert_locked(key, payload, ttl, now);
        }
    }

    /// Remaining time to live, or `None` if the entry has no expiry or is
    /// absent.
    #[must_use]
    pub fn get_expiration(&self, key: &str) -> Option<Duration> {
        let now = self.now();
        let entry = self.shared.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        let at = entry.expires_at?;
        Some(Duration::from_millis((at - now).max(0) as u64))
    }

    /// Updates `key`'s expiry. A non-positive `ttl` removes the key.
    pub fn set_expiration(&self, key: &str, ttl: Duration) {
        if ttl.is_zero() {
            self.remove(key);
            return;
        }
        let now = self.now();
        let at = now + duration_millis(ttl);
        if let Some(mut entry) = self.shared.entries.get_mut(key) {
            entry.expires_at = Some(at);
            drop(entry);
            self.schedule_wakeup(at);
        }
    }

    fn next_sequence(&self) -> u64 {
        self.shared.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Inserts `payload` under `key`, called with `write_lock` already held.
    fn insert_locked(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>, now: i64) {
        let expires_at = self.expires_at(ttl);
        let sequence = self.next_sequence();
        self.shared
            .entries
            .insert(key.to_string(), CacheEntry::new(payload, now, expires_at, sequence));
        if let Some(at) = expires_at {
            self.schedule_wakeup(at);
        }
        self.maybe_evict();
    }

    /// Evicts the entry minimizing `(last_access, sequence)` if the store
    /// exceeds `max_items`. Synchronous, run within the write path.
    fn maybe_evict(&self) {
        let Some(max_items) = self.shared.max_items else {
            return;
        };
        if self.shared.entries.len() <= max_items {
            return;
        }

        let victim = self
            .shared
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().eviction_key()))
            .min_by_key(|(_, key)| *key)
            .map(|(k, _)| k);

        if let Some(key) = victim {
            if self.shared.entries.remove(&key).is_some() {
                warn!(key = %key, "cache engine evicted entry due to maxItems overflow");
            }
        }
    }
}

impl<S, C> std::fmt::Debug for CacheEngine<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("len", &self.shared.entries.len())
            .field("hits", &self.shared.hits.load(Ordering::Relaxed))
            .field("misses", &self.shared.misses.load(Ordering::Relaxed))
            .finish()
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn decode_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    i64::from_le_bytes(buf)
}

fn decode_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    f64::from_le_bytes(buf)
}

/// Single-timer sweep: removes every entry whose `expires_at <= now`,
/// firing `ItemExpired` for each, then reschedules to the earliest
/// remaining expiry. Races a `sleep` against `notify` so a write that
/// assigns an earlier expiry wakes the sweep immediately.
async fn maintenance_loop<S, C>(shared: Arc<Shared<S, C>>)
where
    S: Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    loop {
        let deadline = *shared.wakeup.lock();
        match deadline {
            None => shared.notify.notified().await,
            Some(at) => {
                let now = shared.clock.now_millis();
                let delay = (at - now).max(0);
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(delay as u64)) => {
                        sweep(&shared);
                    }
                    () = shared.notify.notified() => {}
                }
            }
        }
    }
}

fn sweep<S, C>(shared: &Arc<Shared<S, C>>)
where
    C: Clock,
{
    let now = shared.clock.now_millis();
    let expired: Vec<String> = shared
        .entries
        .iter()
        .filter(|e| e.value().is_expired(now))
        .map(|e| e.key().clone())
        .collect();

    for key in &expired {
        shared.entries.remove(key);
        let _ = shared.expired_tx.send(key.clone());
    }

    let next = shared
        .entries
        .iter()
        .filter_map(|e| e.value().expires_at)
        .min();
    *shared.wakeup.lock() = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxkit_core::clock::testing::FixedClock;

    fn engine_with_clock() -> (CacheEngine<JsonSerializer, FixedClock>, Arc<std::sync::atomic::AtomicI64>) {
        let (clock, handle) = FixedClock::new(0);
        let engine = CacheEngine::new(CacheEngineConfig::default(), JsonSerializer, clock);
        (engine, handle)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (engine, _time) = engine_with_clock();
        engine.set("k", &42_i32, None).unwrap();
        let value: Option<i32> = engine.get("k").unwrap();
        assert_eq!(value, Some(42));
    }

    #[tokio::test]
    async fn get_missing_key_is_a_miss() {
        let (engine, _time) = engine_with_clock();
        let value: Option<i32> = engine.get("missing").unwrap();
        assert_eq!(value, None);
        assert_eq!(engine.misses(), 1);
        assert_eq!(engine.hits(), 0);
    }

    #[tokio::test]
    async fn add_fails_when_key_present() {
        let (engine, _time) = engine_with_clock();
        assert!(engine.add("k", &1_i32, None).unwrap());
        assert!(!engine.add("k", &2_i32, None).unwrap());
        let value: Option<i32> = engine.get("k").unwrap();
        assert_eq!(value, Some(1));
    }

    #[tokio::test]
    async fn replace_only_succeeds_when_present() {
        let (engine, _time) = engine_with_clock();
        assert!(!engine.replace("k", &1_i32, None).unwrap());
        engine.set("k", &1_i32, None).unwrap();
        assert!(engine.replace("k", &2_i32, None).unwrap());
        let value: Option<i32> = engine.get("k").unwrap();
        assert_eq!(value, Some(2));
    }

    #[tokio::test]
    async fn replace_treats_expired_entry_as_absent() {
        let (engine, time) = engine_with_clock();
        engine
            .set("k", &1_i32, Some(Duration::from_millis(10)))
            .unwrap();
        time.store(100, Ordering::Relaxed);
        assert!(!engine.replace("k", &2_i32, None).unwrap());
    }

    #[tokio::test]
    async fn remove_all_counts_only_present_keys() {
        let (engine, _time) = engine_with_clock();
        engine.set("a", &1_i32, None).unwrap();
        engine.set("b", &1_i32, None).unwrap();
        let removed = engine.remove_all(&["a".to_string(), "missing".to_string(), "b".to_string()]);
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn remove_by_prefix_removes_matching_keys_only() {
        let (engine, _time) = engine_with_clock();
        engine.set("tenant:a", &1_i32, None).unwrap();
        engine.set("tenant:b", &1_i32, None).unwrap();
        engine.set("other:a", &1_i32, None).unwrap();
        let removed = engine.remove_by_prefix("tenant:");
        assert_eq!(removed, 2);
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn increment_creates_entry_with_delta_when_absent() {
        let (engine, _time) = engine_with_clock();
        let v = engine.increment("counter", 5, None);
        assert_eq!(v, 5);
        let v = engine.increment("counter", -2, None);
        assert_eq!(v, 3);
    }

    #[tokio::test]
    async fn increment_is_commutative_across_sequential_calls() {
        let (engine, _time) = engine_with_clock();
        engine.increment("x", 10, None);
        engine.increment("x", 5, None);
        engine.increment("x", -3, None);
        let v = engine.increment("x", 0, None);
        assert_eq!(v, 12);
    }

    #[tokio::test]
    async fn set_if_higher_never_decreases() {
        let (engine, _time) = engine_with_clock();
        engine.set_if_higher("g", 5.0, None);
        engine.set_if_higher("g", 3.0, None);
        let stored = decode_f64(&engine.shared.entries.get("g").unwrap().payload);
        assert_eq!(stored, 5.0);
    }

    #[tokio::test]
    async fn set_if_lower_never_increases() {
        let (engine, _time) = engine_with_clock();
        engine.set_if_lower("g", 5.0, None);
        engine.set_if_lower("g", 8.0, None);
        let stored = decode_f64(&engine.shared.entries.get("g").unwrap().payload);
        assert_eq!(stored, 5.0);
    }

    #[tokio::test]
    async fn eviction_keeps_store_within_max_items() {
        let (clock, _handle) = FixedClock::new(0);
        let engine = CacheEngine::new(
            CacheEngineConfig {
                max_items: Some(2),
                ..CacheEngineConfig::default()
            },
            JsonSerializer,
            clock,
        );

        engine.set("a", &1_i32, None).unwrap();
        engine.set("b", &2_i32, None).unwrap();
        let _: Option<i32> = engine.get("a").unwrap();
        engine.set("c", &3_i32, None).unwrap();

        assert_eq!(engine.len(), 2);
        let b: Option<i32> = engine.get("b").unwrap();
        assert_eq!(b, None);
    }

    #[tokio::test]
    async fn set_expiration_zero_removes_key() {
        let (engine, _time) = engine_with_clock();
        engine.set("k", &1_i32, None).unwrap();
        engine.set_expiration("k", Duration::ZERO);
        let v: Option<i32> = engine.get("k").unwrap();
        assert_eq!(v, None);
    }

    #[tokio::test]
    async fn expired_entry_fires_item_expired_event() {
        let (clock, time) = FixedClock::new(0);
        let engine = CacheEngine::new(CacheEngineConfig::default(), JsonSerializer, clock);
        let mut rx = engine.subscribe_expired();

        engine
            .set("k", &1_i32, Some(Duration::from_millis(50)))
            .unwrap();
        time.store(200, Ordering::Relaxed);

        // Nudge the sweep by writing again so the wakeup notification fires
        // against the already-passed deadline.
        engine.set_expiration("k", Duration::from_millis(1));

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("sweep should fire within the timeout")
            .unwrap();
        assert_eq!(received, "k");
    }

    #[tokio::test]
    async fn get_i64_reads_back_an_increment() {
        let (engine, _time) = engine_with_clock();
        engine.increment("counter", 5, None);
        engine.increment("counter", -2, None);
        assert_eq!(engine.get_i64("counter"), Some(3));
        assert_eq!(engine.get_i64("missing"), None);
    }

    #[tokio::test]
    async fn get_f64_reads_back_set_if_higher() {
        let (engine, _time) = engine_with_clock();
        engine.set_if_higher("gauge", 1.0, None);
        engine.set_if_higher("gauge", 5.0, None);
        engine.set_if_higher("gauge", 2.0, None);
        assert_eq!(engine.get_f64("gauge"), Some(5.0));
    }

    proptest::proptest! {
        #[test]
        fn increment_total_is_order_independent(deltas in proptest::collection::vec(-100i64..100, 1..20)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (engine, _time) = engine_with_clock();
                for delta in &deltas {
                    engine.increment("k", *delta, None);
                }
                let expected: i64 = deltas.iter().sum();
                assert_eq!(engine.get_i64("k"), Some(expected));
            });
        }
    }
}
