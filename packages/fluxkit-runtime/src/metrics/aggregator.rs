//! Buffered submission, periodic flush, and the wait-for-counter primitive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fluxkit_core::Clock;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::CacheEngine;

use super::key::{bucket_key, minute_bucket, MetricKind};

const DEFAULT_COUNTER_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// A single buffered submission, carrying the timestamp it was enqueued at
/// so the flush can draw its "enqueued before flush start" cut.
#[derive(Debug, Clone)]
struct MetricEntry {
    kind: MetricKind,
    name: String,
    bucket: i64,
    value: f64,
    enqueued_at: i64,
}

/// Configuration accepted by [`MetricAggregator::new`].
#[derive(Debug, Clone)]
pub struct MetricAggregatorConfig {
    /// Prepended to every bucket key this aggregator writes.
    pub key_prefix: String,
    /// TTL applied to counter bucket keys. Gauge/timing buckets share it.
    pub bucket_ttl: Duration,
}

impl Default for MetricAggregatorConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            bucket_ttl: DEFAULT_COUNTER_TTL,
        }
    }
}

/// Buffers `Counter`/`Gauge`/`Timer` submissions and periodically folds them
/// into per-minute bucket keys on a [`CacheEngine`].
///
/// The pending queue is a `tokio::sync::mpsc::unbounded_channel`, the
/// idiomatic tokio-ecosystem stand-in for a concurrent FIFO with an enqueue
/// timestamp. A single-flight flag on the flush path means overlapping
/// timer fires are suppressed rather than queued.
pub struct MetricAggregator<S, C> {
    cache: CacheEngine<S, C>,
    clock: Arc<C>,
    sender: mpsc::UnboundedSender<MetricEntry>,
    receiver: SyncMutex<mpsc::UnboundedReceiver<MetricEntry>>,
    flushing: AtomicBool,
    config: MetricAggregatorConfig,
    counter_events: DashMap<String, Arc<Notify>>,
}

impl<S, C> MetricAggregator<S, C>
where
    S: fluxkit_core::Serializer + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Builds an aggregator. Does not itself spawn the flush loop -- call
    /// [`Self::spawn_flush_loop`] once a `tokio` runtime is available.
    #[must_use]
    pub fn new(cache: CacheEngine<S, C>, clock: Arc<C>, config: MetricAggregatorConfig) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            cache,
            clock,
            sender,
            receiver: SyncMutex::new(receiver),
            flushing: AtomicBool::new(false),
            config,
            counter_events: DashMap::new(),
        })
    }

    /// Spawns the 1-second periodic flush task. Returns a handle the caller
    /// can use to stop it; dropping the handle does not stop the task.
    pub fn spawn_flush_loop(self: &Arc<Self>, cancellation: CancellationToken) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => this.flush(),
                    () = cancellation.cancelled() => break,
                }
            }
        })
    }

    /// Buffers a counter delta under `name`.
    pub fn counter(&self, name: &str, delta: f64) {
        self.submit(MetricKind::Counter, name, delta);
    }

    /// Buffers a gauge observation under `name`.
    pub fn gauge(&self, name: &str, value: f64) {
        self.submit(MetricKind::Gauge, name, value);
    }

    /// Buffers a timing observation (milliseconds) under `name`.
    pub fn timer(&self, name: &str, millis: f64) {
        self.submit(MetricKind::Timing, name, millis);
    }

    fn submit(&self, kind: MetricKind, name: &str, value: f64) {
        let now = self.clock.now_millis();
        let _ = self.sender.send(MetricEntry {
            kind,
            name: name.to_string(),
            bucket: minute_bucket(now),
            value,
            enqueued_at: now,
        });
    }

    /// Drains everything currently buffered and folds it into bucket keys.
    ///
    /// Guarded by a single-flight flag: a flush already in progress makes
    /// this a no-op rather than queuing a second pass. Entries submitted
    /// concurrently with a drain simply aren't in the channel buffer yet,
    /// which is what gives the "enqueued before flush start" cut in practice
    /// without needing to track it explicitly.
    pub fn flush(&self) {
        if self.flushing.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut drained = Vec::new();
        {
            let mut receiver = self.receiver.lock();
            while let Ok(entry) = receiver.try_recv() {
                drained.push(entry);
            }
        }

        self.apply(drained);
        self.flushing.store(false, Ordering::Release);
    }

    fn apply(&self, drained: Vec<MetricEntry>) {
        let mut counters: HashMap<(String, i64), f64> = HashMap::new();
        let mut gauges: HashMap<(String, i64), (f64, f64)> = HashMap::new(); // (max, last)
        let mut timings: HashMap<(String, i64), (u64, f64, f64, f64)> = HashMap::new(); // (cnt, tot, min, max)

        for entry in drained {
            let group = (entry.name.clone(), entry.bucket);
            match entry.kind {
                MetricKind::Counter => {
                    *counters.entry(group).or_insert(0.0) += entry.value;
                }
                MetricKind::Gauge => {
                    let slot = gauges.entry(group).or_insert((entry.value, entry.value));
                    slot.0 = slot.0.max(entry.value);
                    slot.1 = entry.value;
                }
                MetricKind::Timing => {
                    let slot = timings
                        .entry(group)
                        .or_insert((0, 0.0, f64::INFINITY, f64::NEG_INFINITY));
                    slot.0 += 1;
                    slot.1 += entry.value;
                    slot.2 = slot.2.min(entry.value);
                    slot.3 = slot.3.max(entry.value);
                }
            }
        }

        let prefix = &self.config.key_prefix;
        let ttl = Some(self.config.bucket_ttl);

        for ((name, bucket), delta) in counters {
            let key = bucket_key(prefix, MetricKind::Counter, &name, bucket, None);
            self.cache.increment(&key, delta as i64, ttl);
            self.notify_counter(&name);
        }

        for ((name, bucket), (max, last)) in gauges {
            let last_key = bucket_key(prefix, MetricKind::Gauge, &name, bucket, Some("last"));
            let max_key = bucket_key(prefix, MetricKind::Gauge, &name, bucket, Some("max"));
            if let Err(error) = self.cache.set(&last_key, &last, ttl) {
                warn!(%error, key = %last_key, "gauge flush failed to write :last");
            }
            self.cache.set_if_higher(&max_key, max, ttl);
        }

        for ((name, bucket), (cnt, tot, min, max)) in timings {
            let cnt_key = bucket_key(prefix, MetricKind::Timing, &name, bucket, Some("cnt"));
            let tot_key = bucket_key(prefix, MetricKind::Timing, &name, bucket, Some("tot"));
            let min_key = bucket_key(prefix, MetricKind::Timing, &name, bucket, Some("min"));
            let max_key = bucket_key(prefix, MetricKind::Timing, &name, bucket, Some("max"));
            self.cache.increment(&cnt_key, cnt as i64, ttl);
            self.cache.increment(&tot_key, tot as i64, ttl);
            self.cache.set_if_lower(&min_key, min, ttl);
            self.cache.set_if_higher(&max_key, max, ttl);
        }
    }

    fn notify_counter(&self, name: &str) {
        if let Some(notify) = self.counter_events.get(name) {
            notify.notify_waiters();
        }
    }

    fn counter_event(&self, name: &str) -> Arc<Notify> {
        Arc::clone(
            &self
                .counter_events
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    /// Blocks until counter `name` has increased by at least `count` since
    /// the moment this call started, or `timeout`/`cancellation` fires.
    ///
    /// Reads go through `get_counter_sum`, supplied by the reader so the
    /// aggregator itself stays decoupled from the reconstruction logic.
    pub async fn wait_for_counter(
        &self,
        get_counter_sum: impl Fn(&str, i64, i64) -> i64,
        name: &str,
        count: i64,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> bool {
        let t0 = self.clock.now_millis();
        let baseline = get_counter_sum(name, t0, t0);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let now = self.clock.now_millis();
            let current = get_counter_sum(name, t0, now);
            if current - baseline >= count {
                return true;
            }

            let notify = self.counter_event(name);
            tokio::select! {
                () = notify.notified() => {}
                () = cancellation.cancelled() => return false,
                () = tokio::time::sleep_until(deadline) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxkit_core::clock::testing::FixedClock;
    use fluxkit_core::JsonSerializer;

    use crate::cache::CacheEngineConfig;
    use crate::metrics::key::{bucket_key, MetricKind};

    fn aggregator() -> (
        Arc<MetricAggregator<JsonSerializer, FixedClock>>,
        CacheEngine<JsonSerializer, FixedClock>,
        Arc<std::sync::atomic::AtomicI64>,
    ) {
        let (clock, handle) = FixedClock::new(super::super::key::EPOCH_2015_MILLIS);
        let cache = CacheEngine::new(CacheEngineConfig::default(), JsonSerializer, clock.clone());
        let aggregator = MetricAggregator::new(cache.clone(), Arc::new(clock), MetricAggregatorConfig::default());
        (aggregator, cache, handle)
    }

    #[tokio::test]
    async fn flush_accumulates_counter_delta() {
        let (aggregator, cache, _time) = aggregator();
        aggregator.counter("requests", 1.0);
        aggregator.counter("requests", 2.0);
        aggregator.flush();

        let key = bucket_key("", MetricKind::Counter, "requests", 0, None);
        assert_eq!(cache.get_i64(&key), Some(3));
    }

    #[tokio::test]
    async fn flush_tracks_gauge_max_and_last() {
        let (aggregator, cache, _time) = aggregator();
        aggregator.gauge("queue_depth", 5.0);
        aggregator.gauge("queue_depth", 9.0);
        aggregator.gauge("queue_depth", 3.0);
        aggregator.flush();

        let max_key = bucket_key("", MetricKind::Gauge, "queue_depth", 0, Some("max"));
        let last_key = bucket_key("", MetricKind::Gauge, "queue_depth", 0, Some("last"));
        assert_eq!(cache.get::<f64>(&max_key).unwrap(), Some(9.0));
        assert_eq!(cache.get::<f64>(&last_key).unwrap(), Some(3.0));
    }

    #[tokio::test]
    async fn flush_tracks_timer_distribution() {
        let (aggregator, cache, _time) = aggregator();
        aggregator.timer("latency", 10.0);
        aggregator.timer("latency", 30.0);
        aggregator.timer("latency", 20.0);
        aggregator.flush();

        let cnt_key = bucket_key("", MetricKind::Timing, "latency", 0, Some("cnt"));
        let tot_key = bucket_key("", MetricKind::Timing, "latency", 0, Some("tot"));
        let min_key = bucket_key("", MetricKind::Timing, "latency", 0, Some("min"));
        let max_key = bucket_key("", MetricKind::Timing, "latency", 0, Some("max"));

        assert_eq!(cache.get_i64(&cnt_key), Some(3));
        assert_eq!(cache.get_i64(&tot_key), Some(60));
        assert_eq!(cache.get_f64(&min_key), Some(10.0));
        assert_eq!(cache.get_f64(&max_key), Some(30.0));
    }

    #[tokio::test]
    async fn concurrent_flush_is_single_flight() {
        let (aggregator, _cache, _time) = aggregator();
        aggregator.counter("x", 1.0);
        // A flush already marked in-flight is a no-op; simulate by setting
        // the flag directly rather than racing two real tasks.
        aggregator.flushing.store(true, Ordering::Release);
        aggregator.flush();
        aggregator.flushing.store(false, Ordering::Release);

        // The entry is still pending since the guarded flush above skipped.
        aggregator.flush();
        let key = bucket_key("", MetricKind::Counter, "x", 0, None);
        assert_eq!(_cache.get_i64(&key), Some(1));
    }

    #[tokio::test]
    async fn wait_for_counter_succeeds_once_target_reached() {
        let (aggregator, cache, _time) = aggregator();
        aggregator.counter("hits", 1.0);
        aggregator.counter("hits", 1.0);
        aggregator.counter("hits", 1.0);
        aggregator.flush();

        let key = bucket_key("", MetricKind::Counter, "hits", 0, None);
        let sum_reader = |_name: &str, _start: i64, _end: i64| cache.get_i64(&key).unwrap_or(0);

        let cancellation = CancellationToken::new();
        let reached = aggregator
            .wait_for_counter(sum_reader, "hits", 3, Duration::from_secs(1), &cancellation)
            .await;
        assert!(reached);
    }

    #[tokio::test]
    async fn wait_for_counter_times_out_when_target_unreached() {
        let (aggregator, _cache, _time) = aggregator();
        let cancellation = CancellationToken::new();
        let reached = aggregator
            .wait_for_counter(|_, _, _| 0, "never", 1, Duration::from_millis(20), &cancellation)
            .await;
        assert!(!reached);
    }
}
