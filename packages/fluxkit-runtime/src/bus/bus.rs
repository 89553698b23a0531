//! Topic-based, type-routed pub/sub message bus.

use std::any::TypeId;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use fluxkit_core::{current_correlation_id, Clock, JsonSerializer, Serializer, SystemClock};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

use super::delayed::{drain_due, earliest_send_at, DelayedMessage};
use super::message::{Envelope, PublishOptions};
use super::subscriber::{
    ErasedSubscriber, SubscriptionHandle, TypedHandler, TypedSubscriber, UniversalHandler,
    UniversalSubscriber,
};
use super::type_map::TypeRegistry;

/// Driver hooks a concrete transport (Redis, RabbitMQ, ...) implements.
///
/// The in-process default, [`LocalBusBackend`], no-ops every hook: local
/// delivery happens directly in [`MessageBus::publish`] regardless of the
/// backend, so the backend's job is purely to mirror the publish out to a
/// remote transport when one is plugged in.
#[async_trait]
pub trait BusBackend: Send + Sync {
    /// Idempotently ensures the topic exists.
    async fn ensure_topic_created(&self, topic: &str) -> anyhow::Result<()>;

    /// Idempotently ensures this process has a live subscription to the topic.
    async fn ensure_topic_subscription(&self, topic: &str) -> anyhow::Result<()>;

    /// Idempotently releases this process's subscription to the topic.
    async fn remove_topic_subscription(&self, topic: &str) -> anyhow::Result<()>;

    /// Hands an encoded message to the transport.
    async fn publish_impl(
        &self,
        topic: &str,
        type_name: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> anyhow::Result<()>;
}

/// Default [`BusBackend`]: every hook is a no-op, since delivery within a
/// single process happens directly through the bus's subscriber registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBusBackend;

#[async_trait]
impl BusBackend for LocalBusBackend {
    async fn ensure_topic_created(&self, _topic: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn ensure_topic_subscription(&self, _topic: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove_topic_subscription(&self, _topic: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_impl(
        &self,
        _topic: &str,
        _type_name: &str,
        _payload: &[u8],
        _options: &PublishOptions,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A topic-based, type-routed message bus.
///
/// `B` is the driver backend (a remote transport, or [`LocalBusBackend`]).
/// Matching the cache engine's maintenance sweep, a single background task
/// owns delayed-message delivery and wakes via a `sleep`/`Notify` race.
pub struct MessageBus<S = JsonSerializer, C = SystemClock, B = LocalBusBackend> {
    topic: String,
    message_bus_id: String,
    types: TypeRegistry,
    subscribers_by_type: DashMap<TypeId, DashMap<Uuid, Arc<dyn ErasedSubscriber>>>,
    universal_subscribers: DashMap<Uuid, Arc<dyn ErasedSubscriber>>,
    delayed: Mutex<Vec<DelayedMessage>>,
    delayed_wakeup: Mutex<Option<i64>>,
    delayed_notify: Notify,
    backend: Arc<B>,
    serializer: Arc<S>,
    clock: Arc<C>,
}

impl<S, C, B> MessageBus<S, C, B>
where
    S: Serializer + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
    B: BusBackend + 'static,
{
    /// Creates a bus for `topic` and spawns its delayed-delivery scheduler.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(topic: impl Into<String>, backend: B, serializer: S, clock: C) -> Arc<Self> {
        let topic = topic.into();
        let message_bus_id = format!("{topic}-{}", Uuid::new_v4());

        let bus = Arc::new(Self {
            topic,
            message_bus_id,
            types: TypeRegistry::new(),
            subscribers_by_type: DashMap::new(),
            universal_subscribers: DashMap::new(),
            delayed: Mutex::new(Vec::new()),
            delayed_wakeup: Mutex::new(None),
            delayed_notify: Notify::new(),
            backend: Arc::new(backend),
            serializer: Arc::new(serializer),
            clock: Arc::new(clock),
        });

        tokio::spawn(Arc::clone(&bus).run_delayed_loop());
        bus
    }

    /// The bus's topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// This instance's unique bus id (`topic` plus a random suffix).
    #[must_use]
    pub fn message_bus_id(&self) -> &str {
        &self.message_bus_id
    }

    /// The wire-name <-> type resolver, exposed so callers can register
    /// overrides before publishing or subscribing.
    #[must_use]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Publishes `message`.
    ///
    /// Drops the message silently if `options.expires_at` is already in the
    /// past. Delays delivery if `options.delay` is set. Otherwise serializes
    /// and both hands off to the driver and dispatches to local subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the driver backend rejects the
    /// publish.
    pub async fn publish<T>(&self, message: &T, mut options: PublishOptions) -> anyhow::Result<()>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let now = self.clock.now_millis();
        if let Some(expires_at) = options.expires_at {
            if now > expires_at {
                return Ok(());
            }
        }

        if options.correlation_id.is_none() {
            options.correlation_id = current_correlation_id();
        }

        let type_id = TypeId::of::<T>();
        let type_name = self.types.name_from_type::<T>();
        let payload = self.serializer.encode(message)?;

        if let Some(delay) = options.delay {
            let send_at = now + duration_millis(delay);
            let mut delayed_options = options.clone();
            delayed_options.delay = None;
            self.schedule_delayed(DelayedMessage {
                type_id,
                type_name,
                payload,
                options: delayed_options,
                send_at,
            });
            return Ok(());
        }

        self.backend.ensure_topic_created(&self.topic).await?;
        self.backend
            .publish_impl(&self.topic, &type_name, &payload, &options)
            .await?;
        self.dispatch_locally(type_id, type_name, payload, &options)
            .await;
        Ok(())
    }

    /// Registers a subscriber filtered to messages resolving to type `T`.
    ///
    /// Drives `ensure_topic_subscription` on the driver backend the same way
    /// [`Self::publish`] drives `ensure_topic_created`, so a real (non-local)
    /// backend actually wires up inbound delivery the first time this process
    /// has something to receive it.
    pub async fn subscribe<T>(&self, handler: TypedHandler<T>) -> SubscriptionHandle
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let cancelled = Arc::new(AtomicBool::new(false));
        let subscriber = Arc::new(TypedSubscriber::new(
            id,
            Arc::clone(&cancelled),
            handler,
            Arc::clone(&self.serializer),
        ));
        let was_empty = self.subscriber_count() == 0;
        self.subscribers_by_type
            .entry(TypeId::of::<T>())
            .or_default()
            .insert(id, subscriber);
        if was_empty {
            self.ensure_subscribed().await;
        }
        SubscriptionHandle::new(id, cancelled)
    }

    /// Registers the universal subscriber: it receives every message as a
    /// raw [`Envelope`], deserializing lazily via [`Envelope::get_body`].
    ///
    /// See [`Self::subscribe`] for the `ensure_topic_subscription` hook.
    pub async fn subscribe_any(&self, handler: UniversalHandler) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        let cancelled = Arc::new(AtomicBool::new(false));
        let subscriber = Arc::new(UniversalSubscriber::new(id, Arc::clone(&cancelled), handler));
        let was_empty = self.subscriber_count() == 0;
        self.universal_subscribers.insert(id, subscriber);
        if was_empty {
            self.ensure_subscribed().await;
        }
        SubscriptionHandle::new(id, cancelled)
    }

    async fn ensure_subscribed(&self) {
        if let Err(error) = self.backend.ensure_topic_subscription(&self.topic).await {
            warn!(%error, topic = %self.topic, "failed to establish topic subscription");
        }
    }

    /// Total live subscriber count across typed and universal registries.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let typed: usize = self.subscribers_by_type.iter().map(|e| e.value().len()).sum();
        typed + self.universal_subscribers.len()
    }

    fn schedule_delayed(&self, message: DelayedMessage) {
        let send_at = message.send_at;
        self.delayed.lock().push(message);
        let mut wakeup = self.delayed_wakeup.lock();
        let should_notify = wakeup.map_or(true, |existing| send_at < existing);
        if should_notify {
            *wakeup = Some(send_at);
            drop(wakeup);
            self.delayed_notify.notify_one();
        }
    }

    async fn dispatch_locally(
        &self,
        type_id: TypeId,
        type_name: String,
        payload: Vec<u8>,
        options: &PublishOptions,
    ) {
        let envelope = Arc::new(Envelope::new(type_name, payload, options));
        let mut handles = Vec::new();

        if let Some(subs) = self.subscribers_by_type.get(&type_id) {
            for entry in subs.iter() {
                if entry.value().is_cancelled() {
                    continue;
                }
                let subscriber = Arc::clone(entry.value());
                let envelope = Arc::clone(&envelope);
                handles.push(tokio::spawn(async move { subscriber.dispatch(envelope).await }));
            }
        }
        if let Some(subs) = self.subscribers_by_type.get(&type_id) {
            subs.retain(|_, s| !s.is_cancelled());
        }

        for entry in self.universal_subscribers.iter() {
            if entry.value().is_cancelled() {
                continue;
            }
            let subscriber = Arc::clone(entry.value());
            let envelope = Arc::clone(&envelope);
            handles.push(tokio::spawn(async move { subscriber.dispatch(envelope).await }));
        }
        self.universal_subscribers.retain(|_, s| !s.is_cancelled());

        let typed_now_empty = self
            .subscribers_by_type
            .get(&type_id)
            .map_or(true, |s| s.is_empty());
        if typed_now_empty && self.universal_subscribers.is_empty() {
            if let Err(error) = self.backend.remove_topic_subscription(&self.topic).await {
                warn!(%error, topic = %self.topic, "failed to release topic subscription");
            }
        }

        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "bus subscriber handler task failed");
            }
        }
    }

    /// Races a `sleep` to the earliest scheduled delayed message against a
    /// `Notify`, so a newly-scheduled earlier message wakes this loop
    /// immediately instead of waiting out a stale deadline.
    async fn run_delayed_loop(self: Arc<Self>) {
        loop {
            let deadline = *self.delayed_wakeup.lock();
            match deadline {
                None => self.delayed_notify.notified().await,
                Some(at) => {
                    let now = self.clock.now_millis();
                    let delay_ms = (at - now).max(0);
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_millis(delay_ms as u64)) => {
                            self.flush_delayed().await;
                        }
                        () = self.delayed_notify.notified() => {}
                    }
                }
            }
        }
    }

    async fn flush_delayed(&self) {
        let now = self.clock.now_millis();
        let pending = std::mem::take(&mut *self.delayed.lock());
        let (due, still_pending) = drain_due(pending, now);
        *self.delayed_wakeup.lock() = earliest_send_at(&still_pending);
        *self.delayed.lock() = still_pending;

        for message in due {
            if let Err(error) = self
                .backend
                .publish_impl(&self.topic, &message.type_name, &message.payload, &message.options)
                .await
            {
                warn!(%error, type_name = %message.type_name, "delayed publish failed at the driver");
                continue;
            }
            self.dispatch_locally(message.type_id, message.type_name, message.payload, &message.options)
                .await;
        }
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxkit_core::clock::testing::FixedClock;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify as TestNotify;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    fn bus() -> Arc<MessageBus<JsonSerializer, FixedClock, LocalBusBackend>> {
        let (clock, _handle) = FixedClock::new(0);
        MessageBus::new("test-topic", LocalBusBackend, JsonSerializer, clock)
    }

    /// Counts driver-hook invocations so tests can assert the bus core
    /// actually calls `ensure_topic_subscription`/`remove_topic_subscription`
    /// rather than only defining them.
    #[derive(Default)]
    struct CountingBackend {
        ensure_subscription_calls: AtomicU32,
        remove_subscription_calls: AtomicU32,
    }

    #[async_trait]
    impl BusBackend for CountingBackend {
        async fn ensure_topic_created(&self, _topic: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn ensure_topic_subscription(&self, _topic: &str) -> anyhow::Result<()> {
            self.ensure_subscription_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn remove_topic_subscription(&self, _topic: &str) -> anyhow::Result<()> {
            self.remove_subscription_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn publish_impl(
            &self,
            _topic: &str,
            _type_name: &str,
            _payload: &[u8],
            _options: &PublishOptions,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_subscriber_establishes_topic_subscription() {
        let (clock, _handle) = FixedClock::new(0);
        let bus = MessageBus::new("counted", CountingBackend::default(), JsonSerializer, clock);

        let _sub1 = bus
            .subscribe::<Ping>(Arc::new(|_body: Arc<Ping>| Box::pin(async {})))
            .await;
        assert_eq!(bus.backend.ensure_subscription_calls.load(Ordering::Relaxed), 1);

        // A second subscriber joining an already-subscribed topic does not
        // re-establish it.
        let _sub2 = bus
            .subscribe_any(Arc::new(|_envelope| Box::pin(async {})))
            .await;
        assert_eq!(bus.backend.ensure_subscription_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn typed_subscriber_receives_published_message() {
        let bus = bus();
        let received = Arc::new(TestNotify::new());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let received2 = Arc::clone(&received);

        let _sub = bus
            .subscribe::<Ping>(Arc::new(move |body: Arc<Ping>| {
                let seen = Arc::clone(&seen2);
                let received = Arc::clone(&received2);
                Box::pin(async move {
                    *seen.lock().unwrap() = Some(body.n);
                    received.notify_one();
                })
            }))
            .await;

        bus.publish(&Ping { n: 7 }, PublishOptions::default())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), received.notified())
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[tokio::test]
    async fn cancelled_subscriber_receives_nothing_further() {
        let bus = bus();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = Arc::clone(&count);

        let handle = bus
            .subscribe::<Ping>(Arc::new(move |_body: Arc<Ping>| {
                let count = Arc::clone(&count2);
                Box::pin(async move {
                    count.fetch_add(1, Ordering::Relaxed);
                })
            }))
            .await;

        bus.publish(&Ping { n: 1 }, PublishOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        bus.publish(&Ping { n: 2 }, PublishOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn expired_message_is_dropped_silently() {
        let (clock, time) = FixedClock::new(1_000);
        let bus = MessageBus::new("t", LocalBusBackend, JsonSerializer, clock);
        time.store(2_000, Ordering::Relaxed);

        let count = Arc::new(AtomicU32::new(0));
        let count2 = Arc::clone(&count);
        let _sub = bus
            .subscribe::<Ping>(Arc::new(move |_body: Arc<Ping>| {
                let count = Arc::clone(&count2);
                Box::pin(async move {
                    count.fetch_add(1, Ordering::Relaxed);
                })
            }))
            .await;

        bus.publish(
            &Ping { n: 1 },
            PublishOptions {
                expires_at: Some(1_500),
                ..PublishOptions::default()
            },
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn universal_subscriber_sees_every_message_type() {
        let bus = bus();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = Arc::clone(&count);

        let _sub = bus
            .subscribe_any(Arc::new(move |_envelope| {
                let count = Arc::clone(&count2);
                Box::pin(async move {
                    count.fetch_add(1, Ordering::Relaxed);
                })
            }))
            .await;

        bus.publish(&Ping { n: 1 }, PublishOptions::default())
            .await
            .unwrap();
        bus.publish(&"a string message".to_string(), PublishOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn delayed_message_is_not_delivered_immediately() {
        let bus = bus();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = Arc::clone(&count);
        let _sub = bus
            .subscribe::<Ping>(Arc::new(move |_body: Arc<Ping>| {
                let count = Arc::clone(&count2);
                Box::pin(async move {
                    count.fetch_add(1, Ordering::Relaxed);
                })
            }))
            .await;

        bus.publish(
            &Ping { n: 1 },
            PublishOptions {
                delay: Some(Duration::from_millis(200)),
                ..PublishOptions::default()
            },
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::Relaxed), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
