//! Registered bus interests: typed subscribers and the universal subscriber.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fluxkit_core::Serializer;
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

use super::message::Envelope;

/// A boxed, `Send` async handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Async callback invoked with a decoded message body.
pub type TypedHandler<T> = Arc<dyn Fn(Arc<T>) -> HandlerFuture + Send + Sync>;

/// Async callback invoked with the raw envelope (the universal subscriber).
pub type UniversalHandler = Arc<dyn Fn(Arc<Envelope>) -> HandlerFuture + Send + Sync>;

/// A live handle to a registered subscription.
///
/// Dropping the handle does not cancel the subscription -- call
/// [`SubscriptionHandle::cancel`] explicitly to trigger removal.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub(super) fn new(id: Uuid, cancelled: Arc<AtomicBool>) -> Self {
        Self { id, cancelled }
    }

    /// The subscriber's unique id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Fires the cancellation signal. The subscriber is removed on the next
    /// dispatch attempt (or immediately if the bus notices first).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// `true` if [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Type-erased subscriber stored in the bus's registries.
#[async_trait]
pub trait ErasedSubscriber: Send + Sync {
    /// The subscriber's unique id.
    fn id(&self) -> Uuid;

    /// `true` if the subscription has been cancelled and should be dropped.
    fn is_cancelled(&self) -> bool;

    /// Decodes (if needed) and invokes the handler with `envelope`.
    async fn dispatch(&self, envelope: Arc<Envelope>);
}

/// A subscriber filtered to a single decoded message type `T`.
pub struct TypedSubscriber<T, S> {
    id: Uuid,
    cancelled: Arc<AtomicBool>,
    handler: TypedHandler<T>,
    serializer: Arc<S>,
}

impl<T, S> TypedSubscriber<T, S> {
    pub(super) fn new(
        id: Uuid,
        cancelled: Arc<AtomicBool>,
        handler: TypedHandler<T>,
        serializer: Arc<S>,
    ) -> Self {
        Self {
            id,
            cancelled,
            handler,
            serializer,
        }
    }
}

#[async_trait]
impl<T, S> ErasedSubscriber for TypedSubscriber<T, S>
where
    T: DeserializeOwned + Send + Sync + 'static,
    S: Serializer + Send + Sync + 'static,
{
    fn id(&self) -> Uuid {
        self.id
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    async fn dispatch(&self, envelope: Arc<Envelope>) {
        match envelope.get_body::<T>(self.serializer.as_ref()) {
            Ok(body) => (self.handler)(body).await,
            Err(error) => {
                warn!(
                    %error,
                    type_name = %envelope.type_name,
                    "dropping message: body failed to decode for subscriber"
                );
            }
        }
    }
}

/// The universal subscriber: receives every message as a raw envelope.
pub struct UniversalSubscriber {
    id: Uuid,
    cancelled: Arc<AtomicBool>,
    handler: UniversalHandler,
}

impl UniversalSubscriber {
    pub(super) fn new(id: Uuid, cancelled: Arc<AtomicBool>, handler: UniversalHandler) -> Self {
        Self {
            id,
            cancelled,
            handler,
        }
    }
}

#[async_trait]
impl ErasedSubscriber for UniversalSubscriber {
    fn id(&self) -> Uuid {
        self.id
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    async fn dispatch(&self, envelope: Arc<Envelope>) {
        (self.handler)(envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::message::PublishOptions;
    use fluxkit_core::JsonSerializer;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    #[tokio::test]
    async fn typed_subscriber_decodes_and_invokes_handler() {
        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let handler: TypedHandler<u32> = Arc::new(move |body| {
            let seen = Arc::clone(&seen2);
            Box::pin(async move {
                *seen.lock().unwrap() = Some(*body);
            })
        });

        let sub = TypedSubscriber::new(
            Uuid::new_v4(),
            Arc::new(AtomicBool::new(false)),
            handler,
            Arc::new(JsonSerializer),
        );

        let payload = JsonSerializer.encode(&42_u32).unwrap();
        let envelope = Arc::new(Envelope::new("u32", payload, &PublishOptions::default()));
        sub.dispatch(envelope).await;

        assert_eq!(*seen.lock().unwrap(), Some(42));
    }

    #[tokio::test]
    async fn cancelled_subscriber_reports_cancelled() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = SubscriptionHandle::new(Uuid::new_v4(), Arc::clone(&cancelled));
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(cancelled.load(Ordering::Relaxed));
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn universal_subscriber_receives_envelope() {
        let count = Arc::new(AtomicU32::new(0));
        let count2 = Arc::clone(&count);
        let handler: UniversalHandler = Arc::new(move |_envelope| {
            let count = Arc::clone(&count2);
            Box::pin(async move {
                count.fetch_add(1, Ordering::Relaxed);
            })
        });

        let sub = UniversalSubscriber::new(Uuid::new_v4(), Arc::new(AtomicBool::new(false)), handler);
        let envelope = Arc::new(Envelope::new("anything", vec![], &PublishOptions::default()));
        sub.dispatch(envelope).await;

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
