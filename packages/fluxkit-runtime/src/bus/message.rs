//! Wire envelope and publish options for the message bus.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fluxkit_core::{Serializer, SerializerError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Options accepted by [`super::bus::MessageBus::publish`].
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Correlation id to attach. Inherited from the ambient correlation
    /// scope (see `fluxkit_core::correlation`) when empty.
    pub correlation_id: Option<String>,
    /// Delay before the message becomes eligible for delivery.
    pub delay: Option<Duration>,
    /// Absolute epoch-millis expiry. Messages published after this time are
    /// dropped silently.
    pub expires_at: Option<i64>,
    /// Free-form string properties carried alongside the payload.
    pub properties: HashMap<String, String>,
}

/// A message in flight, wrapping its raw bytes with lazy, memoized body
/// deserialization.
///
/// For a strongly-typed subscriber the bus decodes once per publish and
/// shares the result; universal subscribers receive the envelope itself
/// and decode on demand via [`Envelope::get_body`].
pub struct Envelope {
    /// Correlation id propagated with the message.
    pub correlation_id: Option<String>,
    /// Wire type name (see `fluxkit_core`-level type naming in `type_map`).
    pub type_name: String,
    /// Unique message identifier, if one was assigned.
    pub message_id: Option<Uuid>,
    /// String-to-string properties.
    pub properties: HashMap<String, String>,
    /// Absolute expiry, if any.
    pub expires_at: Option<i64>,
    /// Absolute delivery time, if any.
    pub deliver_at: Option<i64>,
    payload: Vec<u8>,
    memo: Mutex<Option<(TypeId, Arc<dyn Any + Send + Sync>)>>,
}

impl Envelope {
    /// Builds an envelope around raw, serializer-encoded `payload`.
    #[must_use]
    pub fn new(type_name: impl Into<String>, payload: Vec<u8>, options: &PublishOptions) -> Self {
        Self {
            correlation_id: options.correlation_id.clone(),
            type_name: type_name.into(),
            message_id: None,
            properties: options.properties.clone(),
            expires_at: options.expires_at,
            deliver_at: None,
            payload,
            memo: Mutex::new(None),
        }
    }

    /// Returns the deserialized body, decoding and memoizing on first access.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the payload does not match `T`.
    pub fn get_body<T>(&self, serializer: &impl Serializer) -> Result<Arc<T>, SerializerError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let wanted = TypeId::of::<T>();
        {
            let memo = self.memo.lock();
            if let Some((ty, value)) = memo.as_ref() {
                if *ty == wanted {
                    return Ok(Arc::clone(value)
                        .downcast::<T>()
                        .expect("TypeId match guarantees downcast succeeds"));
                }
            }
        }

        let decoded: T = serializer.decode(&self.payload)?;
        let arc: Arc<dyn Any + Send + Sync> = Arc::new(decoded);
        *self.memo.lock() = Some((wanted, Arc::clone(&arc)));
        Ok(arc.downcast::<T>().expect("just inserted with this TypeId"))
    }

    /// Raw, still-encoded payload bytes.
    #[must_use]
    pub fn raw_payload(&self) -> &[u8] {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxkit_core::JsonSerializer;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn get_body_decodes_and_memoizes() {
        let serializer = JsonSerializer;
        let bytes = serializer.encode(&Ping { n: 7 }).unwrap();
        let envelope = Envelope::new("Ping", bytes, &PublishOptions::default());

        let first = envelope.get_body::<Ping>(&serializer).unwrap();
        let second = envelope.get_body::<Ping>(&serializer).unwrap();
        assert_eq!(*first, Ping { n: 7 });
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn get_body_reports_decode_errors() {
        let serializer = JsonSerializer;
        let envelope = Envelope::new("Ping", b"not json".to_vec(), &PublishOptions::default());
        let result = envelope.get_body::<Ping>(&serializer);
        assert!(result.is_err());
    }
}
