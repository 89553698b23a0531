//! Serializer collaborator interface.
//!
//! Concrete high-performance serializer backends are a plug-in point
//! supplied by the host application. This crate defines the interface every
//! cache/bus consumer codes against, plus a [`JsonSerializer`] default so the
//! runtime builds and tests without an external plug-in.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SerializerError;

/// Encodes values to bytes and decodes bytes back into typed values.
///
/// Implementations are expected to be cheap to clone (or already `Arc`-like)
/// since the cache engine and message bus hold one behind an `Arc` and call
/// into it from many concurrent tasks.
pub trait Serializer: Send + Sync {
    /// Serializes `value` to its wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Encode`] if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializerError>;

    /// Deserializes `bytes` into a value of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Decode`] if the bytes are not a valid `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializerError>;
}

/// JSON-backed [`Serializer`] used as the default when no host-supplied
/// backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializerError> {
        serde_json::to_vec(value).map_err(|e| SerializerError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializerError> {
        serde_json::from_slice(bytes).map_err(|e| SerializerError::Decode(e.to_string()))
    }
}
