//! Shared error types for serializer collaborators.

use thiserror::Error;

/// Errors surfaced by a [`crate::serializer::Serializer`] implementation.
#[derive(Debug, Error)]
pub enum SerializerError {
    /// The value could not be encoded to bytes.
    #[error("failed to encode value: {0}")]
    Encode(String),

    /// The bytes could not be decoded into the requested type.
    #[error("failed to decode value: {0}")]
    Decode(String),
}
