//! Error types for core primitives.

use thiserror::Error;

/// Failure while encoding or decoding a binary value.
#[derive(Debug, Clone, Error)]
pub enum SerializationError {
    /// Value could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes could not be decoded into the requested type.
    #[error("decode failed: {0}")]
    Decode(String),
}
