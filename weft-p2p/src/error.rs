//! Host error types.

use std::io;

use thiserror::Error;
use weft_core::SerializationError;

/// Errors surfaced by the host.
///
/// Transient network faults are handled locally (logged, socket closed, peer
/// record updated) and never reach this type; only configuration, identity
/// and persistence-format faults propagate to callers.
#[derive(Debug, Error)]
pub enum HostError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to encode or decode a binary value.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Packet exceeds the maximum allowed size.
    #[error("packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// Framed packet did not start with the expected magic.
    #[error("invalid packet magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    /// The host identity secret is all zeroes.
    #[error("host identity secret is zero")]
    InvalidIdentity,

    /// A nodes blob could not be recognised as any known format.
    #[error("unrecognised nodes blob")]
    MalformedNodesBlob,

    /// Operation requires the network to be running.
    #[error("host is not running")]
    NotRunning,
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
