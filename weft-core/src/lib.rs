//! Core primitives shared across the weft workspace.
//!
//! This crate carries the pieces every other weft crate needs but that do not
//! belong to any single layer: the host identity key material ([`KeyPair`],
//! [`PeerId`]) and the binary [`serialization`] seam used for wire payloads
//! and persisted blobs.

pub mod crypto;
pub mod error;
pub mod serialization;

pub use crypto::{KeyPair, PeerId};
pub use error::SerializationError;
