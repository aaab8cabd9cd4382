//! Identity key material.

pub mod keys;

pub use keys::{KeyPair, PeerId};
