//! Host identity keys.
//!
//! A node's network identity is an Ed25519 key pair; its [`PeerId`] is the
//! raw 32-byte public key. Only equality and hashing are meaningful on a
//! `PeerId` — there is no ordering semantics beyond map keys.

use std::fmt;

use ed25519_dalek::SigningKey;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

/// Network identity of a node: the raw public key bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// The all-zero id, used for peers whose identity is not yet known
    /// (e.g. an inbound connection before any identification).
    pub const ZERO: PeerId = PeerId([0u8; 32]);

    /// Construct from raw public key bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        PeerId(bytes)
    }

    /// The raw public key bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the unknown-identity sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for PeerId {
    /// Abridged form: first four bytes as hex, followed by an ellipsis.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…")
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

/// Ed25519 key pair backing a host's network identity.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random number generator.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret_bytes(&secret)
    }

    /// Generate a key pair from a deterministic seed.
    ///
    /// Used when bootstrapping a host identity without OS entropy; callers
    /// are expected to mix clock sources into the seed.
    pub fn generate_seeded(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);
        Self::from_secret_bytes(&secret)
    }

    /// Construct from a raw 32-byte secret.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        KeyPair {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// The raw secret bytes. Exposing these compromises the identity.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// The peer id derived from the public key.
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.signing_key.verifying_key().to_bytes())
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        KeyPair {
            signing_key: SigningKey::from_bytes(self.signing_key.as_bytes()),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uniqueness() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = KeyPair::generate_seeded(7);
        let b = KeyPair::generate_seeded(7);
        assert_eq!(a.secret_bytes(), b.secret_bytes());
        assert_eq!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_secret_roundtrip() {
        let a = KeyPair::generate();
        let b = KeyPair::from_secret_bytes(a.secret_bytes());
        assert_eq!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_peer_id_serde() {
        let id = KeyPair::generate().peer_id();
        let bytes = crate::serialization::serialize(&id).unwrap();
        let decoded: PeerId = crate::serialization::deserialize(&bytes).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_zero_sentinel() {
        assert!(PeerId::ZERO.is_zero());
        assert!(!KeyPair::generate().peer_id().is_zero());
    }

    #[test]
    fn test_display_abridged() {
        let id = PeerId::from_bytes([0xab; 32]);
        assert_eq!(format!("{id}"), "abababab…");
    }
}
