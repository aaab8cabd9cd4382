//! Host identity secret management.
//!
//! The identity lives in `<data_dir>/host` as a raw 32-byte secret. A
//! missing or malformed file yields a freshly generated secret seeded from
//! the wall clock; the new secret is not written back and persists only
//! through the saved-nodes blob.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use weft_core::KeyPair;

use crate::error::{HostError, HostResult};

/// Name of the identity file inside the data directory.
const HOST_KEY_FILE: &str = "host";

// Identity file access is serialised process-wide.
static IDENTITY_FILE_LOCK: Mutex<()> = Mutex::new(());

/// Load the host identity from `<data_dir>/host`, generating a fresh one
/// when the file is absent or not exactly 32 bytes.
pub fn host_identity(data_dir: &Path) -> HostResult<KeyPair> {
    let _guard = IDENTITY_FILE_LOCK.lock();
    let path = data_dir.join(HOST_KEY_FILE);

    let keypair = match std::fs::read(&path) {
        Ok(bytes) if bytes.len() == 32 => {
            let mut secret = [0u8; 32];
            secret.copy_from_slice(&bytes);
            KeyPair::from_secret_bytes(&secret)
        }
        Ok(bytes) => {
            tracing::warn!(
                path = %path.display(),
                len = bytes.len(),
                "malformed host identity file, generating a fresh identity"
            );
            generate_identity()
        }
        Err(_) => {
            tracing::debug!(path = %path.display(), "no host identity file, generating");
            generate_identity()
        }
    };

    if keypair.secret_bytes() == &[0u8; 32] {
        return Err(HostError::InvalidIdentity);
    }
    Ok(keypair)
}

/// Generate an identity seeded from the wall clock and its sub-second
/// component.
fn generate_identity() -> KeyPair {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seed = now.as_secs() ^ u64::from(now.subsec_nanos()).rotate_left(32);
    KeyPair::generate_seeded(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_loads_existing_secret() {
        let dir = tempdir().unwrap();
        let secret = [0x5au8; 32];
        std::fs::write(dir.path().join(HOST_KEY_FILE), secret).unwrap();

        let a = host_identity(dir.path()).unwrap();
        let b = host_identity(dir.path()).unwrap();
        assert_eq!(a.secret_bytes(), &secret);
        assert_eq!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_missing_file_generates() {
        let dir = tempdir().unwrap();
        let keypair = host_identity(dir.path()).unwrap();
        assert_ne!(keypair.secret_bytes(), &[0u8; 32]);
        // A generated identity is not persisted
        assert!(!dir.path().join(HOST_KEY_FILE).exists());
    }

    #[test]
    fn test_wrong_size_file_generates() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(HOST_KEY_FILE), [1u8; 16]).unwrap();

        let keypair = host_identity(dir.path()).unwrap();
        assert_ne!(keypair.secret_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_zero_secret_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(HOST_KEY_FILE), [0u8; 32]).unwrap();

        let result = host_identity(dir.path());
        assert!(matches!(result, Err(HostError::InvalidIdentity)));
    }
}
