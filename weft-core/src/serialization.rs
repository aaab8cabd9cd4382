//! Binary serialization helpers.
//!
//! All wire payloads and persisted blobs in the workspace go through these
//! two functions so the encoding stays in one place.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SerializationError;

/// Encode a value to its binary representation.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    bincode::serialize(value).map_err(|e| SerializationError::Encode(e.to_string()))
}

/// Decode a value from its binary representation.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    bincode::deserialize(bytes).map_err(|e| SerializationError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let value = (42u32, "weft".to_string(), vec![1u8, 2, 3]);
        let bytes = serialize(&value).unwrap();
        let decoded: (u32, String, Vec<u8>) = deserialize(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<(u32, String), _> = deserialize(&[0xff, 0xff]);
        assert!(matches!(result, Err(SerializationError::Decode(_))));
    }
}
