//! Base64 helpers shared by the wire and file formats.
//!
//! All binary fields in JSON envelopes use standard padded base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::error::{CryptoError, Result};

/// Encodes bytes as standard base64.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes standard base64.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidFormat`] if the input is not valid base64.
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(encoded)?)
}

/// Decodes standard base64 into a fixed-size array.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidFormat`] if decoding fails or the decoded
/// length is not `N`.
pub fn decode_array<const N: usize>(encoded: &str, field: &str) -> Result<[u8; N]> {
    let bytes = decode(encoded)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        CryptoError::InvalidFormat(format!(
            "{field}: expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Serde adapter for `Vec<u8>` fields stored as base64 strings.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for fixed-size arrays stored as base64 strings.
pub mod base64_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode_array::<N>(&encoded, "field").map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_array_accepts_exact_length() {
        let encoded = encode(&[7u8; 12]);
        let decoded: [u8; 12] = decode_array(&encoded, "iv").unwrap();
        assert_eq!(decoded, [7u8; 12]);
    }

    #[test]
    fn decode_array_rejects_wrong_length() {
        let encoded = encode(&[7u8; 11]);
        let err = decode_array::<12>(&encoded, "iv").unwrap_err();
        assert!(err.to_string().contains("iv: expected 12 bytes, got 11"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode("%%%"),
            Err(CryptoError::InvalidFormat(_))
        ));
    }
}
