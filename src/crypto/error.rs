//! Error types for cryptographic operations.
//!
//! Authentication failures deliberately carry no detail. A caller can never
//! learn from the message whether the key, the PIN, or the data was at fault.

use thiserror::Error;

/// Errors that can occur during encryption, decryption and file decoding.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The platform's secure RNG or a required primitive is unavailable.
    #[error("Cryptography unavailable: {0}")]
    CryptoUnavailable(String),

    /// The envelope or file declares a version this build cannot read.
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u64),

    /// The envelope or file is malformed or of the wrong type.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Public-key authenticated decryption failed.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// PIN-based decryption failed.
    #[error("Incorrect PIN or corrupted data")]
    WrongPinOrCorrupted,

    /// Key material has the wrong length or encoding.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        Self::InvalidFormat(format!("base64: {e}"))
    }
}

impl From<rand::Error> for CryptoError {
    fn from(e: rand::Error) -> Self {
        Self::CryptoUnavailable(e.to_string())
    }
}
