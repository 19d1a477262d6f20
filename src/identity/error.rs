//! Error types for identity custody.

use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors that can occur while managing the device's identity.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// No identity has been created or imported on this device yet.
    #[error("No identity on this device")]
    NoIdentity,

    /// Secure storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The file is not an identity file this build can import.
    #[error("Unrecognized identity file")]
    UnrecognizedFile,

    /// The server-side backup channel failed.
    #[error("Backup service error: {0}")]
    Backup(String),
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;

impl From<std::io::Error> for IdentityError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("corrupt stored record: {e}"))
    }
}
