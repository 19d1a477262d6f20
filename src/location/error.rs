//! Error types for location distribution.

use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors from location publish and receive.
#[derive(Debug, Error)]
pub enum LocationError {
    /// The directory service failed or was unreachable.
    #[error("Directory error: {0}")]
    Directory(String),

    /// A cryptographic operation failed outside per-contact isolation.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Result type for location operations.
pub type Result<T> = std::result::Result<T, LocationError>;

impl LocationError {
    /// Wraps a directory transport failure.
    #[must_use]
    pub fn directory(message: impl Into<String>) -> Self {
        Self::Directory(message.into())
    }
}
