//! Error types for device-to-device identity transfer.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::identity::IdentityError;

/// Errors that can occur during an identity transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The transfer code's time to live elapsed. Start a new transfer.
    #[error("Transfer code expired")]
    Expired,

    /// The transfer was cancelled by either device. Start a new transfer.
    #[error("Transfer cancelled")]
    Cancelled,

    /// The code is malformed or matches no open transfer.
    #[error("Invalid transfer code")]
    InvalidCode,

    /// The operation is not allowed in the current state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current state name.
        state: &'static str,
    },

    /// The transfer service failed or was unreachable.
    #[error("Transfer service error: {0}")]
    Api(String),

    /// Encrypting or decrypting the identity failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Reading or installing the identity failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

impl TransferError {
    /// Wraps a transport failure.
    #[must_use]
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api(message.into())
    }

    /// Returns whether the transfer can no longer proceed under its code.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Cancelled)
    }
}
