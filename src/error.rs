//! Crate-level error type.

use thiserror::Error;

use crate::identity::IdentityError;
use crate::location::LocationError;
use crate::transfer::TransferError;

/// Any error the core can return.
#[derive(Error, Debug)]
pub enum Error {
    /// Identity custody failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Location publish or receive failed.
    #[error(transparent)]
    Location(#[from] LocationError),

    /// Device transfer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Result type for cross-component operations.
pub type Result<T> = std::result::Result<T, Error>;
