//! Device-to-device identity transfer.
//!
//! The existing device (source) opens a transfer and shows a six-digit code.
//! The new device (target) claims it with that code. The source then
//! encrypts the identity under the user's PIN and attaches it; the target
//! downloads it and decrypts it with the same PIN.
//!
//! # Security
//!
//! - The code is a routing token only, never key material
//! - The identity is only ever in transit as a [`PinBackupFile`](crate::crypto::PinBackupFile)
//! - A wrong PIN on the target installs nothing and can be retried
//! - Expired and cancelled transfers are terminal; start a new one
//!
//! # Polling
//!
//! Each coordinator owns at most one [`PollHandle`]. Starting a new poll
//! replaces (and aborts) the old one; terminal states, [`SourceTransfer::cancel`]
//! and `dismiss()` stop it immediately.

mod api;
mod error;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
pub mod poll;
pub mod source;
pub mod target;
pub mod types;

pub use api::TransferApi;
pub use error::{Result, TransferError};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryTransferBroker;
pub use poll::PollHandle;
pub use source::{SourceState, SourceTransfer};
pub use target::{TargetState, TargetTransfer};
pub use types::{
    validate_code, ClaimResponse, CreatedTransfer, ReceiveResponse, TargetDevice,
    TransferStatus, TransferStatusResponse, CODE_LENGTH,
};
