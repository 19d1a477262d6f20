//! Identity custody: the account key pair and its device-local lifecycle.
//!
//! # Architecture
//!
//! ```text
//! SecureKeyStorage (platform) ◀── KeyStore ──▶ Identity (in memory, Arc)
//!                                    │
//!                    ┌───────────────┼────────────────┐
//!                    ▼               ▼                ▼
//!              legacy v1 file   PinBackupFile    BackupApi (server copy)
//! ```
//!
//! # Security
//!
//! - The identity never leaves the device unencrypted, except through the
//!   explicit legacy export used for migration
//! - Secret bytes are zeroized on drop
//! - A wrong PIN never installs anything

mod error;
pub mod keypair;
mod remote;
pub mod storage;
mod store;

pub use error::{IdentityError, Result};
pub use keypair::{parse_public_key, Identity};
pub use remote::{backup_error, BackupApi};
#[cfg(any(test, feature = "test-utils"))]
pub use storage::MemoryKeyStorage;
pub use storage::{FileKeyStorage, SecureKeyStorage};
pub use store::{KeyStore, PinCheckRecord};
