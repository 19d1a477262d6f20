//! Whereish Core Library
//!
//! Cryptographic identity and end-to-end encrypted location sharing for
//! Whereish. Contacts see the user's location only at the level of detail
//! the user granted them, and the server only ever stores ciphertext.
//!
//! - [`identity`]: the account key pair, its storage, PIN-protected backups
//! - [`crypto`]: per-contact public-key encryption and PIN-based encryption
//! - [`location`]: permission filtering, publishing and receiving
//! - [`transfer`]: moving the identity to a new device

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

mod api;
pub mod config;
pub mod crypto;
mod error;
pub mod identity;
pub mod location;
pub mod transfer;

pub use api::WhereishCore;
pub use error::{Error, Result};
