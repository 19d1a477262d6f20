//! Cryptographic primitives for identity custody and location sharing.
//!
//! # Architecture
//!
//! ```text
//! LocationPayload ──encrypt_for──▶ EncryptedBlob (NaCl box, one per contact)
//!
//! Identity + PIN ──PinCipher──▶ PinBackupFile (PBKDF2-SHA256 → AES-256-GCM)
//!
//! PIN ──encrypt_test_value──▶ PinTestVector (recall check, no identity)
//! ```
//!
//! # Security
//!
//! - Nonces and IVs are drawn fresh from the OS CSPRNG for every encryption
//! - Authentication failures never return partial plaintext
//! - Error messages never reveal whether the key, PIN or data was wrong
//! - Decrypted plaintext and derived keys are zeroized on drop

pub(crate) mod encoding;
mod error;

pub mod asymmetric;
pub mod format;
pub mod pin;

pub use asymmetric::{
    decrypt_from, decrypt_from_self, encrypt_for, encrypt_to_self, EncryptedBlob, BLOB_VERSION,
};
pub use error::{CryptoError, Result};
pub use format::{detect_format, AccountMeta, BackupFormat, LegacyIdentityFile, PinBackupFile};
pub use pin::{
    PinCipher, PinTestVector, RecoveredIdentity, MAX_PBKDF2_ITERATIONS, PBKDF2_ITERATIONS,
};
