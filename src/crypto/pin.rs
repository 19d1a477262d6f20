//! PIN-protected symmetric encryption of identity backups.
//!
//! A 256-bit key is derived from the PIN with PBKDF2-HMAC-SHA256 and a fresh
//! 16-byte salt, then the payload is sealed with AES-256-GCM under a fresh
//! 12-byte IV. Because every encryption draws a new salt, every encryption
//! also uses a new key.
//!
//! # Iteration count
//!
//! New files always use [`PBKDF2_ITERATIONS`]. Decryption always uses the
//! count stored in the file, up to [`MAX_PBKDF2_ITERATIONS`].
//!
//! # Threading
//!
//! Key derivation is slow on purpose. The `*_async` variants run it on the
//! blocking pool so an async caller's executor is never stalled.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::encoding::base64_bytes;
use super::error::{CryptoError, Result};
use super::format::{
    AccountMeta, BackupAccount, CipherParams, IdentityPayload, KdfParams, KeyPairFields,
    PinBackupFile, CIPHER_ALGORITHM, ENCRYPTED_FILE_TYPE, ENCRYPTED_FILE_VERSION, KDF_ALGORITHM,
};
use crate::identity::Identity;

/// PBKDF2 iteration count for newly written files and test vectors.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Highest iteration count accepted from a file or test vector.
///
/// Counts are read from data the server relays, and key derivation cannot
/// be interrupted once started.
pub const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;

/// Salt length in bytes.
pub const SALT_LENGTH: usize = 16;

/// AES-GCM IV length in bytes.
pub const IV_LENGTH: usize = 12;

/// Derived key length in bytes (AES-256).
pub const DERIVED_KEY_LENGTH: usize = 32;

/// Known plaintext sealed into PIN test vectors.
const TEST_VECTOR_PLAINTEXT: &[u8] = b"whereish-pin-check-v1";

/// Small encrypted known-plaintext used to check PIN recall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinTestVector {
    /// KDF salt.
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    /// AES-GCM IV.
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Ciphertext of the known plaintext.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Iteration count used to derive the key.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

const fn default_iterations() -> u32 {
    PBKDF2_ITERATIONS
}

/// An identity recovered from a [`PinBackupFile`].
#[derive(Debug)]
pub struct RecoveredIdentity {
    /// The key pair.
    pub identity: Identity,
    /// Account email from the clear section of the file.
    pub email: String,
    /// Holder's display name from inside the ciphertext.
    pub name: String,
    /// When the backup was made.
    pub created: chrono::DateTime<Utc>,
}

/// PIN-based cipher for identity backups and test vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinCipher {
    iterations: u32,
}

impl Default for PinCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl PinCipher {
    /// Creates a cipher that writes files with [`PBKDF2_ITERATIONS`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }

    /// Creates a cipher using the configured iteration count for new files.
    ///
    /// The configuration can only raise the count above [`PBKDF2_ITERATIONS`].
    #[must_use]
    pub fn from_config(config: &crate::config::CoreConfig) -> Self {
        Self {
            iterations: config.kdf_iterations(),
        }
    }

    /// Creates a cipher with a custom iteration count for new files.
    ///
    /// Only available for tests, to keep suites fast. Production code must
    /// use [`PinCipher::new`].
    #[cfg(any(test, feature = "test-utils"))]
    #[must_use]
    pub const fn with_iterations(iterations: u32) -> Self {
        Self { iterations }
    }

    /// Returns the iteration count used for new files.
    #[must_use]
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Derives a 256-bit key from a PIN.
    ///
    /// Deterministic in `(pin, salt, iterations)`.
    #[must_use]
    pub fn derive_key(
        pin: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Zeroizing<[u8; DERIVED_KEY_LENGTH]> {
        let mut key = Zeroizing::new([0u8; DERIVED_KEY_LENGTH]);
        pbkdf2::pbkdf2_hmac::<Sha256>(pin.as_bytes(), salt, iterations, key.as_mut());
        key
    }

    /// Encrypts an identity under a PIN into a version 2 backup file.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::CryptoUnavailable`] if the secure RNG fails.
    pub fn encrypt_identity(
        &self,
        identity: &Identity,
        account: &AccountMeta,
        pin: &str,
    ) -> Result<PinBackupFile> {
        let payload = IdentityPayload {
            identity: KeyPairFields {
                public_key: identity.public_key_base64(),
                private_key: identity.secret_key_base64().to_string(),
            },
            name: account.name.clone(),
            created: Utc::now(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);
        let sealed = self.seal(pin, &plaintext)?;

        Ok(PinBackupFile {
            version: ENCRYPTED_FILE_VERSION,
            file_type: ENCRYPTED_FILE_TYPE.to_string(),
            kdf: KdfParams {
                algorithm: KDF_ALGORITHM.to_string(),
                iterations: self.iterations,
                salt: sealed.salt,
            },
            cipher: CipherParams {
                algorithm: CIPHER_ALGORITHM.to_string(),
                iv: sealed.iv,
            },
            payload: sealed.ciphertext,
            account: BackupAccount {
                email: account.email.clone(),
            },
        })
    }

    /// Decrypts a version 2 backup file with a PIN.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidFormat`] if the file fails strict validation or
    ///   the decrypted payload is not a valid identity
    /// - [`CryptoError::WrongPinOrCorrupted`] on authentication failure
    pub fn decrypt_identity(file: &PinBackupFile, pin: &str) -> Result<RecoveredIdentity> {
        file.validate()?;

        let plaintext = open(
            pin,
            &file.kdf.salt,
            file.kdf.iterations,
            &file.cipher.iv,
            &file.payload,
        )?;

        let payload: IdentityPayload = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::InvalidFormat(format!("backup payload: {e}")))?;
        let identity =
            Identity::from_base64(&payload.identity.public_key, &payload.identity.private_key)?;

        Ok(RecoveredIdentity {
            identity,
            email: file.account.email.clone(),
            name: payload.name.clone(),
            created: payload.created,
        })
    }

    /// Encrypts the fixed known plaintext under a PIN.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::CryptoUnavailable`] if the secure RNG fails.
    pub fn encrypt_test_value(&self, pin: &str) -> Result<PinTestVector> {
        let sealed = self.seal(pin, TEST_VECTOR_PLAINTEXT)?;
        Ok(PinTestVector {
            salt: sealed.salt,
            iv: sealed.iv,
            ciphertext: sealed.ciphertext,
            iterations: self.iterations,
        })
    }

    /// Returns whether `pin` opens the test vector.
    ///
    /// Never fails: every error, including malformed vectors, is `false`.
    #[must_use]
    pub fn verify_pin(vector: &PinTestVector, pin: &str) -> bool {
        let outcome: Result<bool> = check_test_vector(vector, pin);
        outcome.unwrap_or(false)
    }

    /// [`Self::encrypt_identity`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::encrypt_identity`].
    pub async fn encrypt_identity_async(
        self,
        identity: Identity,
        account: AccountMeta,
        pin: Zeroizing<String>,
    ) -> Result<PinBackupFile> {
        run_blocking(move || self.encrypt_identity(&identity, &account, &pin)).await
    }

    /// [`Self::decrypt_identity`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::decrypt_identity`].
    pub async fn decrypt_identity_async(
        file: PinBackupFile,
        pin: Zeroizing<String>,
    ) -> Result<RecoveredIdentity> {
        run_blocking(move || Self::decrypt_identity(&file, &pin)).await
    }

    /// [`Self::encrypt_test_value`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::encrypt_test_value`].
    pub async fn encrypt_test_value_async(self, pin: Zeroizing<String>) -> Result<PinTestVector> {
        run_blocking(move || self.encrypt_test_value(&pin)).await
    }

    /// [`Self::verify_pin`] on the blocking pool.
    pub async fn verify_pin_async(vector: PinTestVector, pin: Zeroizing<String>) -> bool {
        run_blocking(move || Ok(Self::verify_pin(&vector, &pin)))
            .await
            .unwrap_or(false)
    }

    fn seal(&self, pin: &str, plaintext: &[u8]) -> Result<Sealed> {
        let mut salt = vec![0u8; SALT_LENGTH];
        let mut iv = vec![0u8; IV_LENGTH];
        OsRng.try_fill_bytes(&mut salt)?;
        OsRng.try_fill_bytes(&mut iv)?;

        let key = Self::derive_key(pin, &salt, self.iterations);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| CryptoError::CryptoUnavailable(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(GenericArray::from_slice(&iv), plaintext)
            .map_err(|_| CryptoError::CryptoUnavailable("AES-GCM encryption failed".to_string()))?;

        Ok(Sealed {
            salt,
            iv,
            ciphertext,
        })
    }
}

struct Sealed {
    salt: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
}

fn open(
    pin: &str,
    salt: &[u8],
    iterations: u32,
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if iv.len() != IV_LENGTH {
        return Err(CryptoError::InvalidFormat(format!(
            "IV must be {IV_LENGTH} bytes, got {}",
            iv.len()
        )));
    }
    if iterations == 0 || iterations > MAX_PBKDF2_ITERATIONS {
        return Err(CryptoError::InvalidFormat(format!(
            "iteration count must be between 1 and {MAX_PBKDF2_ITERATIONS}"
        )));
    }

    let key = PinCipher::derive_key(pin, salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| CryptoError::CryptoUnavailable(e.to_string()))?;

    cipher
        .decrypt(GenericArray::from_slice(iv), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::WrongPinOrCorrupted)
}

fn check_test_vector(vector: &PinTestVector, pin: &str) -> Result<bool> {
    let plaintext = open(
        pin,
        &vector.salt,
        vector.iterations,
        &vector.iv,
        &vector.ciphertext,
    )?;
    Ok(bool::from(plaintext.as_slice().ct_eq(TEST_VECTOR_PLAINTEXT)))
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CryptoError::CryptoUnavailable(format!("background task failed: {e}")))?
}
