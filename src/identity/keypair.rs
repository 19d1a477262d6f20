//! The account's long-lived X25519 identity key pair.
//!
//! # Security
//!
//! - Secret bytes are automatically zeroized on drop via [`ZeroizeOnDrop`]
//! - Temporary copies are wrapped in [`Zeroizing`]
//! - Debug output never includes secret material
//! - Imported key pairs are checked for public/secret consistency in constant time

use crypto_box::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::encoding;
use crate::crypto::{CryptoError, Result};

/// Length in bytes of an X25519 public or secret key.
pub const KEY_LENGTH: usize = 32;

/// The account's identity key pair.
///
/// There is exactly one logical identity per account. Copies may exist on
/// several devices after a transfer, but they are the same key pair.
///
/// # Example
///
/// ```
/// use whereish_core::identity::Identity;
///
/// let identity = Identity::generate().unwrap();
/// assert_eq!(identity.public_key_bytes().len(), 32);
/// assert_eq!(identity.public_key_hex().len(), 64);
/// ```
#[derive(Clone, ZeroizeOnDrop)]
pub struct Identity {
    /// The secret key bytes (zeroized on drop).
    secret_bytes: [u8; KEY_LENGTH],

    /// Public key bytes (not sensitive, skip zeroization).
    #[zeroize(skip)]
    public_bytes: [u8; KEY_LENGTH],
}

impl Identity {
    /// Generates a fresh identity from the operating system's CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::CryptoUnavailable`] if the secure RNG fails.
    pub fn generate() -> Result<Self> {
        let mut secret = Zeroizing::new([0u8; KEY_LENGTH]);
        OsRng.try_fill_bytes(secret.as_mut())?;
        Ok(Self::from_secret_bytes(*secret))
    }

    /// Rebuilds an identity from its secret key, deriving the public key.
    #[must_use]
    pub fn from_secret_bytes(secret_bytes: [u8; KEY_LENGTH]) -> Self {
        let secret_key = SecretKey::from(secret_bytes);
        let public_bytes = *secret_key.public_key().as_bytes();
        Self {
            secret_bytes,
            public_bytes,
        }
    }

    /// Rebuilds an identity from a stored key pair.
    ///
    /// The public key must match the one derived from the secret key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the pair is inconsistent.
    pub fn from_key_pair(
        public_bytes: [u8; KEY_LENGTH],
        mut secret_bytes: [u8; KEY_LENGTH],
    ) -> Result<Self> {
        let identity = Self::from_secret_bytes(secret_bytes);
        secret_bytes.zeroize();

        if bool::from(identity.public_bytes.ct_eq(&public_bytes)) {
            Ok(identity)
        } else {
            Err(CryptoError::InvalidKey(
                "public key does not match secret key".to_string(),
            ))
        }
    }

    /// Rebuilds an identity from base64-encoded public and secret keys.
    ///
    /// # Errors
    ///
    /// Returns an error if either key is not 32 bytes of valid base64 or the
    /// pair is inconsistent.
    pub fn from_base64(public_key: &str, secret_key: &str) -> Result<Self> {
        let public_bytes = encoding::decode_array::<KEY_LENGTH>(public_key, "publicKey")?;
        let secret_bytes = Zeroizing::new(encoding::decode_array::<KEY_LENGTH>(
            secret_key,
            "privateKey",
        )?);
        Self::from_key_pair(public_bytes, *secret_bytes)
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub const fn public_key_bytes(&self) -> [u8; KEY_LENGTH] {
        self.public_bytes
    }

    /// Returns the public key as base64, the format the directory expects.
    #[must_use]
    pub fn public_key_base64(&self) -> String {
        encoding::encode(&self.public_bytes)
    }

    /// Returns the public key as a 64-character hex string.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_bytes)
    }

    /// Returns the secret key as base64, wrapped in `Zeroizing`.
    ///
    /// Only used when writing the identity into a file payload.
    #[must_use]
    pub(crate) fn secret_key_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(encoding::encode(&self.secret_bytes))
    }

    /// Returns the secret key as a `crypto_box` key (zeroized on drop).
    #[must_use]
    pub(crate) fn secret_key(&self) -> SecretKey {
        SecretKey::from(self.secret_bytes)
    }

    /// Returns the public key as a `crypto_box` key.
    #[must_use]
    pub(crate) fn public_key(&self) -> PublicKey {
        PublicKey::from(self.public_bytes)
    }

    /// Serializes the key pair as `public || secret` for local storage.
    #[must_use]
    pub(crate) fn to_raw(&self) -> Zeroizing<Vec<u8>> {
        let mut raw = Zeroizing::new(Vec::with_capacity(KEY_LENGTH * 2));
        raw.extend_from_slice(&self.public_bytes);
        raw.extend_from_slice(&self.secret_bytes);
        raw
    }

    /// Parses the `public || secret` storage form.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is wrong or the pair is inconsistent.
    pub(crate) fn from_raw(raw: &[u8]) -> Result<Self> {
        if raw.len() != KEY_LENGTH * 2 {
            return Err(CryptoError::InvalidKey(format!(
                "stored identity must be {} bytes, got {}",
                KEY_LENGTH * 2,
                raw.len()
            )));
        }
        let mut public_bytes = [0u8; KEY_LENGTH];
        public_bytes.copy_from_slice(&raw[..KEY_LENGTH]);
        let mut secret_bytes = Zeroizing::new([0u8; KEY_LENGTH]);
        secret_bytes.copy_from_slice(&raw[KEY_LENGTH..]);
        Self::from_key_pair(public_bytes, *secret_bytes)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.public_bytes.ct_eq(&other.public_bytes))
            & bool::from(self.secret_bytes.ct_eq(&other.secret_bytes))
    }
}

impl Eq for Identity {}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret key
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Decodes a base64 public key received from the directory.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKey`] if it is not 32 bytes of valid base64.
pub fn parse_public_key(encoded: &str) -> Result<[u8; KEY_LENGTH]> {
    encoding::decode_array::<KEY_LENGTH>(encoded, "publicKey")
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}
