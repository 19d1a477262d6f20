//! Authenticated public-key encryption of JSON payloads.
//!
//! Uses X25519 key agreement + XSalsa20-Poly1305 (NaCl `box`). Each payload
//! is encrypted for exactly one recipient with the sender's identity key, so
//! the recipient can also authenticate the sender.
//!
//! # Nonces
//!
//! [`BoxNonce`] can only be constructed by drawing from the OS CSPRNG, and
//! [`encrypt_for`] is the only path to ciphertext. A caller therefore cannot
//! supply, store, or reuse a nonce for encryption.

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::encoding::{base64_array, base64_bytes};
use super::error::{CryptoError, Result};
use crate::identity::keypair::KEY_LENGTH;
use crate::identity::Identity;

/// The only envelope version this build produces and accepts.
pub const BLOB_VERSION: u64 = 1;

/// Length in bytes of a NaCl box nonce.
pub const NONCE_LENGTH: usize = 24;

/// A single-use random nonce.
struct BoxNonce([u8; NONCE_LENGTH]);

impl BoxNonce {
    fn random() -> Result<Self> {
        let mut bytes = [0u8; NONCE_LENGTH];
        OsRng.try_fill_bytes(&mut bytes)?;
        Ok(Self(bytes))
    }
}

/// Ciphertext of one payload for one recipient.
///
/// Serialized as `{"version":1,"nonce":"<b64>","ciphertext":"<b64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Envelope format version.
    pub version: u64,

    /// The 24-byte nonce used for this ciphertext.
    #[serde(with = "base64_array")]
    pub nonce: [u8; NONCE_LENGTH],

    /// XSalsa20-Poly1305 ciphertext including the 16-byte tag.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Serializes the blob to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a blob from its JSON wire form.
    ///
    /// Only the shape is checked here. The version is checked on decryption.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidFormat`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CryptoError::InvalidFormat(e.to_string()))
    }
}

/// Encrypts `payload` for `recipient_public_key`, authenticated by `sender`.
///
/// The payload is serialized to canonical JSON bytes before encryption and a
/// fresh random nonce is drawn on every call.
///
/// # Errors
///
/// Returns [`CryptoError::CryptoUnavailable`] if no nonce can be drawn, or a
/// serialization error if the payload cannot be encoded.
pub fn encrypt_for<T: Serialize>(
    payload: &T,
    recipient_public_key: &[u8; KEY_LENGTH],
    sender: &Identity,
) -> Result<EncryptedBlob> {
    let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);
    seal(&plaintext, &PublicKey::from(*recipient_public_key), sender)
}

/// Decrypts a blob from `sender_public_key` addressed to `recipient`.
///
/// # Errors
///
/// - [`CryptoError::UnsupportedVersion`] if `blob.version` is not 1
/// - [`CryptoError::DecryptionFailed`] on any authentication failure
/// - [`CryptoError::InvalidFormat`] if the authenticated plaintext is not the
///   expected JSON shape
pub fn decrypt_from<T: DeserializeOwned>(
    blob: &EncryptedBlob,
    sender_public_key: &[u8; KEY_LENGTH],
    recipient: &Identity,
) -> Result<T> {
    let plaintext = open(blob, &PublicKey::from(*sender_public_key), recipient)?;
    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::InvalidFormat(e.to_string()))
}

/// Encrypts opaque bytes to the identity itself.
///
/// Used for user data the server stores on the account's behalf but must not
/// read.
///
/// # Errors
///
/// Returns [`CryptoError::CryptoUnavailable`] if no nonce can be drawn.
pub fn encrypt_to_self(data: &[u8], identity: &Identity) -> Result<EncryptedBlob> {
    seal(data, &identity.public_key(), identity)
}

/// Decrypts bytes previously encrypted with [`encrypt_to_self`].
///
/// # Errors
///
/// Same as [`decrypt_from`], without the JSON step.
pub fn decrypt_from_self(blob: &EncryptedBlob, identity: &Identity) -> Result<Zeroizing<Vec<u8>>> {
    open(blob, &identity.public_key(), identity)
}

fn seal(plaintext: &[u8], recipient: &PublicKey, sender: &Identity) -> Result<EncryptedBlob> {
    let nonce = BoxNonce::random()?;
    let salsa_box = SalsaBox::new(recipient, &sender.secret_key());

    let ciphertext = salsa_box
        .encrypt(GenericArray::from_slice(&nonce.0), plaintext)
        .map_err(|_| CryptoError::CryptoUnavailable("box encryption failed".to_string()))?;

    Ok(EncryptedBlob {
        version: BLOB_VERSION,
        nonce: nonce.0,
        ciphertext,
    })
}

fn open(blob: &EncryptedBlob, sender: &PublicKey, recipient: &Identity) -> Result<Zeroizing<Vec<u8>>> {
    if blob.version != BLOB_VERSION {
        return Err(CryptoError::UnsupportedVersion(blob.version));
    }

    let salsa_box = SalsaBox::new(sender, &recipient.secret_key());
    salsa_box
        .decrypt(GenericArray::from_slice(&blob.nonce), blob.ciphertext.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed)
}
