//! Identity file interchange formats.
//!
//! Two formats exist:
//!
//! | Version | Type                          | Content                          |
//! |---------|-------------------------------|----------------------------------|
//! | 1       | `whereish-identity`           | Plaintext key pair (legacy only) |
//! | 2       | `whereish-identity-encrypted` | PIN-encrypted key pair           |
//!
//! Both are importable. Only version 2 is produced for backups.
//! [`detect_format`] classifies a candidate file once, at the boundary, into
//! the closed [`BackupFormat`] enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::encoding::base64_bytes;
use super::error::{CryptoError, Result};
use super::pin::MAX_PBKDF2_ITERATIONS;

/// `type` field of the encrypted identity file.
pub const ENCRYPTED_FILE_TYPE: &str = "whereish-identity-encrypted";

/// `type` field of the legacy plaintext identity file.
pub const LEGACY_FILE_TYPE: &str = "whereish-identity";

/// Version of the encrypted identity file.
pub const ENCRYPTED_FILE_VERSION: u64 = 2;

/// Version of the legacy plaintext identity file.
pub const LEGACY_FILE_VERSION: u64 = 1;

/// KDF identifier written to encrypted files.
pub const KDF_ALGORITHM: &str = "PBKDF2-SHA256";

/// Cipher identifier written to encrypted files.
pub const CIPHER_ALGORITHM: &str = "AES-256-GCM";

/// Account details supplied when exporting an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    /// Account email (stored outside the ciphertext in encrypted files).
    pub email: String,
    /// Holder's display name (stored inside the ciphertext).
    pub name: String,
}

impl AccountMeta {
    /// Creates account metadata.
    #[must_use]
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }
}

/// Key pair as it appears inside file payloads (base64 fields).
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairFields {
    /// Base64 public key.
    pub public_key: String,
    /// Base64 secret key.
    pub private_key: String,
}

impl std::fmt::Debug for KeyPairFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairFields")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Key-derivation parameters of an encrypted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Always [`KDF_ALGORITHM`].
    pub algorithm: String,
    /// PBKDF2 iteration count used for this file.
    pub iterations: u32,
    /// Random salt.
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
}

/// Symmetric cipher parameters of an encrypted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    /// Always [`CIPHER_ALGORITHM`].
    pub algorithm: String,
    /// Random 12-byte IV.
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
}

/// Account section stored in clear in an encrypted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupAccount {
    /// Account email.
    pub email: String,
}

/// PIN-encrypted identity file (version 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinBackupFile {
    /// File format version.
    pub version: u64,
    /// File type marker.
    #[serde(rename = "type")]
    pub file_type: String,
    /// KDF parameters.
    pub kdf: KdfParams,
    /// Cipher parameters.
    pub cipher: CipherParams,
    /// AES-GCM ciphertext with appended tag.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Account the identity belongs to.
    pub account: BackupAccount,
}

impl PinBackupFile {
    /// Serializes the file as pretty JSON for export.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and strictly validates an encrypted identity file.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidFormat`] if the JSON is malformed or the
    /// file is not a version 2 encrypted identity file.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: Self =
            serde_json::from_str(json).map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    /// Checks the type, version and algorithm markers.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidFormat`] on any mismatch.
    pub fn validate(&self) -> Result<()> {
        if self.file_type != ENCRYPTED_FILE_TYPE {
            return Err(CryptoError::InvalidFormat(format!(
                "unexpected file type '{}'",
                self.file_type
            )));
        }
        if self.version != ENCRYPTED_FILE_VERSION {
            return Err(CryptoError::InvalidFormat(format!(
                "unexpected file version {}",
                self.version
            )));
        }
        if self.kdf.algorithm != KDF_ALGORITHM || self.cipher.algorithm != CIPHER_ALGORITHM {
            return Err(CryptoError::InvalidFormat(
                "unsupported algorithm".to_string(),
            ));
        }
        if self.kdf.iterations == 0 || self.kdf.salt.is_empty() {
            return Err(CryptoError::InvalidFormat(
                "invalid KDF parameters".to_string(),
            ));
        }
        if self.kdf.iterations > MAX_PBKDF2_ITERATIONS {
            return Err(CryptoError::InvalidFormat(format!(
                "iteration count {} exceeds {MAX_PBKDF2_ITERATIONS}",
                self.kdf.iterations
            )));
        }
        Ok(())
    }
}

/// Plaintext sealed inside a [`PinBackupFile`].
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityPayload {
    /// The key pair.
    pub identity: KeyPairFields,
    /// Holder's display name.
    pub name: String,
    /// When the backup was created.
    pub created: DateTime<Utc>,
}

/// Account section of a legacy plaintext file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAccount {
    /// Account email.
    pub email: String,
    /// Holder's display name.
    #[serde(default)]
    pub name: String,
}

/// Legacy plaintext identity file (version 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyIdentityFile {
    /// File format version.
    pub version: u64,
    /// File type marker.
    #[serde(rename = "type")]
    pub file_type: String,
    /// When the file was exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported: Option<DateTime<Utc>>,
    /// Account the identity belongs to.
    pub account: LegacyAccount,
    /// The raw key pair.
    pub identity: KeyPairFields,
}

impl LegacyIdentityFile {
    /// Serializes the file as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Classification of a candidate identity file.
#[derive(Debug, Clone)]
pub enum BackupFormat {
    /// Version 2 PIN-encrypted file.
    EncryptedV2(PinBackupFile),
    /// Version 1 plaintext file.
    LegacyPlain(LegacyIdentityFile),
    /// Anything else, including malformed JSON.
    Unknown,
}

impl BackupFormat {
    /// Returns a short label for logs and UI hints.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EncryptedV2(_) => "encrypted",
            Self::LegacyPlain(_) => "unencrypted",
            Self::Unknown => "unknown",
        }
    }
}

/// Classifies a candidate identity file.
///
/// Never fails: malformed JSON, unknown versions and unknown types all map
/// to [`BackupFormat::Unknown`]. Only the version and type decide the
/// class; an encrypted file's KDF and cipher parameters are validated when it
/// is decrypted.
///
/// # Example
///
/// ```
/// use whereish_core::crypto::{detect_format, BackupFormat};
///
/// assert!(matches!(detect_format("not json"), BackupFormat::Unknown));
/// ```
#[must_use]
pub fn detect_format(json: &str) -> BackupFormat {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(json) else {
        return BackupFormat::Unknown;
    };

    let version = value.get("version").and_then(serde_json::Value::as_u64);
    let file_type = value.get("type").and_then(serde_json::Value::as_str);

    match (version, file_type) {
        // Parameters are checked on decryption so a bad file reports
        // `InvalidFormat` rather than being unrecognized.
        (Some(ENCRYPTED_FILE_VERSION), Some(ENCRYPTED_FILE_TYPE)) => {
            serde_json::from_value::<PinBackupFile>(value)
                .map_or(BackupFormat::Unknown, BackupFormat::EncryptedV2)
        }
        (Some(LEGACY_FILE_VERSION), Some(LEGACY_FILE_TYPE)) => {
            serde_json::from_value::<LegacyIdentityFile>(value)
                .map_or(BackupFormat::Unknown, BackupFormat::LegacyPlain)
        }
        _ => BackupFormat::Unknown,
    }
}
