//! Device-local custody of the account identity.
//!
//! [`KeyStore`] is the single owner of the identity on a device. Other
//! components receive the identity from it explicitly; there is no ambient
//! global key state. "No identity yet" is `None`, which is the normal state
//! between sign-in and identity provisioning.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::keypair::KEY_LENGTH;
use super::storage::{SecureKeyStorage, BACKUP_EXPORTED_KEY, IDENTITY_KEY, PIN_CHECK_KEY};
use super::{Identity, IdentityError, Result};
use crate::crypto::format::{
    KeyPairFields, LegacyAccount, LegacyIdentityFile, LEGACY_FILE_TYPE, LEGACY_FILE_VERSION,
};
use crate::crypto::{detect_format, AccountMeta, BackupFormat, PinBackupFile, PinCipher, PinTestVector};

/// Persisted PIN test vector plus the time of the last successful check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinCheckRecord {
    /// Encrypted known plaintext.
    pub vector: PinTestVector,
    /// When the user last proved they remember the PIN.
    pub last_checked: DateTime<Utc>,
}

/// Owns the device's identity and its lifecycle.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use whereish_core::identity::{KeyStore, MemoryKeyStorage};
///
/// let store = KeyStore::new(Arc::new(MemoryKeyStorage::new()));
/// assert!(store.current().is_none());
///
/// let identity = store.create().unwrap();
/// assert_eq!(store.current().unwrap().public_key_bytes(), identity.public_key_bytes());
/// ```
pub struct KeyStore {
    storage: Arc<dyn SecureKeyStorage>,
    cipher: PinCipher,
    current: RwLock<Option<Arc<Identity>>>,
}

impl KeyStore {
    /// Creates a store over the given secure storage.
    ///
    /// Nothing is read until [`Self::load`] is called.
    #[must_use]
    pub fn new(storage: Arc<dyn SecureKeyStorage>) -> Self {
        Self::with_cipher(storage, PinCipher::new())
    }

    /// Creates a store that writes PIN-protected data with `cipher`.
    #[must_use]
    pub fn with_cipher(storage: Arc<dyn SecureKeyStorage>, cipher: PinCipher) -> Self {
        Self {
            storage,
            cipher,
            current: RwLock::new(None),
        }
    }

    /// Returns the PIN cipher used for new backups and test vectors.
    #[must_use]
    pub const fn cipher(&self) -> PinCipher {
        self.cipher
    }

    /// Generates, persists and activates a fresh identity.
    ///
    /// Replaces any existing identity.
    ///
    /// # Errors
    ///
    /// Returns `CryptoUnavailable` if the secure RNG fails, or a storage error.
    pub fn create(&self) -> Result<Arc<Identity>> {
        let identity = Identity::generate()?;
        info!(public_key = %identity.public_key_hex(), "created new identity");
        self.install(identity)
    }

    /// Loads the persisted identity into memory.
    ///
    /// Returns `Ok(None)` when no identity is stored. Cheap to call
    /// repeatedly: once loaded, the in-memory identity is returned directly.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the stored record is corrupt.
    pub fn load(&self) -> Result<Option<Arc<Identity>>> {
        if let Some(identity) = self.current() {
            return Ok(Some(identity));
        }

        let Some(raw) = self.storage.retrieve(IDENTITY_KEY)?.map(Zeroizing::new) else {
            debug!("no stored identity");
            return Ok(None);
        };

        let identity = Arc::new(Identity::from_raw(&raw)?);
        *self.write_current() = Some(Arc::clone(&identity));
        debug!(public_key = %identity.public_key_hex(), "loaded identity");
        Ok(Some(identity))
    }

    /// Returns the in-memory identity without touching storage.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Identity>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the in-memory identity or [`IdentityError::NoIdentity`].
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoIdentity`] when none is loaded.
    pub fn require(&self) -> Result<Arc<Identity>> {
        self.current().ok_or(IdentityError::NoIdentity)
    }

    /// Irreversibly erases the identity and its companion records.
    ///
    /// # Errors
    ///
    /// Returns an error if storage deletion fails. The in-memory identity is
    /// dropped regardless.
    pub fn clear(&self) -> Result<()> {
        *self.write_current() = None;
        self.storage.delete(IDENTITY_KEY)?;
        self.storage.delete(PIN_CHECK_KEY)?;
        self.storage.delete(BACKUP_EXPORTED_KEY)?;
        warn!("identity cleared from device");
        Ok(())
    }

    /// Persists and activates `identity`, superseding any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn install(&self, identity: Identity) -> Result<Arc<Identity>> {
        let same_key = self.persisted_public_key()? == Some(identity.public_key_bytes());

        if !same_key {
            // Any PIN record or backup flag belonged to a different key.
            self.storage.delete(PIN_CHECK_KEY)?;
            self.storage.delete(BACKUP_EXPORTED_KEY)?;
        }
        self.storage.store(IDENTITY_KEY, &identity.to_raw())?;

        let identity = Arc::new(identity);
        *self.write_current() = Some(Arc::clone(&identity));
        Ok(identity)
    }

    /// Imports a legacy plaintext identity file (version 1).
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UnrecognizedFile`] if `json` is not a legacy
    /// file, or an error if its key pair is invalid.
    pub fn import_private(&self, json: &str) -> Result<Arc<Identity>> {
        match detect_format(json) {
            BackupFormat::LegacyPlain(file) => self.install_legacy(&file),
            BackupFormat::EncryptedV2(_) | BackupFormat::Unknown => {
                Err(IdentityError::UnrecognizedFile)
            }
        }
    }

    /// Exports the identity as a legacy plaintext file.
    ///
    /// Only for migration to builds that predate encrypted backups.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoIdentity`] if no identity is loaded.
    pub fn export_private(&self, account: &AccountMeta) -> Result<Zeroizing<String>> {
        let identity = self.require()?;
        let file = LegacyIdentityFile {
            version: LEGACY_FILE_VERSION,
            file_type: LEGACY_FILE_TYPE.to_string(),
            exported: Some(Utc::now()),
            account: LegacyAccount {
                email: account.email.clone(),
                name: account.name.clone(),
            },
            identity: KeyPairFields {
                public_key: identity.public_key_base64(),
                private_key: identity.secret_key_base64().to_string(),
            },
        };
        warn!("exporting identity in plaintext legacy format");
        Ok(Zeroizing::new(file.to_json()?))
    }

    /// Imports a PIN-encrypted backup file and installs its identity.
    ///
    /// On success a fresh PIN test vector is stored for the same PIN.
    ///
    /// # Errors
    ///
    /// Returns `WrongPinOrCorrupted` if the PIN does not open the file, or
    /// `InvalidFormat` if the file fails validation.
    pub fn import_encrypted(&self, file: &PinBackupFile, pin: &str) -> Result<Arc<Identity>> {
        let recovered = PinCipher::decrypt_identity(file, pin)?;
        let identity = self.install(recovered.identity)?;
        self.set_pin(pin)?;
        info!(public_key = %identity.public_key_hex(), "imported encrypted identity backup");
        Ok(identity)
    }

    /// [`Self::import_encrypted`] with both key derivations on the blocking
    /// pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::import_encrypted`].
    pub async fn import_encrypted_async(
        &self,
        file: PinBackupFile,
        pin: Zeroizing<String>,
    ) -> Result<Arc<Identity>> {
        let recovered = PinCipher::decrypt_identity_async(file, pin.clone()).await?;
        let identity = self.install(recovered.identity)?;
        self.set_pin_async(pin).await?;
        info!(public_key = %identity.public_key_hex(), "imported encrypted identity backup");
        Ok(identity)
    }

    /// Exports the identity as a PIN-encrypted backup file.
    ///
    /// Marks the device as having exported a backup.
    ///
    /// # Arguments
    ///
    /// * `account` - Email (stored in clear) and display name (encrypted)
    /// * `pin` - The PIN the user will need to import the file
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoIdentity`] if no identity is loaded.
    pub fn export_encrypted(&self, account: &AccountMeta, pin: &str) -> Result<PinBackupFile> {
        let identity = self.require()?;
        let file = self.cipher.encrypt_identity(&identity, account, pin)?;
        self.mark_backup_exported()?;
        Ok(file)
    }

    /// [`Self::export_encrypted`] with key derivation on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::export_encrypted`].
    pub async fn export_encrypted_async(
        &self,
        account: AccountMeta,
        pin: Zeroizing<String>,
    ) -> Result<PinBackupFile> {
        let identity = self.require()?;
        let file = self
            .cipher
            .encrypt_identity_async(Identity::clone(&identity), account, pin)
            .await?;
        self.mark_backup_exported()?;
        Ok(file)
    }

    /// Imports any supported identity file.
    ///
    /// Encrypted files require `pin`; legacy files ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UnrecognizedFile`] for unknown formats or an
    /// encrypted file without a PIN.
    pub fn import_backup(&self, json: &str, pin: Option<&str>) -> Result<Arc<Identity>> {
        match (detect_format(json), pin) {
            (BackupFormat::EncryptedV2(file), Some(pin)) => self.import_encrypted(&file, pin),
            (BackupFormat::LegacyPlain(file), _) => self.install_legacy(&file),
            (BackupFormat::EncryptedV2(_), None) | (BackupFormat::Unknown, _) => {
                Err(IdentityError::UnrecognizedFile)
            }
        }
    }

    /// [`Self::import_backup`] with key derivation on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::import_backup`].
    pub async fn import_backup_async(
        &self,
        json: &str,
        pin: Option<Zeroizing<String>>,
    ) -> Result<Arc<Identity>> {
        match (detect_format(json), pin) {
            (BackupFormat::EncryptedV2(file), Some(pin)) => {
                self.import_encrypted_async(file, pin).await
            }
            (BackupFormat::LegacyPlain(file), _) => self.install_legacy(&file),
            (BackupFormat::EncryptedV2(_), None) | (BackupFormat::Unknown, _) => {
                Err(IdentityError::UnrecognizedFile)
            }
        }
    }

    /// Stores a fresh PIN test vector for `pin`.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or storage fails.
    pub fn set_pin(&self, pin: &str) -> Result<()> {
        let vector = self.cipher.encrypt_test_value(pin)?;
        self.store_pin_check(&PinCheckRecord {
            vector,
            last_checked: Utc::now(),
        })
    }

    /// [`Self::set_pin`] with key derivation on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or storage fails.
    pub async fn set_pin_async(&self, pin: Zeroizing<String>) -> Result<()> {
        let vector = self.cipher.encrypt_test_value_async(pin).await?;
        self.store_pin_check(&PinCheckRecord {
            vector,
            last_checked: Utc::now(),
        })
    }

    /// Returns the stored PIN check record, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the record is corrupt.
    pub fn pin_check(&self) -> Result<Option<PinCheckRecord>> {
        self.storage
            .retrieve(PIN_CHECK_KEY)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(IdentityError::from))
            .transpose()
    }

    /// Checks `pin` against the stored test vector.
    ///
    /// A successful check refreshes `last_checked`. Returns `false` when no
    /// vector is stored.
    ///
    /// # Errors
    ///
    /// Only storage failures are errors. A wrong PIN is `Ok(false)`.
    pub fn check_pin(&self, pin: &str) -> Result<bool> {
        let Some(mut record) = self.pin_check()? else {
            return Ok(false);
        };

        if !PinCipher::verify_pin(&record.vector, pin) {
            debug!("PIN check failed");
            return Ok(false);
        }

        record.last_checked = Utc::now();
        self.store_pin_check(&record)?;
        Ok(true)
    }

    /// [`Self::check_pin`] with key derivation on the blocking pool.
    ///
    /// # Errors
    ///
    /// Only storage failures are errors. A wrong PIN is `Ok(false)`.
    pub async fn check_pin_async(&self, pin: Zeroizing<String>) -> Result<bool> {
        let Some(mut record) = self.pin_check()? else {
            return Ok(false);
        };

        if !PinCipher::verify_pin_async(record.vector.clone(), pin).await {
            debug!("PIN check failed");
            return Ok(false);
        }

        record.last_checked = Utc::now();
        self.store_pin_check(&record)?;
        Ok(true)
    }

    /// Returns whether a periodic PIN check is due at `now`.
    ///
    /// # Arguments
    ///
    /// * `interval` - How long a successful check stays fresh
    /// * `now` - The time to evaluate against
    ///
    /// With no stored vector there is nothing to check, so never due.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn pin_check_due(&self, interval: Duration, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .pin_check()?
            .is_some_and(|record| now - record.last_checked >= interval))
    }

    /// Records that the user has exported an identity backup.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn mark_backup_exported(&self) -> Result<()> {
        self.storage.store(BACKUP_EXPORTED_KEY, &[1])
    }

    /// Returns whether the user has ever exported a backup of this identity.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn has_exported_backup(&self) -> Result<bool> {
        self.storage.exists(BACKUP_EXPORTED_KEY)
    }

    fn install_legacy(&self, file: &LegacyIdentityFile) -> Result<Arc<Identity>> {
        let identity = Identity::from_base64(&file.identity.public_key, &file.identity.private_key)?;
        let identity = self.install(identity)?;
        info!(public_key = %identity.public_key_hex(), "imported legacy identity file");
        Ok(identity)
    }

    /// Public key of the identity on this device, loaded or not.
    ///
    /// An unreadable stored record counts as no identity.
    fn persisted_public_key(&self) -> Result<Option<[u8; KEY_LENGTH]>> {
        if let Some(identity) = self.current() {
            return Ok(Some(identity.public_key_bytes()));
        }
        Ok(self
            .storage
            .retrieve(IDENTITY_KEY)?
            .map(Zeroizing::new)
            .and_then(|raw| Identity::from_raw(&raw).ok())
            .map(|identity| identity.public_key_bytes()))
    }

    fn store_pin_check(&self, record: &PinCheckRecord) -> Result<()> {
        self.storage
            .store(PIN_CHECK_KEY, &serde_json::to_vec(record)?)
    }

    fn write_current(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<Identity>>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
