//! Optional server-side copy of the PIN-encrypted identity backup.
//!
//! The server stores the [`PinBackupFile`] as an opaque blob. It is a
//! redundant channel next to local file export, never a replacement for the
//! PIN: the server cannot open what it stores.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use zeroize::Zeroizing;

use super::{Identity, IdentityError, KeyStore, Result};
use crate::crypto::{AccountMeta, PinBackupFile};

/// Server endpoints for storing and retrieving the encrypted backup.
#[async_trait]
pub trait BackupApi: Send + Sync {
    /// Stores (replacing) the account's encrypted backup.
    async fn store_backup(&self, file: &PinBackupFile) -> Result<()>;

    /// Returns the account's encrypted backup, or `None` if none exists.
    async fn fetch_backup(&self) -> Result<Option<PinBackupFile>>;
}

impl KeyStore {
    /// Encrypts the identity under `pin` and uploads it.
    ///
    /// Marks the device as having exported a backup once the upload succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoIdentity`] without an identity, or the
    /// service error if the upload fails.
    pub async fn upload_backup(
        &self,
        api: &dyn BackupApi,
        account: AccountMeta,
        pin: Zeroizing<String>,
    ) -> Result<()> {
        let identity = self.require()?;
        let file = self
            .cipher()
            .encrypt_identity_async(Identity::clone(&identity), account, pin)
            .await?;

        // Only a stored copy counts as an exported backup.
        api.store_backup(&file).await?;
        self.mark_backup_exported()?;
        info!("uploaded encrypted identity backup");
        Ok(())
    }

    /// Downloads the server backup, decrypts it with `pin` and installs it.
    ///
    /// Returns `Ok(None)` when the server holds no backup.
    ///
    /// # Errors
    ///
    /// Returns `WrongPinOrCorrupted` if the PIN does not open the backup; the
    /// device identity is left untouched in that case.
    pub async fn restore_from_server(
        &self,
        api: &dyn BackupApi,
        pin: Zeroizing<String>,
    ) -> Result<Option<Arc<Identity>>> {
        let Some(file) = api.fetch_backup().await? else {
            return Ok(None);
        };

        let identity = self.import_encrypted_async(file, pin).await?;
        info!(public_key = %identity.public_key_hex(), "restored identity from server backup");
        Ok(Some(identity))
    }
}

/// Maps a transport failure into the identity error space.
#[must_use]
pub fn backup_error(message: impl Into<String>) -> IdentityError {
    IdentityError::Backup(message.into())
}
