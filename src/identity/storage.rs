//! Secure storage abstraction for identity key material.
//!
//! This module defines the [`SecureKeyStorage`] trait for platform-agnostic
//! storage of the identity and its companion records. Platform layers are
//! expected to back it with OS-level secure storage (Keychain, Keystore, ...).
//! [`FileKeyStorage`] is provided for desktop and CLI hosts.
//!
//! # Stored records
//!
//! | Key                        | Content                                |
//! |----------------------------|----------------------------------------|
//! | [`IDENTITY_KEY`]           | 64 raw bytes, `public \|\| secret`     |
//! | [`PIN_CHECK_KEY`]          | JSON test vector + last-checked time   |
//! | [`BACKUP_EXPORTED_KEY`]    | present once a backup has been exported|

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::IdentityError;

/// Storage key for the identity key pair.
pub const IDENTITY_KEY: &str = "whereish.identity";

/// Storage key for the PIN test vector record.
pub const PIN_CHECK_KEY: &str = "whereish.pin_check";

/// Storage key for the "backup exported" flag.
pub const BACKUP_EXPORTED_KEY: &str = "whereish.backup_exported";

/// Trait for secure storage of sensitive key material.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across threads.
pub trait SecureKeyStorage: Send + Sync {
    /// Stores bytes under the given key, replacing any previous value.
    ///
    /// # Arguments
    ///
    /// * `key` - One of the `whereish.*` record keys
    /// * `value` - Raw bytes to persist
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn store(&self, key: &str, value: &[u8]) -> Result<(), IdentityError>;

    /// Retrieves bytes for the given key.
    ///
    /// # Arguments
    ///
    /// * `key` - The record key to look up
    ///
    /// # Returns
    ///
    /// `Ok(Some(bytes))` if found, `Ok(None)` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the retrieval operation fails.
    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, IdentityError>;

    /// Deletes the value for the given key. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete(&self, key: &str) -> Result<(), IdentityError>;

    /// Checks if a value exists for the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    fn exists(&self, key: &str) -> Result<bool, IdentityError> {
        Ok(self.retrieve(key)?.is_some())
    }
}

/// File-backed storage: one file per key inside a private directory.
///
/// Writes go through a temporary file and a rename so a crash never leaves a
/// half-written identity behind. On Unix, the directory is `0700` and files
/// are `0600`.
#[derive(Debug, Clone)]
pub struct FileKeyStorage {
    dir: PathBuf,
}

impl FileKeyStorage {
    /// Opens (creating if needed) a storage directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory that will hold one file per record
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self, IdentityError> {
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, IdentityError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(self.dir.join(key))
        } else {
            Err(IdentityError::Storage(format!("invalid storage key '{key}'")))
        }
    }
}

impl SecureKeyStorage for FileKeyStorage {
    fn store(&self, key: &str, value: &[u8]) -> Result<(), IdentityError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!("{key}.tmp"));

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp)?;
        file.write_all(value)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, IdentityError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), IdentityError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryKeyStorage;

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use std::collections::HashMap;
    use std::sync::RwLock;

    use super::{IdentityError, SecureKeyStorage};

    /// In-memory storage implementation for testing.
    ///
    /// This implementation is NOT secure and should only be used in tests.
    #[derive(Debug, Default)]
    pub struct MemoryKeyStorage {
        data: RwLock<HashMap<String, Vec<u8>>>,
    }

    impl MemoryKeyStorage {
        /// Creates a new empty storage.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl SecureKeyStorage for MemoryKeyStorage {
        fn store(&self, key: &str, value: &[u8]) -> Result<(), IdentityError> {
            let mut data = self
                .data
                .write()
                .map_err(|e| IdentityError::Storage(e.to_string()))?;
            data.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, IdentityError> {
            let data = self
                .data
                .read()
                .map_err(|e| IdentityError::Storage(e.to_string()))?;
            Ok(data.get(key).cloned())
        }

        fn delete(&self, key: &str) -> Result<(), IdentityError> {
            let mut data = self
                .data
                .write()
                .map_err(|e| IdentityError::Storage(e.to_string()))?;
            data.remove(key);
            Ok(())
        }
    }
}
