//! Top-level entry point wiring the core components together.

use std::sync::Arc;

use chrono::Utc;

use crate::config::CoreConfig;
use crate::crypto::PinCipher;
use crate::identity::{self, Identity, KeyStore, SecureKeyStorage};
use crate::location::{
    self, ContactLocation, DirectoryClient, Hierarchy, LocationDistributor, NamedLocation,
    PublishOutcome,
};
use crate::transfer::{SourceTransfer, TargetTransfer, TransferApi};

/// Core interface for Whereish.
///
/// Owns the device's [`KeyStore`] and hands the current identity to the
/// location and transfer components, so "no identity yet" is an ordinary
/// `None` rather than ambient state.
pub struct WhereishCore {
    config: CoreConfig,
    keys: Arc<KeyStore>,
    distributor: LocationDistributor,
    transfers: Arc<dyn TransferApi>,
}

impl WhereishCore {
    /// Creates a core over platform storage and the server collaborators.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use whereish_core::config::CoreConfig;
    /// use whereish_core::identity::MemoryKeyStorage;
    /// use whereish_core::transfer::MemoryTransferBroker;
    /// # use whereish_core::location::{Contact, ContactBlob, ContactEnvelope, DirectoryClient};
    /// # struct Offline;
    /// # #[async_trait::async_trait]
    /// # impl DirectoryClient for Offline {
    /// #     async fn contacts(&self) -> whereish_core::location::Result<Vec<Contact>> { Ok(vec![]) }
    /// #     async fn submit_encrypted_locations(&self, _: &[ContactBlob]) -> whereish_core::location::Result<()> { Ok(()) }
    /// #     async fn register_public_key(&self, _: &str) -> whereish_core::location::Result<()> { Ok(()) }
    /// #     async fn contact_locations(&self) -> whereish_core::location::Result<Vec<ContactEnvelope>> { Ok(vec![]) }
    /// # }
    /// use whereish_core::WhereishCore;
    ///
    /// let core = WhereishCore::new(
    ///     Arc::new(MemoryKeyStorage::new()),
    ///     Arc::new(Offline),
    ///     Arc::new(MemoryTransferBroker::new()),
    ///     CoreConfig::default(),
    /// );
    /// assert!(core.identity().is_none());
    /// ```
    #[must_use]
    pub fn new(
        storage: Arc<dyn SecureKeyStorage>,
        directory: Arc<dyn DirectoryClient>,
        transfers: Arc<dyn TransferApi>,
        config: CoreConfig,
    ) -> Self {
        let keys = KeyStore::with_cipher(storage, PinCipher::from_config(&config));
        Self {
            config,
            keys: Arc::new(keys),
            distributor: LocationDistributor::new(directory),
            transfers,
        }
    }

    /// Returns the key store.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Returns the in-memory identity, if loaded.
    #[must_use]
    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.keys.current()
    }

    /// Loads the persisted identity and registers its public key.
    ///
    /// Returns `Ok(None)` when the device has no identity yet.
    ///
    /// # Errors
    ///
    /// Returns an error if storage or registration fails.
    pub async fn start(&self) -> crate::Result<Option<Arc<Identity>>> {
        let Some(identity) = self.keys.load()? else {
            return Ok(None);
        };
        self.distributor.register_identity(&identity).await?;
        Ok(Some(identity))
    }

    /// Publishes the current location to every accepted contact.
    ///
    /// A silent no-op without an identity.
    ///
    /// # Errors
    ///
    /// Returns a directory error if fetching contacts or submitting fails.
    pub async fn publish_location(
        &self,
        hierarchy: &Hierarchy,
        named_location: Option<&NamedLocation>,
    ) -> location::Result<PublishOutcome> {
        let identity = self.keys.current();
        self.distributor
            .publish(hierarchy, named_location, identity.as_deref())
            .await
    }

    /// Fetches and decrypts every contact's latest location.
    ///
    /// # Errors
    ///
    /// Returns a directory error if the envelopes cannot be fetched.
    pub async fn contact_locations(&self) -> location::Result<Vec<ContactLocation>> {
        let identity = self.keys.current();
        self.distributor.receive(identity.as_deref()).await
    }

    /// Creates a coordinator for sending the identity to a new device.
    #[must_use]
    pub fn source_transfer(&self) -> SourceTransfer {
        SourceTransfer::new(Arc::clone(&self.transfers), Arc::clone(&self.keys), &self.config)
    }

    /// Creates a coordinator for receiving the identity from another device.
    #[must_use]
    pub fn target_transfer(&self) -> TargetTransfer {
        TargetTransfer::new(Arc::clone(&self.transfers), Arc::clone(&self.keys), &self.config)
    }

    /// Returns whether the periodic PIN recall check is due.
    ///
    /// # Errors
    ///
    /// Returns an error if the PIN check record cannot be read.
    pub fn pin_check_due(&self) -> identity::Result<bool> {
        self.keys
            .pin_check_due(self.config.pin_check_interval(), Utc::now())
    }
}

impl std::fmt::Debug for WhereishCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhereishCore")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}
