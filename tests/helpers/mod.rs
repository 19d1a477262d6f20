//! Reusable test helpers for Whereish integration tests.
//!
//! These helpers use REAL crypto. The server is replaced by in-memory fakes:
//! `FakeDirectory` records what would be sent to the contact directory, and
//! the library's `MemoryTransferBroker` plays the transfer broker.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use whereish_core::config::CoreConfig;
use whereish_core::crypto::PinCipher;
use whereish_core::identity::{Identity, KeyStore, MemoryKeyStorage};
use whereish_core::location::{
    Contact, ContactBlob, ContactEnvelope, DirectoryClient, Hierarchy, HierarchyLevel,
    LocationError, PLANET_EARTH,
};
use zeroize::Zeroizing;

/// Iterations used by tests; far below the production floor to keep tests fast.
pub const TEST_ITERATIONS: u32 = 1_000;

/// A PIN cipher with reduced cost.
pub fn fast_cipher() -> PinCipher {
    PinCipher::with_iterations(TEST_ITERATIONS)
}

/// An empty key store backed by memory.
pub fn memory_keystore() -> Arc<KeyStore> {
    Arc::new(KeyStore::with_cipher(
        Arc::new(MemoryKeyStorage::new()),
        fast_cipher(),
    ))
}

/// Configuration with a short poll interval.
pub fn fast_config() -> CoreConfig {
    CoreConfig {
        poll_interval_ms: 100,
        ..CoreConfig::default()
    }
}

/// Wraps a PIN for the async APIs.
pub fn pin(value: &str) -> Zeroizing<String> {
    Zeroizing::new(value.to_string())
}

/// A fully populated hierarchy.
pub fn full_hierarchy() -> Hierarchy {
    Hierarchy::new()
        .with(HierarchyLevel::Address, "742 Evergreen Terrace")
        .with(HierarchyLevel::Street, "Evergreen Terrace")
        .with(HierarchyLevel::Neighborhood, "Pressboard Estates")
        .with(HierarchyLevel::City, "Springfield")
        .with(HierarchyLevel::County, "Sangamon County")
        .with(HierarchyLevel::State, "Illinois")
        .with(HierarchyLevel::Country, "United States")
        .with(HierarchyLevel::Continent, "North America")
        .with(HierarchyLevel::Planet, PLANET_EARTH)
}

/// A contact whose public key belongs to `identity`.
pub fn contact_with_key(id: &str, identity: &Identity, level: Option<&str>) -> Contact {
    let mut contact = Contact::new(id).with_public_key(identity.public_key_base64());
    contact.permission_granted = level.map(str::to_string);
    contact
}

/// In-memory stand-in for the contact directory.
#[derive(Default)]
pub struct FakeDirectory {
    pub contacts: Mutex<Vec<Contact>>,
    pub batches: Mutex<Vec<Vec<ContactBlob>>>,
    pub registered_keys: Mutex<Vec<String>>,
    pub envelopes: Mutex<Vec<ContactEnvelope>>,
    pub offline: Mutex<bool>,
}

impl FakeDirectory {
    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        Self {
            contacts: Mutex::new(contacts),
            ..Self::default()
        }
    }

    /// Number of submit calls received.
    pub fn submit_calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    /// The blob most recently submitted for `contact_id`.
    pub fn last_blob_for(&self, contact_id: &str) -> Option<ContactBlob> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .flat_map(|batch| batch.iter())
            .find(|entry| entry.contact_id == contact_id)
            .cloned()
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    fn check_online(&self) -> Result<(), LocationError> {
        if *self.offline.lock().unwrap() {
            Err(LocationError::directory("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn contacts(&self) -> Result<Vec<Contact>, LocationError> {
        self.check_online()?;
        Ok(self.contacts.lock().unwrap().clone())
    }

    async fn submit_encrypted_locations(&self, batch: &[ContactBlob]) -> Result<(), LocationError> {
        self.check_online()?;
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    async fn register_public_key(&self, public_key: &str) -> Result<(), LocationError> {
        self.check_online()?;
        self.registered_keys
            .lock()
            .unwrap()
            .push(public_key.to_string());
        Ok(())
    }

    async fn contact_locations(&self) -> Result<Vec<ContactEnvelope>, LocationError> {
        self.check_online()?;
        Ok(self.envelopes.lock().unwrap().clone())
    }
}
