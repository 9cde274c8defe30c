//! Local persistence of key records.
//!
//! Records are kept exactly as fetched: sealed and signed. Whoever loads
//! them verifies and opens them again, so a tampered store cannot inject keys.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::wire::{EncryptedItemKey, EncryptedVaultKey};
use keyward_common::{AddressId, Error, Result, ShareId};

/// The key records of one share, as addressed to one member address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredShareKeys {
    pub vault_keys: Vec<EncryptedVaultKey>,
    pub item_keys: Vec<EncryptedItemKey>,
}

impl StoredShareKeys {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Persistent store for key records.
#[async_trait]
pub trait LocalKeyStore: Send + Sync {
    /// Load the records of a share, if any were stored.
    async fn load(&self, address_id: &AddressId, share_id: &ShareId)
        -> Result<Option<StoredShareKeys>>;

    /// Store the records of a share, replacing any previous ones.
    async fn store(
        &self,
        address_id: &AddressId,
        share_id: &ShareId,
        keys: StoredShareKeys,
    ) -> Result<()>;

    /// Forget the records of a share. Removing a missing entry is not an error.
    async fn remove(&self, address_id: &AddressId, share_id: &ShareId) -> Result<()>;
}

/// In-memory key store.
///
/// Entries are held as serialized bytes so that loading always goes
/// through the same decoding path as a disk-backed store would.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: RwLock<HashMap<(AddressId, ShareId), Vec<u8>>>,
    loads: AtomicUsize,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `load` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Overwrite the raw bytes of an entry.
    pub async fn put_raw(&self, address_id: &AddressId, share_id: &ShareId, bytes: Vec<u8>) {
        self.entries
            .write()
            .await
            .insert((address_id.clone(), share_id.clone()), bytes);
    }
}

#[async_trait]
impl LocalKeyStore for MemoryKeyStore {
    async fn load(
        &self,
        address_id: &AddressId,
        share_id: &ShareId,
    ) -> Result<Option<StoredShareKeys>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.read().await;
        entries
            .get(&(address_id.clone(), share_id.clone()))
            .map(|bytes| StoredShareKeys::from_bytes(bytes))
            .transpose()
    }

    async fn store(
        &self,
        address_id: &AddressId,
        share_id: &ShareId,
        keys: StoredShareKeys,
    ) -> Result<()> {
        let bytes = keys.to_bytes()?;
        self.entries
            .write()
            .await
            .insert((address_id.clone(), share_id.clone()), bytes);
        Ok(())
    }

    async fn remove(&self, address_id: &AddressId, share_id: &ShareId) -> Result<()> {
        self.entries
            .write()
            .await
            .remove(&(address_id.clone(), share_id.clone()));
        Ok(())
    }
}
