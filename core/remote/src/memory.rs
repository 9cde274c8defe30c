//! In-memory server for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::provider::{ItemTransport, KeySource};
use crate::wire::{
    EncryptedCreateItem, EncryptedItemKey, EncryptedUpdateItemRequest, EncryptedVaultKey,
    StoredItem,
};
use keyward_common::{AddressId, Error, ItemId, Result, Revision, RotationId, ShareId};

#[derive(Default)]
struct ServerState {
    vault_keys: HashMap<ShareId, HashMap<AddressId, Vec<EncryptedVaultKey>>>,
    item_keys: HashMap<ShareId, Vec<EncryptedItemKey>>,
    items: HashMap<(ShareId, ItemId), StoredItem>,
}

impl ServerState {
    fn ensure_share(&self, share_id: &ShareId) -> Result<()> {
        if self.vault_keys.contains_key(share_id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Share not found: {}", share_id)))
        }
    }
}

/// In-memory implementation of the key service and item service.
///
/// Holds whatever records it is given without checking them, like a real
/// server that cannot read vault data. All data is lost on drop.
///
/// Revision checks happen under the state lock, so concurrent updates
/// from the same revision are serialized and only the first succeeds.
#[derive(Default)]
pub struct MemoryServer {
    state: Mutex<ServerState>,
    latency: Option<Duration>,
    offline: AtomicBool,
    vault_key_fetches: AtomicUsize,
    item_key_fetches: AtomicUsize,
}

impl MemoryServer {
    /// Create an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a server that waits `latency` before answering each call.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Make every subsequent call fail with a transport error, or recover.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of vault key fetches served or refused so far.
    pub fn vault_key_fetches(&self) -> usize {
        self.vault_key_fetches.load(Ordering::SeqCst)
    }

    /// Number of item key fetches served or refused so far.
    pub fn item_key_fetches(&self) -> usize {
        self.item_key_fetches.load(Ordering::SeqCst)
    }

    /// Publish a new rotation: one vault key record per member plus the
    /// rotation's item key record.
    ///
    /// Records flagged primary demote every earlier rotation of the share.
    pub async fn publish_rotation(
        &self,
        share_id: &ShareId,
        vault_keys: Vec<(AddressId, EncryptedVaultKey)>,
        item_key: EncryptedItemKey,
    ) {
        let mut state = self.state.lock().await;
        let members = state.vault_keys.entry(share_id.clone()).or_default();

        let rotation_id = item_key.rotation_id.clone();
        let makes_primary = vault_keys.iter().any(|(_, record)| record.is_primary);
        if makes_primary {
            for record in members.values_mut().flatten() {
                record.is_primary = false;
            }
        }
        for (address_id, record) in vault_keys {
            members.entry(address_id).or_default().push(record);
        }

        state
            .item_keys
            .entry(share_id.clone())
            .or_default()
            .push(item_key);

        debug!(share = %share_id, rotation = %rotation_id, "Published rotation");
    }

    /// Mark every copy of a rotation as no longer usable for writing.
    pub async fn deactivate_rotation(&self, share_id: &ShareId, rotation_id: &RotationId) {
        let mut state = self.state.lock().await;
        if let Some(members) = state.vault_keys.get_mut(share_id) {
            for record in members.values_mut().flatten() {
                if &record.rotation_id == rotation_id {
                    record.is_active = false;
                    record.is_primary = false;
                }
            }
        }
    }

    /// Replace the vault key records addressed to one member.
    ///
    /// Lets tests hand out arbitrary, possibly tampered, records.
    pub async fn replace_vault_keys(
        &self,
        share_id: &ShareId,
        address_id: &AddressId,
        records: Vec<EncryptedVaultKey>,
    ) {
        let mut state = self.state.lock().await;
        state
            .vault_keys
            .entry(share_id.clone())
            .or_default()
            .insert(address_id.clone(), records);
    }

    /// Number of items stored for a share.
    pub async fn item_count(&self, share_id: &ShareId) -> usize {
        let state = self.state.lock().await;
        state.items.keys().filter(|(share, _)| share == share_id).count()
    }

    async fn round_trip(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Transport("Server unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeySource for MemoryServer {
    async fn fetch_vault_keys(
        &self,
        share_id: &ShareId,
        address_id: &AddressId,
    ) -> Result<Vec<EncryptedVaultKey>> {
        self.vault_key_fetches.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        let state = self.state.lock().await;
        state.ensure_share(share_id)?;
        Ok(state
            .vault_keys
            .get(share_id)
            .and_then(|members| members.get(address_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_item_keys(&self, share_id: &ShareId) -> Result<Vec<EncryptedItemKey>> {
        self.item_key_fetches.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        let state = self.state.lock().await;
        state.ensure_share(share_id)?;
        Ok(state.item_keys.get(share_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ItemTransport for MemoryServer {
    async fn create_item(
        &self,
        share_id: &ShareId,
        request: EncryptedCreateItem,
    ) -> Result<StoredItem> {
        self.round_trip().await?;

        let mut state = self.state.lock().await;
        state.ensure_share(share_id)?;

        let now = Utc::now();
        let item_id = ItemId::new(Uuid::new_v4().to_string())?;
        let item = StoredItem {
            item_id: item_id.clone(),
            share_id: share_id.clone(),
            revision: Revision::INITIAL,
            rotation_id: request.rotation_id,
            vault_key_packet: request.vault_key_packet,
            vault_key_packet_signature: request.vault_key_packet_signature,
            content_format_version: request.content_format_version,
            content: request.content,
            user_signature: request.user_signature,
            item_key_signature: request.item_key_signature,
            package_name: request.package_name,
            create_time: now,
            modify_time: now,
        };
        state
            .items
            .insert((share_id.clone(), item_id.clone()), item.clone());

        debug!(share = %share_id, item = %item_id, "Created item");
        Ok(item)
    }

    async fn update_item(
        &self,
        share_id: &ShareId,
        item_id: &ItemId,
        request: EncryptedUpdateItemRequest,
    ) -> Result<StoredItem> {
        self.round_trip().await?;

        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&(share_id.clone(), item_id.clone()))
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", item_id)))?;

        if item.revision != request.last_revision {
            debug!(
                item = %item_id,
                expected = %request.last_revision,
                actual = %item.revision,
                "Rejected stale update"
            );
            return Err(Error::RevisionConflict {
                expected: request.last_revision.0,
                actual: item.revision.0,
            });
        }

        item.revision = item.revision.next();
        item.rotation_id = request.rotation_id;
        item.vault_key_packet = request.vault_key_packet;
        item.vault_key_packet_signature = request.vault_key_packet_signature;
        item.content_format_version = request.content_format_version;
        item.content = request.content;
        item.user_signature = request.user_signature;
        item.item_key_signature = request.item_key_signature;
        item.modify_time = Utc::now();

        debug!(item = %item_id, revision = %item.revision, "Updated item");
        Ok(item.clone())
    }

    async fn get_item(&self, share_id: &ShareId, item_id: &ItemId) -> Result<StoredItem> {
        self.round_trip().await?;

        let state = self.state.lock().await;
        state
            .items
            .get(&(share_id.clone(), item_id.clone()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", item_id)))
    }
}
