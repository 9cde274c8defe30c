//! Collaborator traits for the key service and the item service.

use async_trait::async_trait;

use crate::wire::{
    EncryptedCreateItem, EncryptedItemKey, EncryptedUpdateItemRequest, EncryptedVaultKey,
    StoredItem,
};
use keyward_common::{AddressId, ItemId, Result, ShareId};

/// Source of encrypted key records for a share.
///
/// Records are returned exactly as the server holds them. Nothing here
/// verifies or opens them.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch every vault key record of a share addressed to one member address.
    ///
    /// # Postconditions
    /// - Returns all rotations, including inactive ones
    /// - Order is unspecified
    ///
    /// # Errors
    /// - `NotFound` if the share is unknown
    /// - `Transport` on network failure
    async fn fetch_vault_keys(
        &self,
        share_id: &ShareId,
        address_id: &AddressId,
    ) -> Result<Vec<EncryptedVaultKey>>;

    /// Fetch every item key record of a share.
    ///
    /// # Errors
    /// - `NotFound` if the share is unknown
    /// - `Transport` on network failure
    async fn fetch_item_keys(&self, share_id: &ShareId) -> Result<Vec<EncryptedItemKey>>;
}

/// Item persistence on the server.
#[async_trait]
pub trait ItemTransport: Send + Sync {
    /// Create a new item.
    ///
    /// # Postconditions
    /// - The item exists at `Revision::INITIAL`
    ///
    /// # Errors
    /// - `NotFound` if the share is unknown
    /// - `Transport` on network failure
    async fn create_item(
        &self,
        share_id: &ShareId,
        request: EncryptedCreateItem,
    ) -> Result<StoredItem>;

    /// Replace the content of an existing item.
    ///
    /// # Preconditions
    /// - `request.last_revision` is the revision the update was built from
    ///
    /// # Postconditions
    /// - The item's revision is incremented by one
    ///
    /// # Errors
    /// - `RevisionConflict` if the item has moved past `last_revision`
    /// - `NotFound` if the item does not exist
    /// - `Transport` on network failure
    async fn update_item(
        &self,
        share_id: &ShareId,
        item_id: &ItemId,
        request: EncryptedUpdateItemRequest,
    ) -> Result<StoredItem>;

    /// Fetch the current state of an item.
    ///
    /// # Errors
    /// - `NotFound` if the item does not exist
    /// - `Transport` on network failure
    async fn get_item(&self, share_id: &ShareId, item_id: &ItemId) -> Result<StoredItem>;
}
