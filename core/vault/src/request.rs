//! Signed item write requests and their read-side verification.
//!
//! Every write carries two signatures over the same canonical bytes
//! (rotation id, format version, then the sealed content): one by the author's
//! address key and one by the item key. A stored item is trusted only when
//! both verify.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::codec::ContentCodec;
use crate::content::ItemContent;
use crate::keys::{ItemKey, UserAddress, VaultKey};
use keyward_common::{Error, ItemId, Result, Revision, RotationId, SignatureFailure};
use keyward_crypto::{
    CryptoProvider, KeyPacket, PrivateKey, PublicKey, SealContext, Signature, SignatureContext,
};
use keyward_remote::wire::item_key_packet_message;
use keyward_remote::{
    EncryptedCreateItem, EncryptedItemContent, EncryptedUpdateItemRequest, StoredItem,
};

/// Everything a write request needs once content is encoded and signed.
struct SignedContent {
    content: EncryptedItemContent,
    user_signature: Signature,
    item_key_signature: Signature,
    vault_key_packet_signature: Signature,
}

/// A stored item whose signatures have been checked.
///
/// Only [`ItemRequestBuilder::verify_item`] creates one.
#[derive(Debug, Clone)]
pub struct VerifiedItem {
    stored: StoredItem,
}

impl VerifiedItem {
    pub fn item_id(&self) -> &ItemId {
        &self.stored.item_id
    }

    pub fn revision(&self) -> Revision {
        self.stored.revision
    }

    pub fn rotation_id(&self) -> &RotationId {
        &self.stored.rotation_id
    }

    /// The item key packet, reused by updates.
    pub fn key_packet(&self) -> &KeyPacket {
        &self.stored.vault_key_packet
    }

    pub fn package_name(&self) -> Option<&str> {
        self.stored.package_name.as_deref()
    }

    /// The verified encrypted content.
    pub fn encrypted_content(&self) -> EncryptedItemContent {
        self.stored.encrypted_content()
    }
}

/// Builds dual-signed create and update requests.
pub struct ItemRequestBuilder {
    crypto: Arc<dyn CryptoProvider>,
    codec: ContentCodec,
}

impl ItemRequestBuilder {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self {
            codec: ContentCodec::new(crypto.clone()),
            crypto,
        }
    }

    /// The codec requests are encoded with.
    pub fn codec(&self) -> &ContentCodec {
        &self.codec
    }

    /// Build a request creating a new item.
    ///
    /// # Preconditions
    /// - `vault_key` and `item_key` belong to the current active rotation
    ///
    /// # Postconditions
    /// - `userSignature` and `itemKeySignature` both cover the encoded content
    /// - The item key is sealed to the vault key and signed by the address
    ///
    /// # Errors
    /// - `InvalidInput` for an inactive vault key or mismatched rotations
    pub fn create(
        &self,
        vault_key: &VaultKey,
        item_key: &ItemKey,
        user_address: &UserAddress,
        content: &ItemContent,
        package_name: Option<&str>,
    ) -> Result<EncryptedCreateItem> {
        check_rotation(vault_key, item_key)?;

        let vault_key_packet = self.crypto.seal(
            vault_key.public_key(),
            item_key.private_key().as_bytes(),
            SealContext::ItemKey,
        )?;
        let signed = self.sign(item_key, &vault_key_packet, user_address, content)?;

        debug!(rotation_id = %item_key.rotation_id, kind = content.kind(), "Built create request");
        Ok(EncryptedCreateItem {
            rotation_id: item_key.rotation_id.clone(),
            vault_key_packet,
            vault_key_packet_signature: signed.vault_key_packet_signature,
            content_format_version: signed.content.content_format_version,
            content: signed.content.content,
            user_signature: signed.user_signature,
            item_key_signature: signed.item_key_signature,
            package_name: package_name.map(str::to_string),
        })
    }

    /// Build a request replacing the content of an existing item.
    ///
    /// # Preconditions
    /// - `key_packet` carries `item_key`, sealed to `vault_key`
    /// - `last_revision` is the revision the caller last read
    ///
    /// # Errors
    /// - `InvalidInput` for an inactive vault key, mismatched rotations or a
    ///   key packet that does not carry the item key
    pub fn create_update_request(
        &self,
        vault_key: &VaultKey,
        item_key: &ItemKey,
        key_packet: &KeyPacket,
        user_address: &UserAddress,
        content: &ItemContent,
        last_revision: Revision,
    ) -> Result<EncryptedUpdateItemRequest> {
        check_rotation(vault_key, item_key)?;
        if !self.packet_carries(vault_key, key_packet, item_key) {
            return Err(Error::InvalidInput(
                "Key packet does not carry the item key".to_string(),
            ));
        }

        let signed = self.sign(item_key, key_packet, user_address, content)?;

        debug!(
            rotation_id = %item_key.rotation_id,
            last_revision = %last_revision,
            "Built update request"
        );
        Ok(EncryptedUpdateItemRequest {
            rotation_id: item_key.rotation_id.clone(),
            vault_key_packet: key_packet.clone(),
            vault_key_packet_signature: signed.vault_key_packet_signature,
            last_revision,
            content_format_version: signed.content.content_format_version,
            content: signed.content.content,
            user_signature: signed.user_signature,
            item_key_signature: signed.item_key_signature,
        })
    }

    /// Check every signature of a stored item.
    ///
    /// `author_keys` are the public keys of the addresses allowed to write
    /// to the vault.
    ///
    /// # Errors
    /// - `InvalidInput` if the keys are not of the item's rotation
    /// - `InvalidSignature` naming the first signature that does not verify
    /// - `Integrity` if the key packet does not carry the item key
    pub fn verify_item(
        &self,
        stored: &StoredItem,
        vault_key: &VaultKey,
        item_key: &ItemKey,
        author_keys: &[PublicKey],
    ) -> Result<VerifiedItem> {
        if stored.rotation_id != item_key.rotation_id
            || stored.rotation_id != vault_key.rotation_id
        {
            return Err(Error::InvalidInput(format!(
                "Item is bound to rotation {}",
                stored.rotation_id
            )));
        }

        let message = stored
            .encrypted_content()
            .signed_message(&stored.rotation_id);
        let checks = [
            (
                self.crypto.verify_any(
                    author_keys,
                    SignatureContext::ItemContentByUser,
                    &message,
                    &stored.user_signature,
                ),
                SignatureFailure::UserSignature,
            ),
            (
                self.crypto.verify(
                    item_key.public_key(),
                    SignatureContext::ItemContentByItemKey,
                    &message,
                    &stored.item_key_signature,
                ),
                SignatureFailure::ItemKeySignature,
            ),
            (
                self.crypto.verify_any(
                    author_keys,
                    SignatureContext::ItemKeyPacket,
                    &item_key_packet_message(&stored.rotation_id, &stored.vault_key_packet),
                    &stored.vault_key_packet_signature,
                ),
                SignatureFailure::ItemKeyPacket,
            ),
        ];
        if let Some((_, failure)) = checks.iter().find(|(valid, _)| !valid) {
            warn!(item = %stored.item_id, reason = %failure, "Rejected item");
            return Err(Error::InvalidSignature(*failure));
        }

        if !self.packet_carries(vault_key, &stored.vault_key_packet, item_key) {
            return Err(Error::Integrity(
                "Item key packet does not carry the item key".to_string(),
            ));
        }

        Ok(VerifiedItem {
            stored: stored.clone(),
        })
    }

    /// Verify a stored item and decode its content.
    pub fn open_item(
        &self,
        stored: &StoredItem,
        vault_key: &VaultKey,
        item_key: &ItemKey,
        author_keys: &[PublicKey],
    ) -> Result<(VerifiedItem, ItemContent)> {
        let verified = self.verify_item(stored, vault_key, item_key, author_keys)?;
        let content = self
            .codec
            .decode(&verified.encrypted_content(), item_key)?;
        Ok((verified, content))
    }

    fn sign(
        &self,
        item_key: &ItemKey,
        key_packet: &KeyPacket,
        user_address: &UserAddress,
        content: &ItemContent,
    ) -> Result<SignedContent> {
        let content = self.codec.encode(content, item_key)?;
        let message = content.signed_message(&item_key.rotation_id);

        let user_signature = self.crypto.sign(
            user_address.private_key(),
            SignatureContext::ItemContentByUser,
            &message,
        );
        let item_key_signature = self.crypto.sign(
            item_key.private_key(),
            SignatureContext::ItemContentByItemKey,
            &message,
        );
        let vault_key_packet_signature = self.crypto.sign(
            user_address.private_key(),
            SignatureContext::ItemKeyPacket,
            &item_key_packet_message(&item_key.rotation_id, key_packet),
        );

        Ok(SignedContent {
            content,
            user_signature,
            item_key_signature,
            vault_key_packet_signature,
        })
    }

    fn packet_carries(&self, vault_key: &VaultKey, packet: &KeyPacket, item_key: &ItemKey) -> bool {
        self.crypto
            .unseal(vault_key.private_key(), packet, SealContext::ItemKey)
            .and_then(|seed| PrivateKey::from_slice(seed.as_bytes()))
            .map(|private| &private == item_key.private_key())
            .unwrap_or(false)
    }
}

fn check_rotation(vault_key: &VaultKey, item_key: &ItemKey) -> Result<()> {
    if !vault_key.is_active {
        return Err(Error::InvalidInput(format!(
            "Vault key of rotation {} is not active",
            vault_key.rotation_id
        )));
    }
    if vault_key.rotation_id != item_key.rotation_id {
        return Err(Error::InvalidInput(format!(
            "Item key of rotation {} does not match vault key of rotation {}",
            item_key.rotation_id, vault_key.rotation_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::content::{LoginContent, NoteContent};
    use crate::resolver::KeyResolver;
    use crate::rotation::{KeyRotation, RotationBundle, VaultMember};
    use keyward_common::{AddressId, ShareId};
    use keyward_crypto::{DefaultCryptoProvider, KeyPair};
    use keyward_remote::{ItemTransport, MemoryKeyStore, MemoryServer};

    fn address(id: &str) -> UserAddress {
        UserAddress::new(
            AddressId::new(id).unwrap(),
            format!("{}@example.com", id),
            KeyPair::generate(),
        )
    }

    fn builder() -> ItemRequestBuilder {
        ItemRequestBuilder::new(Arc::new(DefaultCryptoProvider))
    }

    fn bundle_for(alice: &UserAddress) -> RotationBundle {
        KeyRotation::new(Arc::new(DefaultCryptoProvider))
            .create_vault(alice, &[VaultMember::from(alice)])
            .unwrap()
    }

    async fn server_for(share: &ShareId, bundle: &RotationBundle) -> Arc<MemoryServer> {
        let server = Arc::new(MemoryServer::new());
        server
            .publish_rotation(
                share,
                bundle.vault_key_records.clone(),
                bundle.item_key_record.clone(),
            )
            .await;
        server
    }

    fn login() -> ItemContent {
        LoginContent::new("alice", "s3cr3t").into()
    }

    #[test]
    fn test_create_carries_two_valid_signatures() {
        let alice = address("alice");
        let bundle = bundle_for(&alice);
        let crypto = DefaultCryptoProvider;

        let request = builder()
            .create(&bundle.vault_key, &bundle.item_key, &alice, &login(), None)
            .unwrap();
        let message = request
            .encrypted_content()
            .signed_message(&request.rotation_id);

        assert!(crypto.verify(
            alice.public_key(),
            SignatureContext::ItemContentByUser,
            &message,
            &request.user_signature
        ));
        assert!(crypto.verify(
            bundle.item_key.public_key(),
            SignatureContext::ItemContentByItemKey,
            &message,
            &request.item_key_signature
        ));
        assert!(crypto.verify(
            alice.public_key(),
            SignatureContext::ItemKeyPacket,
            &item_key_packet_message(&request.rotation_id, &request.vault_key_packet),
            &request.vault_key_packet_signature
        ));
        assert_eq!(request.rotation_id, bundle.vault_key.rotation_id);
    }

    #[test]
    fn test_create_seals_item_key_to_vault_key() {
        let alice = address("alice");
        let bundle = bundle_for(&alice);
        let builder = builder();

        let request = builder
            .create(
                &bundle.vault_key,
                &bundle.item_key,
                &alice,
                &login(),
                Some("com.example.app"),
            )
            .unwrap();

        assert!(builder.packet_carries(
            &bundle.vault_key,
            &request.vault_key_packet,
            &bundle.item_key
        ));
        assert_eq!(request.package_name.as_deref(), Some("com.example.app"));
        assert_eq!(
            builder
                .codec()
                .decode(&request.encrypted_content(), &bundle.item_key)
                .unwrap(),
            login()
        );
    }

    #[test]
    fn test_inactive_vault_key_rejected() {
        let alice = address("alice");
        let mut bundle = bundle_for(&alice);
        bundle.vault_key.is_active = false;

        let result = builder().create(&bundle.vault_key, &bundle.item_key, &alice, &login(), None);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_mismatched_rotation_rejected() {
        let alice = address("alice");
        let first = bundle_for(&alice);
        let second = bundle_for(&alice);

        let result = builder().create(&first.vault_key, &second.item_key, &alice, &login(), None);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_update_reuses_packet_and_carries_revision() {
        let alice = address("alice");
        let bundle = bundle_for(&alice);
        let builder = builder();
        let created = builder
            .create(&bundle.vault_key, &bundle.item_key, &alice, &login(), None)
            .unwrap();

        let update = builder
            .create_update_request(
                &bundle.vault_key,
                &bundle.item_key,
                &created.vault_key_packet,
                &alice,
                &NoteContent::new("moved", "to a note").into(),
                Revision(3),
            )
            .unwrap();

        assert_eq!(update.last_revision, Revision(3));
        assert_eq!(update.vault_key_packet, created.vault_key_packet);
        assert_ne!(update.content, created.content);
    }

    #[test]
    fn test_update_with_foreign_packet_rejected() {
        let alice = address("alice");
        let bundle = bundle_for(&alice);
        let other = bundle_for(&alice);
        let foreign = builder()
            .create(&other.vault_key, &other.item_key, &alice, &login(), None)
            .unwrap();

        let result = builder().create_update_request(
            &bundle.vault_key,
            &bundle.item_key,
            &foreign.vault_key_packet,
            &alice,
            &login(),
            Revision::INITIAL,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_stored_item_verifies_and_opens() {
        let alice = address("alice");
        let share = ShareId::new("share-1").unwrap();
        let bundle = bundle_for(&alice);
        let server = server_for(&share, &bundle).await;
        let builder = builder();

        let request = builder
            .create(&bundle.vault_key, &bundle.item_key, &alice, &login(), None)
            .unwrap();
        let stored = server.create_item(&share, request).await.unwrap();

        let (verified, content) = builder
            .open_item(&stored, &bundle.vault_key, &bundle.item_key, &[*alice.public_key()])
            .unwrap();
        assert_eq!(verified.revision(), Revision::INITIAL);
        assert_eq!(verified.rotation_id(), &bundle.vault_key.rotation_id);
        assert_eq!(content, login());
    }

    #[tokio::test]
    async fn test_tampered_stored_item_rejected() {
        let alice = address("alice");
        let share = ShareId::new("share-1").unwrap();
        let bundle = bundle_for(&alice);
        let server = server_for(&share, &bundle).await;
        let builder = builder();

        let request = builder
            .create(&bundle.vault_key, &bundle.item_key, &alice, &login(), None)
            .unwrap();
        let stored = server.create_item(&share, request).await.unwrap();
        let authors = [*alice.public_key()];

        let mut tampered = stored.clone();
        tampered.content[40] ^= 0x01;
        assert_eq!(
            builder
                .verify_item(&tampered, &bundle.vault_key, &bundle.item_key, &authors)
                .unwrap_err(),
            Error::InvalidSignature(SignatureFailure::UserSignature)
        );

        let mut swapped = stored.clone();
        swapped.item_key_signature = stored.user_signature;
        assert_eq!(
            builder
                .verify_item(&swapped, &bundle.vault_key, &bundle.item_key, &authors)
                .unwrap_err(),
            Error::InvalidSignature(SignatureFailure::ItemKeySignature)
        );

        let stranger = address("mallory");
        assert_eq!(
            builder
                .verify_item(
                    &stored,
                    &bundle.vault_key,
                    &bundle.item_key,
                    &[*stranger.public_key()]
                )
                .unwrap_err(),
            Error::InvalidSignature(SignatureFailure::UserSignature)
        );
    }

    #[tokio::test]
    async fn test_content_moved_to_another_rotation_rejected() {
        let alice = address("alice");
        let share = ShareId::new("share-1").unwrap();
        let first = bundle_for(&alice);
        let second = KeyRotation::new(Arc::new(DefaultCryptoProvider))
            .rotate(&first.vault_key, &alice, &[VaultMember::from(&alice)])
            .unwrap();
        let server = server_for(&share, &first).await;
        let builder = builder();

        let request = builder
            .create(&first.vault_key, &first.item_key, &alice, &login(), None)
            .unwrap();
        let mut moved = server.create_item(&share, request).await.unwrap();
        moved.rotation_id = second.vault_key.rotation_id.clone();

        // The author's signature covers the rotation, so it fails before the item key check
        assert_eq!(
            builder
                .verify_item(
                    &moved,
                    &second.vault_key,
                    &second.item_key,
                    &[*alice.public_key()]
                )
                .unwrap_err(),
            Error::InvalidSignature(SignatureFailure::UserSignature)
        );
    }

    #[tokio::test]
    async fn test_concurrent_updates_from_same_revision() {
        let alice = address("alice");
        let share = ShareId::new("share-1").unwrap();
        let bundle = bundle_for(&alice);
        let server = server_for(&share, &bundle).await;
        let builder = builder();

        let created = builder
            .create(&bundle.vault_key, &bundle.item_key, &alice, &login(), None)
            .unwrap();
        let stored = server.create_item(&share, created).await.unwrap();

        let update = |password: &str| {
            builder
                .create_update_request(
                    &bundle.vault_key,
                    &bundle.item_key,
                    &stored.vault_key_packet,
                    &alice,
                    &LoginContent::new("alice", password).into(),
                    stored.revision,
                )
                .unwrap()
        };
        let (a, b) = tokio::join!(
            server.update_item(&share, &stored.item_id, update("first")),
            server.update_item(&share, &stored.item_id, update("second")),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(Error::RevisionConflict { .. })))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_items_stay_readable_after_rotation() {
        let alice = address("alice");
        let share = ShareId::new("share-1").unwrap();
        let first = bundle_for(&alice);
        let server = server_for(&share, &first).await;
        let builder = builder();

        let request = builder
            .create(&first.vault_key, &first.item_key, &alice, &login(), None)
            .unwrap();
        let old_item = server.create_item(&share, request).await.unwrap();

        let second = KeyRotation::new(Arc::new(DefaultCryptoProvider))
            .rotate(&first.vault_key, &alice, &[VaultMember::from(&alice)])
            .unwrap();
        server
            .publish_rotation(
                &share,
                second.vault_key_records.clone(),
                second.item_key_record.clone(),
            )
            .await;

        let resolver = KeyResolver::new(
            Arc::new(DefaultCryptoProvider),
            server.clone(),
            Arc::new(MemoryKeyStore::new()),
            ResolverConfig::default(),
        );
        let signer = alice.public_key();

        let (latest_vault, latest_item) = resolver
            .get_latest_vault_item_key(&alice, &share, signer)
            .await
            .unwrap();
        assert_eq!(latest_vault.rotation_id, second.vault_key.rotation_id);

        let vault_key = resolver
            .get_vault_key_by_id(&alice, &share, signer, &old_item.rotation_id)
            .await
            .unwrap();
        let item_key = resolver
            .get_item_key_by_id(&alice, &share, signer, &old_item.rotation_id)
            .await
            .unwrap();
        let (_, content) = builder
            .open_item(&old_item, &vault_key, &item_key, &[*signer])
            .unwrap();
        assert_eq!(content, login());

        let note: ItemContent = NoteContent::new("After", "rotation").into();
        let request = builder
            .create(&latest_vault, &latest_item, &alice, &note, None)
            .unwrap();
        let new_item = server.create_item(&share, request).await.unwrap();
        assert_ne!(new_item.rotation_id, old_item.rotation_id);
        assert_eq!(server.item_count(&share).await, 2);
    }
}
