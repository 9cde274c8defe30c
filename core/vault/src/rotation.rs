//! Issuing vault key rotations.
//!
//! A rotation is a new, immutable generation of a vault's key material: a
//! fresh vault key sealed to every member address and a fresh item key
//! sealed to that vault key. Older rotations are never touched, so content
//! written under them stays readable.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::keys::{ItemKey, UserAddress, VaultKey};
use keyward_common::{AddressId, Error, Result, RotationId};
use keyward_crypto::{CryptoProvider, PublicKey, SealContext, SignatureContext};
use keyward_remote::wire::{item_key_packet_message, vault_key_record_message};
use keyward_remote::{EncryptedItemKey, EncryptedVaultKey};

/// A member address that receives a copy of the vault key.
#[derive(Debug, Clone)]
pub struct VaultMember {
    pub address_id: AddressId,
    pub public_key: PublicKey,
}

impl VaultMember {
    pub fn new(address_id: AddressId, public_key: PublicKey) -> Self {
        Self {
            address_id,
            public_key,
        }
    }
}

impl From<&UserAddress> for VaultMember {
    fn from(address: &UserAddress) -> Self {
        Self::new(address.address_id.clone(), *address.public_key())
    }
}

/// Everything one rotation produces.
#[derive(Debug, Clone)]
pub struct RotationBundle {
    /// The opened vault key, as the issuer holds it.
    pub vault_key: VaultKey,
    /// The opened item key, as the issuer holds it.
    pub item_key: ItemKey,
    /// One sealed, signed copy of the vault key per member.
    pub vault_key_records: Vec<(AddressId, EncryptedVaultKey)>,
    /// The item key sealed to the vault key and signed by it.
    pub item_key_record: EncryptedItemKey,
}

/// Issues new rotations.
pub struct KeyRotation {
    crypto: Arc<dyn CryptoProvider>,
}

impl KeyRotation {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { crypto }
    }

    /// Issue the first rotation of a new vault.
    ///
    /// # Errors
    /// - `InvalidInput` if `members` is empty
    pub fn create_vault(
        &self,
        issuer: &UserAddress,
        members: &[VaultMember],
    ) -> Result<RotationBundle> {
        self.issue(1, issuer, members)
    }

    /// Issue the rotation that follows `current`.
    ///
    /// The new rotation is primary; marking `current` non-primary is the
    /// server's job when the bundle is published.
    ///
    /// # Errors
    /// - `InvalidInput` if `members` is empty
    pub fn rotate(
        &self,
        current: &VaultKey,
        issuer: &UserAddress,
        members: &[VaultMember],
    ) -> Result<RotationBundle> {
        self.issue(current.rotation + 1, issuer, members)
    }

    fn issue(
        &self,
        rotation: u64,
        issuer: &UserAddress,
        members: &[VaultMember],
    ) -> Result<RotationBundle> {
        if members.is_empty() {
            return Err(Error::InvalidInput(
                "A rotation needs at least one member".to_string(),
            ));
        }

        let rotation_id = RotationId::new(Uuid::new_v4().to_string())?;
        let create_time = Utc::now();
        let vault_pair = self.crypto.generate_key_pair();
        let item_pair = self.crypto.generate_key_pair();

        let mut vault_key_records = Vec::with_capacity(members.len());
        for member in members {
            let key_packet = self.crypto.seal(
                &member.public_key,
                vault_pair.private().as_bytes(),
                SealContext::VaultKey,
            )?;
            let key_packet_signature = self.crypto.sign(
                issuer.private_key(),
                SignatureContext::VaultKeyRecord,
                &vault_key_record_message(&rotation_id, rotation, &key_packet),
            );
            vault_key_records.push((
                member.address_id.clone(),
                EncryptedVaultKey {
                    rotation_id: rotation_id.clone(),
                    rotation,
                    key_packet,
                    key_packet_signature,
                    is_primary: true,
                    is_active: true,
                    create_time,
                },
            ));
        }

        let key_packet = self.crypto.seal(
            vault_pair.public(),
            item_pair.private().as_bytes(),
            SealContext::ItemKey,
        )?;
        let key_packet_signature = self.crypto.sign(
            vault_pair.private(),
            SignatureContext::ItemKeyRecord,
            &item_key_packet_message(&rotation_id, &key_packet),
        );
        let item_key_record = EncryptedItemKey {
            rotation_id: rotation_id.clone(),
            key_packet,
            key_packet_signature,
        };

        info!(
            rotation = rotation,
            rotation_id = %rotation_id,
            members = members.len(),
            "Issued rotation"
        );

        Ok(RotationBundle {
            vault_key: VaultKey {
                rotation_id: rotation_id.clone(),
                rotation,
                key_pair: vault_pair,
                is_primary: true,
                is_active: true,
                create_time,
            },
            item_key: ItemKey {
                rotation_id,
                key_pair: item_pair,
            },
            vault_key_records,
            item_key_record,
        })
    }
}
