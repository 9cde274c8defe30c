//! Opened key material of the vault hierarchy.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

use keyward_common::{AddressId, Result, RotationId};
use keyward_crypto::{KeyPair, LockedPrivateKey, PrivateKey, PublicKey};

/// One rotation of a vault's key, opened with the member's address key.
#[derive(Clone, PartialEq, Eq)]
pub struct VaultKey {
    pub rotation_id: RotationId,
    pub rotation: u64,
    pub key_pair: KeyPair,
    pub is_primary: bool,
    pub is_active: bool,
    pub create_time: DateTime<Utc>,
}

impl VaultKey {
    /// Public half of the vault key.
    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public()
    }

    /// Private half of the vault key.
    pub fn private_key(&self) -> &PrivateKey {
        self.key_pair.private()
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey")
            .field("rotation_id", &self.rotation_id)
            .field("rotation", &self.rotation)
            .field("public", self.public_key())
            .field("is_primary", &self.is_primary)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// The item key of one rotation, opened with the vault key of that rotation.
#[derive(Clone, PartialEq, Eq)]
pub struct ItemKey {
    pub rotation_id: RotationId,
    pub key_pair: KeyPair,
}

impl ItemKey {
    /// Public half of the item key.
    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public()
    }

    /// Private half of the item key.
    pub fn private_key(&self) -> &PrivateKey {
        self.key_pair.private()
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemKey")
            .field("rotation_id", &self.rotation_id)
            .field("public", self.public_key())
            .finish_non_exhaustive()
    }
}

/// Every opened rotation of one share, as seen by one member address.
///
/// Built once per refresh and never mutated afterwards; the cache swaps in
/// a new set instead.
#[derive(Debug, Clone, Default)]
pub struct ShareKeySet {
    vault_keys: Vec<VaultKey>,
    item_keys: HashMap<RotationId, ItemKey>,
}

impl ShareKeySet {
    /// Build a set. Vault keys are ordered oldest to newest.
    pub fn new(mut vault_keys: Vec<VaultKey>, item_keys: Vec<ItemKey>) -> Self {
        vault_keys.sort_by_key(|key| key.rotation);
        let item_keys = item_keys
            .into_iter()
            .map(|key| (key.rotation_id.clone(), key))
            .collect();
        Self {
            vault_keys,
            item_keys,
        }
    }

    /// All vault keys, oldest first.
    pub fn vault_keys(&self) -> &[VaultKey] {
        &self.vault_keys
    }

    /// Look up a vault key by rotation.
    pub fn vault_key(&self, rotation_id: &RotationId) -> Option<&VaultKey> {
        self.vault_keys
            .iter()
            .find(|key| &key.rotation_id == rotation_id)
    }

    /// Look up an item key by rotation.
    pub fn item_key(&self, rotation_id: &RotationId) -> Option<&ItemKey> {
        self.item_keys.get(rotation_id)
    }

    /// Number of item keys in the set.
    pub fn item_key_count(&self) -> usize {
        self.item_keys.len()
    }

    /// The vault key new content is written with.
    ///
    /// The primary key if it is active, otherwise the highest active rotation.
    pub fn latest_vault_key(&self) -> Option<&VaultKey> {
        let active = || self.vault_keys.iter().filter(|key| key.is_active);
        active()
            .filter(|key| key.is_primary)
            .max_by_key(|key| key.rotation)
            .or_else(|| active().max_by_key(|key| key.rotation))
    }

    /// The latest vault key together with its item key.
    pub fn latest_pair(&self) -> Option<(&VaultKey, &ItemKey)> {
        let vault_key = self.latest_vault_key()?;
        let item_key = self.item_key(&vault_key.rotation_id)?;
        Some((vault_key, item_key))
    }
}

/// An unlocked address of the current account.
#[derive(Clone)]
pub struct UserAddress {
    pub address_id: AddressId,
    pub email: String,
    key_pair: KeyPair,
}

impl UserAddress {
    /// Wrap an already unlocked key pair.
    pub fn new(address_id: AddressId, email: impl Into<String>, key_pair: KeyPair) -> Self {
        Self {
            address_id,
            email: email.into(),
            key_pair,
        }
    }

    /// Unlock a passphrase-protected address key.
    ///
    /// # Errors
    /// - `DecryptionFailure` if the passphrase is wrong
    pub fn unlock(
        address_id: AddressId,
        email: impl Into<String>,
        locked: &LockedPrivateKey,
        passphrase: &[u8],
    ) -> Result<Self> {
        let private = locked.unlock(passphrase)?;
        Ok(Self::new(address_id, email, KeyPair::from_private(private)))
    }

    /// Public address key, also used to verify the address's signatures.
    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public()
    }

    /// Private address key.
    pub fn private_key(&self) -> &PrivateKey {
        self.key_pair.private()
    }
}

impl fmt::Debug for UserAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAddress")
            .field("address_id", &self.address_id)
            .field("email", &self.email)
            .field("public", self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_crypto::KdfParams;

    fn vault_key(rotation: u64, is_primary: bool, is_active: bool) -> VaultKey {
        VaultKey {
            rotation_id: RotationId::new(format!("r{}", rotation)).unwrap(),
            rotation,
            key_pair: KeyPair::generate(),
            is_primary,
            is_active,
            create_time: Utc::now(),
        }
    }

    fn item_key(rotation: u64) -> ItemKey {
        ItemKey {
            rotation_id: RotationId::new(format!("r{}", rotation)).unwrap(),
            key_pair: KeyPair::generate(),
        }
    }

    #[test]
    fn test_vault_keys_sorted_oldest_first() {
        let set = ShareKeySet::new(
            vec![vault_key(3, true, true), vault_key(1, false, true), vault_key(2, false, true)],
            Vec::new(),
        );

        let rotations: Vec<u64> = set.vault_keys().iter().map(|k| k.rotation).collect();
        assert_eq!(rotations, vec![1, 2, 3]);
    }

    #[test]
    fn test_latest_prefers_primary() {
        let set = ShareKeySet::new(
            vec![vault_key(1, true, true), vault_key(2, false, true)],
            vec![item_key(1), item_key(2)],
        );

        let (vault, item) = set.latest_pair().unwrap();
        assert_eq!(vault.rotation, 1);
        assert_eq!(item.rotation_id, vault.rotation_id);
    }

    #[test]
    fn test_latest_falls_back_to_highest_active() {
        let set = ShareKeySet::new(
            vec![
                vault_key(1, false, true),
                vault_key(2, false, true),
                vault_key(3, true, false),
            ],
            Vec::new(),
        );

        assert_eq!(set.latest_vault_key().unwrap().rotation, 2);
    }

    #[test]
    fn test_no_active_key() {
        let set = ShareKeySet::new(vec![vault_key(1, true, false)], vec![item_key(1)]);
        assert!(set.latest_vault_key().is_none());
        assert!(set.latest_pair().is_none());
    }

    #[test]
    fn test_lookup_by_rotation() {
        let set = ShareKeySet::new(vec![vault_key(1, true, true)], vec![item_key(1)]);
        let r1 = RotationId::new("r1").unwrap();
        let r9 = RotationId::new("r9").unwrap();

        assert!(set.vault_key(&r1).is_some());
        assert!(set.item_key(&r1).is_some());
        assert!(set.vault_key(&r9).is_none());
        assert_eq!(set.item_key_count(), 1);
    }

    #[test]
    fn test_unlock_address() {
        let pair = KeyPair::generate();
        let locked =
            LockedPrivateKey::lock(pair.private(), b"passphrase", KdfParams::insecure_fast())
                .unwrap();
        let address_id = AddressId::new("addr-1").unwrap();

        let address =
            UserAddress::unlock(address_id.clone(), "alice@example.com", &locked, b"passphrase")
                .unwrap();
        assert_eq!(address.public_key(), pair.public());

        assert!(UserAddress::unlock(address_id, "alice@example.com", &locked, b"nope").is_err());
    }

    #[test]
    fn test_debug_hides_private_keys() {
        let key = vault_key(1, true, true);
        let debug = format!("{:?}", key);
        assert!(debug.contains("rotation: 1"));
        assert!(!debug.contains("seed"));
    }
}
