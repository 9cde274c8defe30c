//! Passphrase-locked private keys.
//!
//! The account subsystem stores address private keys encrypted under a key
//! derived from the address passphrase. They are unlocked once per session
//! before any vault key can be opened.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::aead;
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{PrivateKey, PublicKey, Salt};
use keyward_common::{Error, Result};

const LOCKED_KEY_AAD: &[u8] = b"keyward.locked-private-key.v1";

/// A private key encrypted under a passphrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedPrivateKey {
    /// Public half, kept in the clear so the key can be identified while locked.
    pub public: PublicKey,
    /// Salt for passphrase derivation.
    pub salt: Salt,
    /// KDF parameters.
    pub kdf_params: KdfParams,
    /// nonce || ciphertext || tag of the private key seed.
    pub ciphertext: Vec<u8>,
}

impl LockedPrivateKey {
    /// Lock a private key under a passphrase.
    ///
    /// # Errors
    /// - Passphrase empty
    /// - KDF failure
    pub fn lock(key: &PrivateKey, passphrase: &[u8], kdf_params: KdfParams) -> Result<Self> {
        let salt = Salt::generate();
        let lock_key = derive_key(passphrase, &salt, &kdf_params)?;
        let ciphertext = aead::encrypt(&lock_key[..], key.as_bytes(), LOCKED_KEY_AAD)?;

        Ok(Self {
            public: key.public_key(),
            salt,
            kdf_params,
            ciphertext,
        })
    }

    /// Unlock with the passphrase.
    ///
    /// # Errors
    /// - `DecryptionFailure` if the passphrase is wrong or the data is corrupted
    /// - `Integrity` if the unlocked key does not match the stored public key
    pub fn unlock(&self, passphrase: &[u8]) -> Result<PrivateKey> {
        let lock_key = derive_key(passphrase, &self.salt, &self.kdf_params)?;
        let seed = Zeroizing::new(aead::decrypt(&lock_key[..], &self.ciphertext, LOCKED_KEY_AAD)?);
        let key = PrivateKey::from_slice(&seed)?;

        if key.public_key() != self.public {
            return Err(Error::Integrity(
                "Unlocked key does not match its public key".to_string(),
            ));
        }
        Ok(key)
    }
}
