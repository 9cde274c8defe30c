//! Sealed key packets.
//!
//! A packet hands a secret (usually private key material) to the holder of a
//! public key. The sender performs an ephemeral X25519 exchange with the
//! recipient, derives a one-time key with BLAKE2b and encrypts with
//! XChaCha20-Poly1305.
//!
//! Packet layout: `version (1) || ephemeral public key (32) || nonce || ciphertext || tag`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

use crate::aead;
use crate::keys::{PrivateKey, PublicKey, KEY_LENGTH};
use keyward_common::{Error, Result, SensitiveBytes};

/// Current packet format version.
pub const PACKET_VERSION: u8 = 1;

const EPHEMERAL_OFFSET: usize = 1;
const CIPHERTEXT_OFFSET: usize = EPHEMERAL_OFFSET + 32;

/// What a packet carries. Bound into both the derived key and the
/// associated data, so a packet only opens under the context it was sealed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealContext {
    /// A vault private key sealed to a member address.
    VaultKey,
    /// An item private key sealed to a vault key.
    ItemKey,
    /// Item content sealed to an item key.
    ItemContent,
    /// Vault metadata sealed to a vault key.
    ShareContent,
    /// A share content signature sealed to a vault key.
    ShareSignature,
}

impl SealContext {
    /// Domain separation label.
    pub fn label(&self) -> &'static [u8] {
        match self {
            Self::VaultKey => b"keyward.seal.vault-key",
            Self::ItemKey => b"keyward.seal.item-key",
            Self::ItemContent => b"keyward.seal.item-content",
            Self::ShareContent => b"keyward.seal.share-content",
            Self::ShareSignature => b"keyward.seal.share-signature",
        }
    }
}

/// Sealed bytes addressed to one public key.
///
/// Serializes as a base64 string.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPacket(Vec<u8>);

impl KeyPacket {
    /// Wrap raw packet bytes received from a collaborator.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the raw packet bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Mutable access to the raw bytes.
    pub fn as_mut_bytes(&mut self) -> &mut Vec<u8> {
        &mut self.0
    }

    /// Consume into the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for KeyPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPacket({} bytes)", self.0.len())
    }
}

impl Serialize for KeyPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for KeyPacket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

fn packet_key(
    shared: &[u8; 32],
    ephemeral: &[u8; 32],
    recipient: &[u8; 32],
    context: SealContext,
) -> Zeroizing<[u8; KEY_LENGTH]> {
    use blake2::digest::consts::U32;
    use blake2::{Blake2b, Digest};

    let mut hasher = Blake2b::<U32>::new();
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    hasher.update(context.label());

    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    key.copy_from_slice(&hasher.finalize());
    key
}

/// Seal `plaintext` so that only the holder of `recipient`'s private key can open it.
///
/// # Errors
/// - Returns error if the recipient key is a low-order point
/// - Returns error if encryption fails
pub fn seal(recipient: &PublicKey, plaintext: &[u8], context: SealContext) -> Result<KeyPacket> {
    use rand::RngCore;

    let mut ephemeral_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut ephemeral_bytes);
    let ephemeral = x25519_dalek::StaticSecret::from(ephemeral_bytes);
    ephemeral_bytes.zeroize();

    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient.encryption_key());
    if !shared.was_contributory() {
        return Err(Error::Crypto("Recipient key is not contributory".to_string()));
    }

    let key = packet_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        &recipient.encryption,
        context,
    );
    let ciphertext = aead::encrypt(&key[..], plaintext, context.label())?;

    let mut packet = Vec::with_capacity(CIPHERTEXT_OFFSET + ciphertext.len());
    packet.push(PACKET_VERSION);
    packet.extend_from_slice(ephemeral_public.as_bytes());
    packet.extend_from_slice(&ciphertext);

    Ok(KeyPacket(packet))
}

/// Open a packet sealed to `key`'s public half.
///
/// # Errors
/// - Returns `DecryptionFailure` for a truncated packet, an unsupported
///   version, the wrong key, the wrong context or tampered bytes
pub fn unseal(key: &PrivateKey, packet: &KeyPacket, context: SealContext) -> Result<SensitiveBytes> {
    let bytes = packet.as_bytes();
    if bytes.len() < CIPHERTEXT_OFFSET + aead::NONCE_SIZE + aead::TAG_SIZE {
        return Err(Error::DecryptionFailure("Key packet too short".to_string()));
    }
    if bytes[0] != PACKET_VERSION {
        return Err(Error::DecryptionFailure(format!(
            "Unsupported key packet version: {}",
            bytes[0]
        )));
    }

    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(&bytes[EPHEMERAL_OFFSET..CIPHERTEXT_OFFSET]);

    let shared = key
        .encryption_secret()
        .diffie_hellman(&x25519_dalek::PublicKey::from(ephemeral));
    let recipient = key.public_key();

    let packet_key = packet_key(shared.as_bytes(), &ephemeral, &recipient.encryption, context);
    let plaintext = aead::decrypt(
        &packet_key[..],
        &bytes[CIPHERTEXT_OFFSET..],
        context.label(),
    )?;

    Ok(SensitiveBytes::new(plaintext))
}
