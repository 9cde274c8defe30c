//! Context-separated Ed25519 signatures.
//!
//! Every signature is computed over `label || 0x00 || message`, where the
//! label names the purpose. A signature made for one purpose never verifies
//! for another, even over identical bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::keys::{PrivateKey, PublicKey};
use keyward_common::{Error, Result};

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Purpose a signature is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureContext {
    /// Issuer over a vault key record delivered to a member.
    VaultKeyRecord,
    /// Vault key over an item key record of the same rotation.
    ItemKeyRecord,
    /// Author address over the item key packet of a write request.
    ItemKeyPacket,
    /// Author address over encoded item content.
    ItemContentByUser,
    /// Item key over encoded item content.
    ItemContentByItemKey,
    /// Invitee accepting a share grant.
    ShareAcceptance,
    /// Inviter issuing a share grant.
    ShareInviterAcceptance,
    /// Address over share content.
    ShareContentByAddress,
    /// Vault key over share content.
    ShareContentByVault,
}

impl SignatureContext {
    /// Domain separation label.
    pub fn label(&self) -> &'static [u8] {
        match self {
            Self::VaultKeyRecord => b"keyward.sign.vault-key-record",
            Self::ItemKeyRecord => b"keyward.sign.item-key-record",
            Self::ItemKeyPacket => b"keyward.sign.item-key-packet",
            Self::ItemContentByUser => b"keyward.sign.item-content.user",
            Self::ItemContentByItemKey => b"keyward.sign.item-content.item-key",
            Self::ShareAcceptance => b"keyward.sign.share.acceptance",
            Self::ShareInviterAcceptance => b"keyward.sign.share.inviter-acceptance",
            Self::ShareContentByAddress => b"keyward.sign.share.content.address",
            Self::ShareContentByVault => b"keyward.sign.share.content.vault",
        }
    }

    fn framed(&self, message: &[u8]) -> Vec<u8> {
        let label = self.label();
        let mut framed = Vec::with_capacity(label.len() + 1 + message.len());
        framed.extend_from_slice(label);
        framed.push(0);
        framed.extend_from_slice(message);
        framed
    }
}

/// A detached Ed25519 signature.
///
/// Serializes as a base64 string.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    /// Parse signature bytes received from a collaborator.
    ///
    /// # Errors
    /// - Returns error if the length is not SIGNATURE_LENGTH
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; SIGNATURE_LENGTH] = bytes.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "Invalid signature length: expected {}, got {}",
                SIGNATURE_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    /// Get the signature bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    /// Copy into an owned buffer, as carried on the wire.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", STANDARD.encode(&self.0[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Sign `message` for `context` with `key`.
pub fn sign(key: &PrivateKey, context: SignatureContext, message: &[u8]) -> Signature {
    let signature = key.signing_key().sign(&context.framed(message));
    Signature(signature.to_bytes())
}

/// Check a signature made by `key` over `message` for `context`.
pub fn verify(
    key: &PublicKey,
    context: SignatureContext,
    message: &[u8],
    signature: &Signature,
) -> bool {
    let Some(verifying_key) = key.verifying_key() else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key
        .verify(&context.framed(message), &signature)
        .is_ok()
}
