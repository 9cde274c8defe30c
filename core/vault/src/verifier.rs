//! Verification of inbound shares.
//!
//! A share response is trusted only after every check in
//! [`ShareCheck::ORDER`] passes. Checks run in order and stop at the first
//! failure, which is reported with its own [`SignatureFailure`].

use std::sync::Arc;
use tracing::{debug, warn};

use crate::keys::VaultKey;
use keyward_common::{
    Error, Result, RotationId, SensitiveBytes, ShareId, SignatureFailure, VaultId,
};
use keyward_crypto::{
    CryptoProvider, KeyPacket, PublicKey, SealContext, Signature, SignatureContext,
};
use keyward_remote::EncryptedShareResponse;

/// Canonical bytes of a share grant: `shareId || 0x00 || vaultId`.
pub fn share_grant_message(share_id: &ShareId, vault_id: &VaultId) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(share_id.as_str().as_bytes());
    message.push(0);
    message.extend_from_slice(vault_id.as_str().as_bytes());
    message
}

/// Canonical bytes of share content:
/// `rotationId || 0x00 || format version (u32, big endian) || content`.
pub fn share_content_message(
    rotation_id: &RotationId,
    format_version: u32,
    content: &KeyPacket,
) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(rotation_id.as_str().as_bytes());
    message.push(0);
    message.extend_from_slice(&format_version.to_be_bytes());
    message.extend_from_slice(content.as_bytes());
    message
}

/// Keys a share response is checked against.
#[derive(Debug, Clone, Default)]
pub struct ShareVerificationKeys {
    /// Public keys of the current user's addresses.
    pub address_keys: Vec<PublicKey>,
    /// Known public keys of the inviter.
    pub inviter_keys: Vec<PublicKey>,
    /// Address keys allowed to sign share content.
    pub content_signature_keys: Vec<PublicKey>,
    /// Candidate vault keys for the share content.
    pub vault_keys: Vec<VaultKey>,
}

/// One step of share verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareCheck {
    /// The current user accepted the grant.
    Acceptance,
    /// The claimed inviter issued the grant.
    InviterAcceptance,
    /// The vault metadata was produced by a vault key and a recognized address.
    ContentSignatures,
}

impl ShareCheck {
    /// The order checks run in.
    pub const ORDER: [ShareCheck; 3] = [
        ShareCheck::Acceptance,
        ShareCheck::InviterAcceptance,
        ShareCheck::ContentSignatures,
    ];
}

/// A share response that passed every check.
///
/// Only [`ShareVerifier::verify`] creates one.
#[derive(Debug, Clone)]
pub struct VerifiedShare {
    response: EncryptedShareResponse,
    content_key: Option<VaultKey>,
}

impl VerifiedShare {
    pub fn share_id(&self) -> &ShareId {
        &self.response.share_id
    }

    pub fn vault_id(&self) -> &VaultId {
        &self.response.vault_id
    }

    /// The verified response.
    pub fn response(&self) -> &EncryptedShareResponse {
        &self.response
    }

    /// Whether the share carries vault metadata.
    pub fn has_content(&self) -> bool {
        self.content_key.is_some()
    }
}

/// Runs the share checks.
pub struct ShareVerifier {
    crypto: Arc<dyn CryptoProvider>,
}

impl ShareVerifier {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { crypto }
    }

    /// Verify a share response.
    ///
    /// # Errors
    /// - `InvalidSignature` naming the first check that failed
    pub fn verify(
        &self,
        response: &EncryptedShareResponse,
        keys: &ShareVerificationKeys,
    ) -> Result<VerifiedShare> {
        let mut content_key = None;
        for check in ShareCheck::ORDER {
            let outcome = match check {
                ShareCheck::Acceptance => self.check_acceptance(response, keys),
                ShareCheck::InviterAcceptance => self.check_inviter(response, keys),
                ShareCheck::ContentSignatures => self
                    .check_content(response, keys)
                    .map(|key| content_key = key),
            };
            if let Err(failure) = outcome {
                warn!(
                    share = %response.share_id,
                    check = ?check,
                    reason = %failure,
                    "Rejected share"
                );
                return Err(Error::InvalidSignature(failure));
            }
            debug!(share = %response.share_id, check = ?check, "Share check passed");
        }

        Ok(VerifiedShare {
            response: response.clone(),
            content_key,
        })
    }

    /// Open the vault metadata of a verified share.
    ///
    /// Returns `None` for a share without content.
    ///
    /// # Errors
    /// - `DecryptionFailure` if the content does not open with the vault key
    ///   that signed it
    pub fn open_content(&self, share: &VerifiedShare) -> Result<Option<SensitiveBytes>> {
        let (Some(vault_key), Some(content)) = (&share.content_key, &share.response.content) else {
            return Ok(None);
        };
        self.crypto
            .unseal(vault_key.private_key(), content, SealContext::ShareContent)
            .map(Some)
    }

    fn check_acceptance(
        &self,
        response: &EncryptedShareResponse,
        keys: &ShareVerificationKeys,
    ) -> std::result::Result<(), SignatureFailure> {
        let message = share_grant_message(&response.share_id, &response.vault_id);
        if self.crypto.verify_any(
            &keys.address_keys,
            SignatureContext::ShareAcceptance,
            &message,
            &response.acceptance_signature,
        ) {
            Ok(())
        } else {
            Err(SignatureFailure::Acceptance)
        }
    }

    fn check_inviter(
        &self,
        response: &EncryptedShareResponse,
        keys: &ShareVerificationKeys,
    ) -> std::result::Result<(), SignatureFailure> {
        if !keys.inviter_keys.contains(&response.signing_key) {
            return Err(SignatureFailure::UntrustedInviterKey);
        }
        let message = share_grant_message(&response.share_id, &response.vault_id);
        if self.crypto.verify(
            &response.signing_key,
            SignatureContext::ShareInviterAcceptance,
            &message,
            &response.inviter_acceptance_signature,
        ) {
            Ok(())
        } else {
            Err(SignatureFailure::InviterAcceptance)
        }
    }

    /// Returns the vault key whose signature verified, if there is content.
    fn check_content(
        &self,
        response: &EncryptedShareResponse,
        keys: &ShareVerificationKeys,
    ) -> std::result::Result<Option<VaultKey>, SignatureFailure> {
        let Some(content) = &response.content else {
            return Ok(None);
        };
        let (
            Some(rotation_id),
            Some(format_version),
            Some(address_signature),
            Some(vault_signature),
        ) = (
            &response.content_rotation_id,
            response.content_format_version,
            &response.content_encrypted_address_signature,
            &response.content_encrypted_vault_signature,
        )
        else {
            return Err(SignatureFailure::MissingContentSignature);
        };

        let message = share_content_message(rotation_id, format_version, content);
        let candidates = candidates(&keys.vault_keys, rotation_id);

        let address_valid = candidates.iter().any(|vault_key| {
            self.open_signature(vault_key, address_signature)
                .is_some_and(|signature| {
                    self.crypto.verify_any(
                        &keys.content_signature_keys,
                        SignatureContext::ShareContentByAddress,
                        &message,
                        &signature,
                    )
                })
        });
        if !address_valid {
            return Err(SignatureFailure::ContentAddressSignature);
        }

        candidates
            .into_iter()
            .find(|vault_key| {
                self.open_signature(vault_key, vault_signature)
                    .is_some_and(|signature| {
                        self.crypto.verify(
                            vault_key.public_key(),
                            SignatureContext::ShareContentByVault,
                            &message,
                            &signature,
                        )
                    })
            })
            .map(|vault_key| Some(vault_key.clone()))
            .ok_or(SignatureFailure::ContentVaultSignature)
    }

    fn open_signature(&self, vault_key: &VaultKey, packet: &KeyPacket) -> Option<Signature> {
        let bytes = self
            .crypto
            .unseal(vault_key.private_key(), packet, SealContext::ShareSignature)
            .ok()?;
        Signature::from_slice(bytes.as_bytes()).ok()
    }
}

/// Candidate vault keys, the one of the content's rotation first.
fn candidates<'a>(vault_keys: &'a [VaultKey], rotation_id: &RotationId) -> Vec<&'a VaultKey> {
    let mut candidates: Vec<&VaultKey> = vault_keys.iter().collect();
    candidates.sort_by_key(|key| &key.rotation_id != rotation_id);
    candidates
}
