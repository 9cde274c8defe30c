//! Accepting and issuing shares.
//!
//! [`ShareIngestor`] is the only path from a share response to local state:
//! a response is verified first and persisted only when every check passes.
//! [`ShareIssuer`] produces signed responses the way an inviting client does.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::codec::CURRENT_FORMAT_VERSION;
use crate::keys::{UserAddress, VaultKey};
use crate::verifier::{
    share_content_message, share_grant_message, ShareVerificationKeys, ShareVerifier,
    VerifiedShare,
};
use keyward_common::{Result, ShareId, VaultId};
use keyward_crypto::{CryptoProvider, SealContext, SignatureContext};
use keyward_remote::EncryptedShareResponse;

/// Persistence for accepted shares.
///
/// Only takes [`VerifiedShare`], so nothing unverified can be stored.
#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Store a verified share, replacing any previous copy.
    async fn store(&self, share: VerifiedShare) -> Result<()>;

    /// Get a stored share.
    async fn get(&self, share_id: &ShareId) -> Result<Option<VerifiedShare>>;
}

/// In-memory share store.
#[derive(Default)]
pub struct MemoryShareStore {
    shares: RwLock<HashMap<ShareId, VerifiedShare>>,
}

impl MemoryShareStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored shares.
    pub async fn len(&self) -> usize {
        self.shares.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shares.read().await.is_empty()
    }
}

#[async_trait]
impl ShareStore for MemoryShareStore {
    async fn store(&self, share: VerifiedShare) -> Result<()> {
        self.shares
            .write()
            .await
            .insert(share.share_id().clone(), share);
        Ok(())
    }

    async fn get(&self, share_id: &ShareId) -> Result<Option<VerifiedShare>> {
        Ok(self.shares.read().await.get(share_id).cloned())
    }
}

/// Verifies share responses and persists the ones that pass.
pub struct ShareIngestor {
    verifier: ShareVerifier,
    store: Arc<dyn ShareStore>,
}

impl ShareIngestor {
    pub fn new(crypto: Arc<dyn CryptoProvider>, store: Arc<dyn ShareStore>) -> Self {
        Self {
            verifier: ShareVerifier::new(crypto),
            store,
        }
    }

    pub fn verifier(&self) -> &ShareVerifier {
        &self.verifier
    }

    /// Verify a share response and persist it.
    ///
    /// # Errors
    /// - `InvalidSignature` if a check fails; nothing is stored
    /// - Store errors
    pub async fn ingest(
        &self,
        response: &EncryptedShareResponse,
        keys: &ShareVerificationKeys,
    ) -> Result<VerifiedShare> {
        let share = self.verifier.verify(response, keys)?;
        self.store.store(share.clone()).await?;
        info!(share = %share.share_id(), vault = %share.vault_id(), "Accepted share");
        Ok(share)
    }
}

/// Vault metadata to attach to a share.
#[derive(Debug, Clone, Copy)]
pub struct ShareContentInput<'a> {
    /// Vault key the content is sealed to and signed by.
    pub vault_key: &'a VaultKey,
    pub content: &'a [u8],
}

/// Issues signed share responses.
pub struct ShareIssuer {
    crypto: Arc<dyn CryptoProvider>,
}

impl ShareIssuer {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { crypto }
    }

    /// Build the response `invitee` receives for a grant from `inviter`.
    ///
    /// The content, if any, is signed by the inviter's address and by the
    /// vault key, and both signatures are sealed to the vault key.
    pub fn issue(
        &self,
        share_id: &ShareId,
        vault_id: &VaultId,
        inviter: &UserAddress,
        invitee: &UserAddress,
        content: Option<ShareContentInput<'_>>,
    ) -> Result<EncryptedShareResponse> {
        let grant = share_grant_message(share_id, vault_id);
        let mut response = EncryptedShareResponse {
            share_id: share_id.clone(),
            vault_id: vault_id.clone(),
            acceptance_signature: self.crypto.sign(
                invitee.private_key(),
                SignatureContext::ShareAcceptance,
                &grant,
            ),
            inviter_acceptance_signature: self.crypto.sign(
                inviter.private_key(),
                SignatureContext::ShareInviterAcceptance,
                &grant,
            ),
            signing_key: *inviter.public_key(),
            content: None,
            content_format_version: None,
            content_rotation_id: None,
            content_encrypted_address_signature: None,
            content_encrypted_vault_signature: None,
            content_signature_email: None,
            expiration_time: None,
            create_time: Utc::now(),
        };

        if let Some(input) = content {
            let vault_key = input.vault_key;
            let packet = self.crypto.seal(
                vault_key.public_key(),
                input.content,
                SealContext::ShareContent,
            )?;
            let message =
                share_content_message(&vault_key.rotation_id, CURRENT_FORMAT_VERSION, &packet);

            let by_address = self.crypto.sign(
                inviter.private_key(),
                SignatureContext::ShareContentByAddress,
                &message,
            );
            let by_vault = self.crypto.sign(
                vault_key.private_key(),
                SignatureContext::ShareContentByVault,
                &message,
            );

            response.content_encrypted_address_signature = Some(self.crypto.seal(
                vault_key.public_key(),
                by_address.as_bytes(),
                SealContext::ShareSignature,
            )?);
            response.content_encrypted_vault_signature = Some(self.crypto.seal(
                vault_key.public_key(),
                by_vault.as_bytes(),
                SealContext::ShareSignature,
            )?);
            response.content = Some(packet);
            response.content_format_version = Some(CURRENT_FORMAT_VERSION);
            response.content_rotation_id = Some(vault_key.rotation_id.clone());
            response.content_signature_email = Some(inviter.email.clone());
        }

        Ok(response)
    }
}
