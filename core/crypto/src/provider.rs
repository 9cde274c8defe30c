//! The cryptography capability the protocol is written against.

use crate::keys::{KeyPair, PrivateKey, PublicKey};
use crate::seal::{self, KeyPacket, SealContext};
use crate::sign::{self, Signature, SignatureContext};
use keyward_common::{Result, SensitiveBytes};

/// Asymmetric seal/unseal and sign/verify.
///
/// Implementations must be safe to share across tasks. Calls are CPU-bound
/// and never block on I/O.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh key pair.
    fn generate_key_pair(&self) -> KeyPair;

    /// Seal `plaintext` to `recipient`.
    fn seal(&self, recipient: &PublicKey, plaintext: &[u8], context: SealContext)
        -> Result<KeyPacket>;

    /// Open a packet sealed to `key`.
    ///
    /// # Errors
    /// - `DecryptionFailure` for the wrong key, wrong context or corrupted packet
    fn unseal(
        &self,
        key: &PrivateKey,
        packet: &KeyPacket,
        context: SealContext,
    ) -> Result<SensitiveBytes>;

    /// Sign `message` for `context`.
    fn sign(&self, key: &PrivateKey, context: SignatureContext, message: &[u8]) -> Signature;

    /// Verify a signature made for `context`.
    fn verify(
        &self,
        key: &PublicKey,
        context: SignatureContext,
        message: &[u8],
        signature: &Signature,
    ) -> bool;

    /// Verify against several candidate keys.
    fn verify_any(
        &self,
        keys: &[PublicKey],
        context: SignatureContext,
        message: &[u8],
        signature: &Signature,
    ) -> bool {
        keys.iter()
            .any(|key| self.verify(key, context, message, signature))
    }
}

/// Provider backed by X25519, Ed25519, BLAKE2b and XChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {
    fn generate_key_pair(&self) -> KeyPair {
        KeyPair::generate()
    }

    fn seal(
        &self,
        recipient: &PublicKey,
        plaintext: &[u8],
        context: SealContext,
    ) -> Result<KeyPacket> {
        seal::seal(recipient, plaintext, context)
    }

    fn unseal(
        &self,
        key: &PrivateKey,
        packet: &KeyPacket,
        context: SealContext,
    ) -> Result<SensitiveBytes> {
        seal::unseal(key, packet, context)
    }

    fn sign(&self, key: &PrivateKey, context: SignatureContext, message: &[u8]) -> Signature {
        sign::sign(key, context, message)
    }

    fn verify(
        &self,
        key: &PublicKey,
        context: SignatureContext,
        message: &[u8],
        signature: &Signature,
    ) -> bool {
        sign::verify(key, context, message, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_provider_is_object_safe() {
        let provider: Arc<dyn CryptoProvider> = Arc::new(DefaultCryptoProvider);
        let pair = provider.generate_key_pair();

        let packet = provider
            .seal(pair.public(), b"secret", SealContext::VaultKey)
            .unwrap();
        let opened = provider
            .unseal(pair.private(), &packet, SealContext::VaultKey)
            .unwrap();
        assert_eq!(opened.as_bytes(), b"secret");

        let signature = provider.sign(pair.private(), SignatureContext::VaultKeyRecord, b"r1");
        assert!(provider.verify_any(
            &[*KeyPair::generate().public(), *pair.public()],
            SignatureContext::VaultKeyRecord,
            b"r1",
            &signature
        ));
    }
}
