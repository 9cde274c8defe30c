//! Key types with secure memory handling.
//!
//! A [`PrivateKey`] is a 32-byte seed. The X25519 secret used for sealing and
//! the Ed25519 key used for signing are both derived from it, so a key pair
//! serializes as one seed and one [`PublicKey`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use keyward_common::{Error, Result};

/// Length of private key seeds and symmetric keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of a serialized public key: X25519 part followed by Ed25519 part.
pub const PUBLIC_KEY_LENGTH: usize = 64;

const ENCRYPTION_LABEL: &[u8] = b"keyward.subkey.encryption";
const SIGNING_LABEL: &[u8] = b"keyward.subkey.signing";

fn derive_subkey(seed: &[u8; KEY_LENGTH], label: &[u8]) -> [u8; KEY_LENGTH] {
    use blake2::digest::consts::U32;
    use blake2::{Blake2b, Digest};

    let mut hasher = Blake2b::<U32>::new();
    hasher.update(seed);
    hasher.update(label);

    let result = hasher.finalize();
    let mut derived = [0u8; KEY_LENGTH];
    derived.copy_from_slice(&result);
    derived
}

/// Private half of an asymmetric key pair.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    seed: [u8; KEY_LENGTH],
}

impl PrivateKey {
    /// Create a private key from raw seed bytes.
    pub fn from_bytes(seed: [u8; KEY_LENGTH]) -> Self {
        Self { seed }
    }

    /// Create a private key from a slice, typically an unsealed key packet.
    ///
    /// # Errors
    /// - Returns error if the slice is not KEY_LENGTH bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let seed: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::Integrity(format!(
                "Invalid private key length: expected {}, got {}",
                KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self { seed })
    }

    /// Generate a random private key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut seed = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut seed);
        Self { seed }
    }

    /// Get the seed bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.seed
    }

    /// Derive the matching public key.
    pub fn public_key(&self) -> PublicKey {
        let encryption = x25519_dalek::PublicKey::from(&self.encryption_secret()).to_bytes();
        let signing = self.signing_key().verifying_key().to_bytes();
        PublicKey {
            encryption,
            signing,
        }
    }

    pub(crate) fn encryption_secret(&self) -> x25519_dalek::StaticSecret {
        let mut bytes = derive_subkey(&self.seed, ENCRYPTION_LABEL);
        let secret = x25519_dalek::StaticSecret::from(bytes);
        bytes.zeroize();
        secret
    }

    pub(crate) fn signing_key(&self) -> ed25519_dalek::SigningKey {
        let mut bytes = derive_subkey(&self.seed, SIGNING_LABEL);
        let key = ed25519_dalek::SigningKey::from_bytes(&bytes);
        bytes.zeroize();
        key
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.seed.ct_eq(&other.seed).into()
    }
}

impl Eq for PrivateKey {}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// Public half of an asymmetric key pair.
///
/// Serializes as a base64 string of the 64-byte encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    pub(crate) encryption: [u8; 32],
    pub(crate) signing: [u8; 32],
}

impl PublicKey {
    /// Encode as `encryption || signing`.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let mut bytes = [0u8; PUBLIC_KEY_LENGTH];
        bytes[..32].copy_from_slice(&self.encryption);
        bytes[32..].copy_from_slice(&self.signing);
        bytes
    }

    /// Decode from `encryption || signing`.
    ///
    /// # Errors
    /// - Returns error if the length is wrong
    /// - Returns error if the signing part is not a valid Ed25519 point
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Invalid public key length: expected {}, got {}",
                PUBLIC_KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut encryption = [0u8; 32];
        let mut signing = [0u8; 32];
        encryption.copy_from_slice(&bytes[..32]);
        signing.copy_from_slice(&bytes[32..]);

        ed25519_dalek::VerifyingKey::from_bytes(&signing)
            .map_err(|e| Error::InvalidInput(format!("Invalid signing key: {}", e)))?;

        Ok(Self {
            encryption,
            signing,
        })
    }

    /// Encode as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Decode from standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::InvalidInput(format!("Invalid public key encoding: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Short, non-secret identifier suitable for logs.
    pub fn fingerprint(&self) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        let digest = Blake2b::<U32>::digest(self.to_bytes());
        URL_SAFE_NO_PAD.encode(&digest[..9])
    }

    pub(crate) fn encryption_key(&self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.encryption)
    }

    pub(crate) fn verifying_key(&self) -> Option<ed25519_dalek::VerifyingKey> {
        ed25519_dalek::VerifyingKey::from_bytes(&self.signing).ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// An asymmetric key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a random key pair.
    pub fn generate() -> Self {
        Self::from_private(PrivateKey::generate())
    }

    /// Rebuild a key pair from its private half.
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// Get the private key.
    pub fn private(&self) -> &PrivateKey {
        &self.private
    }

    /// Get the public key.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Salt(pub [u8; 32]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_is_deterministic() {
        let private = PrivateKey::from_bytes([7u8; KEY_LENGTH]);
        assert_eq!(private.public_key(), private.public_key());

        let other = PrivateKey::from_bytes([8u8; KEY_LENGTH]);
        assert_ne!(private.public_key(), other.public_key());
    }

    #[test]
    fn test_generated_keys_differ() {
        let pair1 = KeyPair::generate();
        let pair2 = KeyPair::generate();

        assert_ne!(pair1.private(), pair2.private());
        assert_ne!(pair1.public(), pair2.public());
    }

    #[test]
    fn test_subkeys_are_separated() {
        let public = PrivateKey::from_bytes([3u8; KEY_LENGTH]).public_key();
        let bytes = public.to_bytes();
        assert_ne!(&bytes[..32], &bytes[32..]);
    }

    #[test]
    fn test_public_key_base64_roundtrip() {
        let public = *KeyPair::generate().public();
        let restored = PublicKey::from_base64(&public.to_base64()).unwrap();
        assert_eq!(restored, public);
    }

    #[test]
    fn test_public_key_serde_is_a_string() {
        let public = *KeyPair::generate().public();
        let json = serde_json::to_string(&public).unwrap();
        assert!(json.starts_with('"'));

        let restored: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, public);
    }

    #[test]
    fn test_public_key_wrong_length_fails() {
        assert!(PublicKey::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_private_key_from_slice() {
        let private = PrivateKey::from_bytes([9u8; KEY_LENGTH]);
        let restored = PrivateKey::from_slice(private.as_bytes()).unwrap();
        assert_eq!(restored, private);

        assert!(matches!(
            PrivateKey::from_slice(&[1u8; 31]),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let pair = KeyPair::generate();
        let debug = format!("{:?}", pair);
        assert!(!debug.contains(&format!("{:?}", pair.private().as_bytes())));
        assert_eq!(format!("{:?}", pair.private()), "PrivateKey([REDACTED])");
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        // Random salts should be different
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }
}
