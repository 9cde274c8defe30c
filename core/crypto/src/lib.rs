//! Cryptographic provider for Keyward.
//!
//! This module provides:
//! - Asymmetric key pairs (X25519 for sealing, Ed25519 for signing) derived
//!   from a single zeroizing seed
//! - Sealed key packets for handing key material to a public key holder
//! - Context-separated signatures
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Passphrase locking of private keys using Argon2id
//!
//! The protocol crates only talk to these primitives through the
//! [`CryptoProvider`] trait.
//!
//! # Security Guarantees
//! - All private key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - A signature made for one [`SignatureContext`] never verifies for another

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod locked;
pub mod provider;
pub mod seal;
pub mod sign;

pub use aead::{decrypt, encrypt};
pub use kdf::{derive_key, KdfParams};
pub use keys::{KeyPair, PrivateKey, PublicKey, Salt};
pub use locked::LockedPrivateKey;
pub use provider::{CryptoProvider, DefaultCryptoProvider};
pub use seal::{seal, unseal, KeyPacket, SealContext};
pub use sign::{sign, verify, Signature, SignatureContext};
