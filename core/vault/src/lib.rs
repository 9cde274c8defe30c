//! Vault content protocol for Keyward.
//!
//! This module provides:
//! - Vault and item key resolution with caching and single-flight refresh
//! - Key rotation issuance
//! - Item content encoding across format versions
//! - Signed create and update requests, and verification of stored items
//! - Verification and ingestion of inbound shares
//!
//! # Architecture
//! The vault module sits between the client state and the remote server,
//! handling all sealing, signing and verification. Nothing read from the
//! server is used before its signatures check out.

pub mod cache;
pub mod codec;
pub mod config;
pub mod content;
pub mod keys;
pub mod request;
pub mod resolver;
pub mod rotation;
pub mod share;
pub mod verifier;

pub use cache::{CacheKey, KeyCache};
pub use codec::{ContentCodec, ContentFormat, CURRENT_FORMAT_VERSION, LEGACY_FORMAT_VERSION};
pub use config::ResolverConfig;
pub use content::{
    AliasContent, CreditCardContent, CustomContent, CustomField, IdentityContent, ItemContent,
    LoginContent, NoteContent,
};
pub use keys::{ItemKey, ShareKeySet, UserAddress, VaultKey};
pub use request::{ItemRequestBuilder, VerifiedItem};
pub use resolver::KeyResolver;
pub use rotation::{KeyRotation, RotationBundle, VaultMember};
pub use share::{MemoryShareStore, ShareContentInput, ShareIngestor, ShareIssuer, ShareStore};
pub use verifier::{ShareCheck, ShareVerificationKeys, ShareVerifier, VerifiedShare};
