//! Transport-facing surface of Keyward.
//!
//! This module provides:
//! - The wire payloads exchanged with the server, with their fixed field names
//! - Traits for the collaborators that fetch keys and persist items
//! - A local store for sealed key records
//! - An in-memory server used by tests and the command-line tool
//!
//! # Design Principles
//! - No protocol logic: nothing here decrypts, verifies or signs
//! - Async operations: every collaborator call may suspend
//! - Retries and timeouts belong to real transport implementations

pub mod local;
pub mod memory;
pub mod provider;
pub mod wire;

pub use local::{LocalKeyStore, MemoryKeyStore, StoredShareKeys};
pub use memory::MemoryServer;
pub use provider::{ItemTransport, KeySource};
pub use wire::{
    EncryptedCreateItem, EncryptedItemContent, EncryptedItemKey, EncryptedShareResponse,
    EncryptedUpdateItemRequest, EncryptedVaultKey, StoredItem,
};
