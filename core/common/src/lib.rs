//! Common utilities and types shared across Keyward modules.
//!
//! This module provides the error taxonomy, the identifier newtypes used on
//! the wire, and the three-state [`Resource`] value returned by observers.

pub mod error;
pub mod resource;
pub mod types;

pub use error::{Error, Result, SignatureFailure};
pub use resource::Resource;
pub use types::{AddressId, ItemId, Revision, RotationId, SensitiveBytes, ShareId, VaultId};
