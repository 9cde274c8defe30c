//! Common error types for Keyward.

use std::fmt;

use thiserror::Error;

/// The specific check that rejected a signature.
///
/// Every signature in the protocol is verified by exactly one check, so a
/// rejection always names the check that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureFailure {
    /// The current user's acceptance of a share grant.
    Acceptance,
    /// The share's `signingKey` is not one of the inviter's known keys.
    UntrustedInviterKey,
    /// The inviter's signature over the share grant.
    InviterAcceptance,
    /// Share content is present but one of its signature fields is missing.
    MissingContentSignature,
    /// The address signature over the share content.
    ContentAddressSignature,
    /// The vault key signature over the share content.
    ContentVaultSignature,
    /// The author's address signature over item content.
    UserSignature,
    /// The item key signature over item content.
    ItemKeySignature,
    /// The signature over an item key packet.
    ItemKeyPacket,
    /// The signature over a vault key record.
    VaultKeyRecord,
    /// The vault key signature over an item key record.
    ItemKeyRecord,
    /// The signature bytes are not a well-formed signature.
    Malformed,
}

impl fmt::Display for SignatureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Acceptance => "acceptance signature does not verify",
            Self::UntrustedInviterKey => "signing key does not belong to the inviter",
            Self::InviterAcceptance => "inviter acceptance signature does not verify",
            Self::MissingContentSignature => "share content is missing a signature field",
            Self::ContentAddressSignature => "content address signature does not verify",
            Self::ContentVaultSignature => "content vault signature does not verify",
            Self::UserSignature => "user signature does not verify",
            Self::ItemKeySignature => "item key signature does not verify",
            Self::ItemKeyPacket => "item key packet signature does not verify",
            Self::VaultKeyRecord => "vault key record signature does not verify",
            Self::ItemKeyRecord => "item key record signature does not verify",
            Self::Malformed => "signature is malformed",
        };
        f.write_str(reason)
    }
}

/// Top-level error type for Keyward operations.
///
/// The type is `Clone` so that the outcome of a single shared key refresh
/// can be handed to every task that waited on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A signature check failed.
    #[error("Invalid signature: {0}")]
    InvalidSignature(SignatureFailure),

    /// A rotation is unknown even after a refresh.
    #[error("Key not found: share {share}, rotation {rotation}")]
    KeyNotFound { share: String, rotation: String },

    /// Wrong key or corrupted ciphertext.
    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    /// The server's revision does not match the request's `lastRevision`.
    #[error("Revision conflict: request is based on revision {expected}, server is at {actual}")]
    RevisionConflict { expected: u64, actual: u64 },

    /// The content format version is newer than this build understands.
    #[error("Unknown content format version: {0}")]
    UnknownContentFormat(u32),

    /// Cryptographic operation failed for a reason other than decryption.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Decrypted data is structurally invalid.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The transport collaborator failed.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Whether retrying the same operation with the same inputs could succeed.
    ///
    /// Only transport failures qualify; every cryptographic failure is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
