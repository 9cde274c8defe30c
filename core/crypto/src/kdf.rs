//! Key derivation using Argon2id.
//!
//! Used to turn an address passphrase into the symmetric key that locks the
//! address private key at rest.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::keys::{Salt, KEY_LENGTH};
use keyward_common::{Error, Result};

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Minimal parameters for tests and throwaway keys. Never use for real data.
    pub fn insecure_fast() -> Self {
        Self {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a symmetric key from a passphrase and salt using Argon2id.
///
/// # Preconditions
/// - `passphrase` must not be empty
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
/// - The returned buffer is zeroized on drop
///
/// # Errors
/// - Returns error if passphrase is empty
/// - Returns error if Argon2id parameters are invalid
pub fn derive_key(
    passphrase: &[u8],
    salt: &Salt,
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    if passphrase.is_empty() {
        return Err(Error::InvalidInput("Passphrase cannot be empty".to_string()));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = Zeroizing::new([0u8; KEY_LENGTH]);
    argon2
        .hash_password_into(passphrase, salt.as_bytes(), key_bytes.as_mut_slice())
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let salt = Salt::from_bytes([42u8; 32]);
        let params = KdfParams::insecure_fast();

        let key1 = derive_key(b"passphrase-123", &salt, &params).unwrap();
        let key2 = derive_key(b"passphrase-123", &salt, &params).unwrap();

        assert_eq!(*key1, *key2);
    }

    #[test]
    fn test_derive_key_different_salt() {
        let params = KdfParams::insecure_fast();

        let key1 = derive_key(b"passphrase", &Salt::from_bytes([1u8; 32]), &params).unwrap();
        let key2 = derive_key(b"passphrase", &Salt::from_bytes([2u8; 32]), &params).unwrap();

        assert_ne!(*key1, *key2);
    }

    #[test]
    fn test_derive_key_different_passphrase() {
        let salt = Salt::from_bytes([42u8; 32]);
        let params = KdfParams::insecure_fast();

        let key1 = derive_key(b"passphrase1", &salt, &params).unwrap();
        let key2 = derive_key(b"passphrase2", &salt, &params).unwrap();

        assert_ne!(*key1, *key2);
    }

    #[test]
    fn test_derive_key_empty_passphrase_fails() {
        let salt = Salt::generate();
        assert!(derive_key(b"", &salt, &KdfParams::insecure_fast()).is_err());
    }

    #[test]
    fn test_invalid_params_fail() {
        let params = KdfParams {
            memory_cost: 0,
            time_cost: 0,
            parallelism: 0,
        };
        assert!(matches!(
            derive_key(b"passphrase", &Salt::generate(), &params),
            Err(Error::Crypto(_))
        ));
    }
}
