//! Resolver configuration.

use serde::{Deserialize, Serialize};

use keyward_common::{Error, Result};

/// Default number of `(address, share)` entries kept in the key cache.
pub const DEFAULT_MAX_CACHED_SHARES: usize = 64;

/// Configuration of the key resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum number of `(address, share)` entries in the cache.
    /// The oldest entry is evicted first.
    pub max_cached_shares: usize,
    /// Whether refreshes triggered internally (point lookups, latest key)
    /// write the fetched records to the local key store.
    pub store_locally: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_cached_shares: DEFAULT_MAX_CACHED_SHARES,
            store_locally: true,
        }
    }
}

impl ResolverConfig {
    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
