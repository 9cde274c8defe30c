//! Bounded cache of opened key sets.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::keys::ShareKeySet;
use keyward_common::{AddressId, ShareId};

/// Cache entry key: one member address viewing one share.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub address_id: AddressId,
    pub share_id: ShareId,
}

impl CacheKey {
    pub fn new(address_id: &AddressId, share_id: &ShareId) -> Self {
        Self {
            address_id: address_id.clone(),
            share_id: share_id.clone(),
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Arc<ShareKeySet>>,
    order: VecDeque<CacheKey>,
}

/// Key sets indexed by `(address, share)`.
///
/// Entries are only ever replaced whole. Readers holding an `Arc` from a
/// previous lookup keep a consistent view while a newer set is swapped in.
pub struct KeyCache {
    capacity: usize,
    state: RwLock<CacheState>,
}

impl KeyCache {
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Get the current set for a key.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<ShareKeySet>> {
        self.state.read().await.entries.get(key).cloned()
    }

    /// Swap in a fully resolved set, returning the one it replaced.
    ///
    /// Inserting a new key beyond capacity evicts the oldest entry.
    pub async fn swap(&self, key: CacheKey, set: Arc<ShareKeySet>) -> Option<Arc<ShareKeySet>> {
        let mut state = self.state.write().await;

        state.order.retain(|existing| existing != &key);
        state.order.push_back(key.clone());
        let previous = state.entries.insert(key, set);

        while state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.entries.remove(&evicted);
                debug!(share = %evicted.share_id, "Evicted key set");
            }
        }
        previous
    }

    /// Drop the set for a key.
    pub async fn remove(&self, key: &CacheKey) -> Option<Arc<ShareKeySet>> {
        let mut state = self.state.write().await;
        state.order.retain(|existing| existing != key);
        state.entries.remove(key)
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Check if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
