//! Key hierarchy resolution.
//!
//! The resolver turns sealed key records into opened [`VaultKey`] and
//! [`ItemKey`] values for one member address, and caches the result per
//! `(address, share)`.
//!
//! # Lookup order
//! 1. In-memory cache, unless a refresh is forced
//! 2. Local key store, unless a refresh is forced
//! 3. Remote key source
//!
//! Every record is verified before it is opened, including records loaded
//! from the local store.
//!
//! # Concurrency
//! At most one refresh per `(address, share)` runs at a time. Callers that
//! queue behind a running refresh receive its outcome instead of fetching
//! again, unless they need more than it did: a forced caller never takes an
//! outcome served from the local store, and a caller that wants the records
//! stored never takes one that was not stored. A refresh that fails or is
//! cancelled leaves the cached set as it was. Refresh state is dropped as
//! soon as no caller is waiting on it.

use futures::stream::{self, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, KeyCache};
use crate::config::ResolverConfig;
use crate::keys::{ItemKey, ShareKeySet, UserAddress, VaultKey};
use keyward_common::{AddressId, Error, Resource, Result, RotationId, ShareId, SignatureFailure};
use keyward_crypto::{
    CryptoProvider, KeyPair, PrivateKey, PublicKey, SealContext, SignatureContext,
};
use keyward_remote::{KeySource, LocalKeyStore, StoredShareKeys};

/// Refresh coordination for one `(address, share)` pair.
#[derive(Default)]
struct Flight {
    /// Incremented each time a refresh completes.
    generation: AtomicU64,
    /// Outcome of the most recent completed refresh.
    last: Mutex<Option<Outcome>>,
}

type Flights = SyncMutex<HashMap<CacheKey, Arc<Flight>>>;

/// Outcome of one completed refresh.
#[derive(Clone)]
struct Outcome {
    result: Result<Arc<ShareKeySet>>,
    /// The records were fetched from the key source.
    remote: bool,
    /// The records are in the local store.
    stored: bool,
}

impl Outcome {
    /// Whether a caller with these requirements may take this outcome.
    ///
    /// Failures are always shared.
    fn serves(&self, force_refresh: bool, should_store_locally: bool) -> bool {
        self.result.is_err()
            || ((self.remote || !force_refresh) && (self.stored || !should_store_locally))
    }
}

/// A caller's hold on a [`Flight`].
///
/// Dropping the last hold removes the flight, so no opened key set outlives
/// its cache entry.
struct FlightTicket<'a> {
    flights: &'a Flights,
    key: CacheKey,
    flight: Arc<Flight>,
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        let mut flights = lock_flights(self.flights);
        let registered = flights
            .get(&self.key)
            .is_some_and(|flight| Arc::ptr_eq(flight, &self.flight));
        // One reference in the map, one here
        if registered && Arc::strong_count(&self.flight) == 2 {
            flights.remove(&self.key);
        }
    }
}

fn lock_flights(flights: &Flights) -> MutexGuard<'_, HashMap<CacheKey, Arc<Flight>>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_not_found(share_id: &ShareId, rotation: impl Into<String>) -> Error {
    Error::KeyNotFound {
        share: share_id.to_string(),
        rotation: rotation.into(),
    }
}

/// Resolves and caches the keys of the shares a member belongs to.
pub struct KeyResolver {
    crypto: Arc<dyn CryptoProvider>,
    source: Arc<dyn KeySource>,
    local: Arc<dyn LocalKeyStore>,
    cache: KeyCache,
    flights: Flights,
    config: ResolverConfig,
}

impl KeyResolver {
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        source: Arc<dyn KeySource>,
        local: Arc<dyn LocalKeyStore>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            crypto,
            source,
            local,
            cache: KeyCache::new(config.max_cached_shares),
            flights: SyncMutex::new(HashMap::new()),
            config,
        }
    }

    /// Get the resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Get every known vault key of a share, oldest rotation first.
    ///
    /// # Preconditions
    /// - `signing_key` is the key that issued the vault key records
    ///
    /// # Postconditions
    /// - The opened set, including item keys, is cached
    /// - If `should_store_locally`, freshly fetched sealed records are
    ///   written to the local key store
    ///
    /// # Errors
    /// - `InvalidSignature` if a vault or item key record is not signed by
    ///   the expected key
    /// - `DecryptionFailure` if a record cannot be opened with the address key
    /// - `Transport` / `NotFound` from the key source
    pub async fn get_vault_keys(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
        force_refresh: bool,
        should_store_locally: bool,
    ) -> Result<Vec<VaultKey>> {
        let set = self
            .key_set(
                address,
                share_id,
                signing_key,
                force_refresh,
                should_store_locally,
            )
            .await?;
        Ok(set.vault_keys().to_vec())
    }

    /// Observe [`get_vault_keys`](Self::get_vault_keys) as a stream.
    ///
    /// Yields `Loading`, then exactly one `Success` or `Error`. Failures are
    /// not retried.
    pub fn observe_vault_keys<'a>(
        &'a self,
        address: &'a UserAddress,
        share_id: &'a ShareId,
        signing_key: &'a PublicKey,
        force_refresh: bool,
        should_store_locally: bool,
    ) -> impl Stream<Item = Resource<Vec<VaultKey>>> + 'a {
        stream::once(async { Resource::Loading }).chain(stream::once(async move {
            let result = self
                .get_vault_keys(
                    address,
                    share_id,
                    signing_key,
                    force_refresh,
                    should_store_locally,
                )
                .await;
            Resource::from(result)
        }))
    }

    /// Get the vault key of one rotation.
    ///
    /// # Errors
    /// - `KeyNotFound` if the rotation is unknown even after one forced refresh
    pub async fn get_vault_key_by_id(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
        rotation_id: &RotationId,
    ) -> Result<VaultKey> {
        let set = self
            .lookup_with_refresh(address, share_id, signing_key, |set| {
                set.vault_key(rotation_id).is_some()
            })
            .await?;
        set.vault_key(rotation_id)
            .cloned()
            .ok_or_else(|| key_not_found(share_id, rotation_id.as_str()))
    }

    /// Get the item key of one rotation.
    ///
    /// # Errors
    /// - `KeyNotFound` if the rotation is unknown even after one forced refresh
    pub async fn get_item_key_by_id(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
        rotation_id: &RotationId,
    ) -> Result<ItemKey> {
        let set = self
            .lookup_with_refresh(address, share_id, signing_key, |set| {
                set.item_key(rotation_id).is_some()
            })
            .await?;
        set.item_key(rotation_id)
            .cloned()
            .ok_or_else(|| key_not_found(share_id, rotation_id.as_str()))
    }

    /// Get the vault key new items are written with.
    ///
    /// # Errors
    /// - `KeyNotFound` if the share has no active vault key
    pub async fn get_latest_vault_key(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
    ) -> Result<VaultKey> {
        let set = self
            .lookup_with_refresh(address, share_id, signing_key, |set| {
                set.latest_vault_key().is_some()
            })
            .await?;
        set.latest_vault_key()
            .cloned()
            .ok_or_else(|| key_not_found(share_id, "latest"))
    }

    /// Get the latest vault key together with the item key of the same rotation.
    ///
    /// # Errors
    /// - `KeyNotFound` if there is no active rotation with both keys
    pub async fn get_latest_vault_item_key(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
    ) -> Result<(VaultKey, ItemKey)> {
        let set = self
            .lookup_with_refresh(address, share_id, signing_key, |set| {
                set.latest_pair().is_some()
            })
            .await?;
        set.latest_pair()
            .map(|(vault_key, item_key)| (vault_key.clone(), item_key.clone()))
            .ok_or_else(|| key_not_found(share_id, "latest"))
    }

    /// Forget everything known about a share, in memory and in the local store.
    pub async fn invalidate(&self, address_id: &AddressId, share_id: &ShareId) -> Result<()> {
        let key = CacheKey::new(address_id, share_id);
        self.cache.remove(&key).await;
        lock_flights(&self.flights).remove(&key);
        self.local.remove(address_id, share_id).await?;

        info!(share = %share_id, "Invalidated vault keys");
        Ok(())
    }

    async fn lookup_with_refresh<F>(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
        contains: F,
    ) -> Result<Arc<ShareKeySet>>
    where
        F: Fn(&ShareKeySet) -> bool,
    {
        let store_locally = self.config.store_locally;
        let set = self
            .key_set(address, share_id, signing_key, false, store_locally)
            .await?;
        if contains(&set) {
            return Ok(set);
        }

        debug!(share = %share_id, "Requested key not cached, refreshing");
        self.key_set(address, share_id, signing_key, true, store_locally)
            .await
    }

    async fn key_set(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
        force_refresh: bool,
        should_store_locally: bool,
    ) -> Result<Arc<ShareKeySet>> {
        let key = CacheKey::new(&address.address_id, share_id);
        if !force_refresh {
            if let Some(set) = self.cache.get(&key).await {
                return Ok(set);
            }
        }

        let ticket = self.flight(&key);
        let flight = &ticket.flight;
        let seen = flight.generation.load(Ordering::Acquire);
        let mut last = flight.last.lock().await;

        if flight.generation.load(Ordering::Acquire) != seen {
            if let Some(outcome) = last
                .as_ref()
                .filter(|outcome| outcome.serves(force_refresh, should_store_locally))
            {
                debug!(share = %share_id, "Joined in-flight refresh");
                return outcome.result.clone();
            }
            debug!(share = %share_id, "In-flight refresh does not cover this call");
        } else if !force_refresh {
            if let Some(set) = self.cache.get(&key).await {
                return Ok(set);
            }
        }

        let outcome = self
            .resolve(
                address,
                share_id,
                signing_key,
                force_refresh,
                should_store_locally,
            )
            .await;

        if let Ok(set) = &outcome.result {
            self.cache.swap(key, set.clone()).await;
        }
        let result = outcome.result.clone();
        *last = Some(outcome);
        flight.generation.fetch_add(1, Ordering::Release);
        result
    }

    fn flight(&self, key: &CacheKey) -> FlightTicket<'_> {
        let flight = lock_flights(&self.flights)
            .entry(key.clone())
            .or_default()
            .clone();
        FlightTicket {
            flights: &self.flights,
            key: key.clone(),
            flight,
        }
    }

    async fn resolve(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
        force_refresh: bool,
        should_store_locally: bool,
    ) -> Outcome {
        if !force_refresh {
            if let Some(set) = self.load_local(address, share_id, signing_key).await {
                return Outcome {
                    result: Ok(Arc::new(set)),
                    remote: false,
                    stored: true,
                };
            }
        }

        match self
            .fetch(address, share_id, signing_key, should_store_locally)
            .await
        {
            Ok((set, stored)) => Outcome {
                result: Ok(Arc::new(set)),
                remote: true,
                stored,
            },
            Err(e) => Outcome {
                result: Err(e),
                remote: true,
                stored: false,
            },
        }
    }

    async fn load_local(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
    ) -> Option<ShareKeySet> {
        match self.local.load(&address.address_id, share_id).await {
            Ok(Some(stored)) => match self.open(address, share_id, signing_key, &stored) {
                Ok(set) => {
                    debug!(share = %share_id, "Opened vault keys from local store");
                    Some(set)
                }
                Err(e) => {
                    warn!(share = %share_id, error = %e, "Discarding local key records");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(share = %share_id, error = %e, "Local key store unavailable");
                None
            }
        }
    }

    /// Fetch and open the remote records. Also reports whether they were stored.
    async fn fetch(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
        should_store_locally: bool,
    ) -> Result<(ShareKeySet, bool)> {
        let (vault_keys, item_keys) = tokio::try_join!(
            self.source.fetch_vault_keys(share_id, &address.address_id),
            self.source.fetch_item_keys(share_id),
        )?;
        let stored = StoredShareKeys {
            vault_keys,
            item_keys,
        };
        let set = self.open(address, share_id, signing_key, &stored)?;

        info!(
            share = %share_id,
            rotations = set.vault_keys().len(),
            "Refreshed vault keys"
        );

        if !should_store_locally {
            return Ok((set, false));
        }
        match self
            .local
            .store(&address.address_id, share_id, stored)
            .await
        {
            Ok(()) => Ok((set, true)),
            Err(e) => {
                warn!(share = %share_id, error = %e, "Failed to store key records locally");
                Ok((set, false))
            }
        }
    }

    fn open(
        &self,
        address: &UserAddress,
        share_id: &ShareId,
        signing_key: &PublicKey,
        stored: &StoredShareKeys,
    ) -> Result<ShareKeySet> {
        let mut vault_keys = Vec::with_capacity(stored.vault_keys.len());
        for record in &stored.vault_keys {
            if !self.crypto.verify(
                signing_key,
                SignatureContext::VaultKeyRecord,
                &record.signed_message(),
                &record.key_packet_signature,
            ) {
                warn!(
                    share = %share_id,
                    rotation_id = %record.rotation_id,
                    "Rejected vault key record"
                );
                return Err(Error::InvalidSignature(SignatureFailure::VaultKeyRecord));
            }

            let seed =
                self.crypto
                    .unseal(address.private_key(), &record.key_packet, SealContext::VaultKey)?;
            let private = PrivateKey::from_slice(seed.as_bytes())?;

            vault_keys.push(VaultKey {
                rotation_id: record.rotation_id.clone(),
                rotation: record.rotation,
                key_pair: KeyPair::from_private(private),
                is_primary: record.is_primary,
                is_active: record.is_active,
                create_time: record.create_time,
            });
        }

        let mut item_keys = Vec::with_capacity(stored.item_keys.len());
        for record in &stored.item_keys {
            let Some(vault_key) = vault_keys
                .iter()
                .find(|key| key.rotation_id == record.rotation_id)
            else {
                debug!(rotation_id = %record.rotation_id, "Skipping item key without vault key");
                continue;
            };

            if !self.crypto.verify(
                vault_key.public_key(),
                SignatureContext::ItemKeyRecord,
                &record.signed_message(),
                &record.key_packet_signature,
            ) {
                warn!(
                    share = %share_id,
                    rotation_id = %record.rotation_id,
                    "Rejected item key record"
                );
                return Err(Error::InvalidSignature(SignatureFailure::ItemKeyRecord));
            }

            let seed = self.crypto.unseal(
                vault_key.private_key(),
                &record.key_packet,
                SealContext::ItemKey,
            )?;
            let private = PrivateKey::from_slice(seed.as_bytes())?;

            item_keys.push(ItemKey {
                rotation_id: record.rotation_id.clone(),
                key_pair: KeyPair::from_private(private),
            });
        }

        Ok(ShareKeySet::new(vault_keys, item_keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::{KeyRotation, RotationBundle, VaultMember};
    use async_trait::async_trait;
    use futures::future::join_all;
    use keyward_crypto::DefaultCryptoProvider;
    use keyward_remote::{MemoryKeyStore, MemoryServer};
    use std::time::Duration;

    struct Fixture {
        server: Arc<MemoryServer>,
        local: Arc<MemoryKeyStore>,
        resolver: Arc<KeyResolver>,
        alice: UserAddress,
        share: ShareId,
        bundle: RotationBundle,
    }

    /// Local store whose loads take a while.
    struct SlowKeyStore {
        inner: Arc<MemoryKeyStore>,
        delay: Duration,
    }

    #[async_trait]
    impl LocalKeyStore for SlowKeyStore {
        async fn load(
            &self,
            address_id: &AddressId,
            share_id: &ShareId,
        ) -> Result<Option<StoredShareKeys>> {
            tokio::time::sleep(self.delay).await;
            self.inner.load(address_id, share_id).await
        }

        async fn store(
            &self,
            address_id: &AddressId,
            share_id: &ShareId,
            keys: StoredShareKeys,
        ) -> Result<()> {
            self.inner.store(address_id, share_id, keys).await
        }

        async fn remove(&self, address_id: &AddressId, share_id: &ShareId) -> Result<()> {
            self.inner.remove(address_id, share_id).await
        }
    }

    fn address(id: &str) -> UserAddress {
        UserAddress::new(
            AddressId::new(id).unwrap(),
            format!("{}@example.com", id),
            KeyPair::generate(),
        )
    }

    fn resolver_for(server: Arc<MemoryServer>, local: Arc<MemoryKeyStore>) -> KeyResolver {
        KeyResolver::new(
            Arc::new(DefaultCryptoProvider),
            server,
            local,
            ResolverConfig::default(),
        )
    }

    async fn fixture_with(server: MemoryServer) -> Fixture {
        let server = Arc::new(server);
        let local = Arc::new(MemoryKeyStore::new());
        let alice = address("alice");
        let share = ShareId::new("share-1").unwrap();

        let bundle = KeyRotation::new(Arc::new(DefaultCryptoProvider))
            .create_vault(&alice, &[VaultMember::from(&alice)])
            .unwrap();
        server
            .publish_rotation(
                &share,
                bundle.vault_key_records.clone(),
                bundle.item_key_record.clone(),
            )
            .await;

        Fixture {
            resolver: Arc::new(resolver_for(server.clone(), local.clone())),
            server,
            local,
            alice,
            share,
            bundle,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(MemoryServer::new()).await
    }

    impl Fixture {
        async fn vault_keys(&self, force_refresh: bool) -> Result<Vec<VaultKey>> {
            self.resolver
                .get_vault_keys(
                    &self.alice,
                    &self.share,
                    self.alice.public_key(),
                    force_refresh,
                    false,
                )
                .await
        }

        async fn rotate(&self) -> RotationBundle {
            let next = KeyRotation::new(Arc::new(DefaultCryptoProvider))
                .rotate(
                    &self.bundle.vault_key,
                    &self.alice,
                    &[VaultMember::from(&self.alice)],
                )
                .unwrap();
            self.server
                .publish_rotation(
                    &self.share,
                    next.vault_key_records.clone(),
                    next.item_key_record.clone(),
                )
                .await;
            next
        }
    }

    #[tokio::test]
    async fn test_get_vault_keys_opens_records() {
        let f = fixture().await;

        let keys = f.vault_keys(false).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].private_key(), f.bundle.vault_key.private_key());
        assert!(keys[0].is_primary);

        let item_key = f
            .resolver
            .get_item_key_by_id(
                &f.alice,
                &f.share,
                f.alice.public_key(),
                &f.bundle.item_key.rotation_id,
            )
            .await
            .unwrap();
        assert_eq!(item_key.private_key(), f.bundle.item_key.private_key());
    }

    #[tokio::test]
    async fn test_cached_keys_are_not_fetched_again() {
        let f = fixture().await;

        f.vault_keys(false).await.unwrap();
        f.vault_keys(false).await.unwrap();
        assert_eq!(f.server.vault_key_fetches(), 1);

        f.vault_keys(true).await.unwrap();
        assert_eq!(f.server.vault_key_fetches(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_share_one_fetch() {
        let f = fixture_with(MemoryServer::with_latency(Duration::from_millis(50))).await;

        let lookups = (0..8).map(|_| f.vault_keys(false));
        let results = join_all(lookups).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(f.server.vault_key_fetches(), 1);
        assert_eq!(f.server.item_key_fetches(), 1);
        assert!(lock_flights(&f.resolver.flights).is_empty());
    }

    #[tokio::test]
    async fn test_forced_refresh_behind_local_load_fetches_remote() {
        let f = fixture().await;
        f.resolver
            .get_vault_keys(&f.alice, &f.share, f.alice.public_key(), false, true)
            .await
            .unwrap();
        f.rotate().await;
        let fetches = f.server.vault_key_fetches();

        let slow = Arc::new(SlowKeyStore {
            inner: f.local.clone(),
            delay: Duration::from_millis(150),
        });
        let resolver = KeyResolver::new(
            Arc::new(DefaultCryptoProvider),
            f.server.clone(),
            slow,
            ResolverConfig::default(),
        );
        let signing_key = f.alice.public_key();

        let (local, forced) = tokio::join!(
            resolver.get_vault_keys(&f.alice, &f.share, signing_key, false, false),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                resolver
                    .get_vault_keys(&f.alice, &f.share, signing_key, true, false)
                    .await
            }
        );

        assert_eq!(local.unwrap().len(), 1);
        assert_eq!(forced.unwrap().len(), 2);
        assert_eq!(f.server.vault_key_fetches(), fetches + 1);
    }

    #[tokio::test]
    async fn test_storing_caller_behind_unstored_refresh_stores() {
        let f = fixture_with(MemoryServer::with_latency(Duration::from_millis(100))).await;
        let signing_key = f.alice.public_key();

        let (plain, storing) = tokio::join!(
            f.resolver
                .get_vault_keys(&f.alice, &f.share, signing_key, false, false),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                f.resolver
                    .get_vault_keys(&f.alice, &f.share, signing_key, false, true)
                    .await
            }
        );

        assert!(plain.is_ok());
        assert!(storing.is_ok());
        assert!(f
            .local
            .load(&f.alice.address_id, &f.share)
            .await
            .unwrap()
            .is_some());
        assert_eq!(f.server.vault_key_fetches(), 2);
    }

    #[tokio::test]
    async fn test_flights_do_not_outlive_eviction() {
        let crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCryptoProvider);
        let server = Arc::new(MemoryServer::new());
        let alice = address("alice");
        let rotation = KeyRotation::new(crypto.clone());
        let config = ResolverConfig {
            max_cached_shares: 1,
            ..ResolverConfig::default()
        };
        let resolver = KeyResolver::new(
            crypto,
            server.clone(),
            Arc::new(MemoryKeyStore::new()),
            config,
        );

        for index in 0..5 {
            let share = ShareId::new(format!("share-{}", index)).unwrap();
            let bundle = rotation
                .create_vault(&alice, &[VaultMember::from(&alice)])
                .unwrap();
            server
                .publish_rotation(&share, bundle.vault_key_records, bundle.item_key_record)
                .await;
            resolver
                .get_vault_keys(&alice, &share, alice.public_key(), false, false)
                .await
                .unwrap();
        }

        assert_eq!(resolver.cache.len().await, 1);
        assert!(lock_flights(&resolver.flights).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_forced_refreshes_share_one_fetch() {
        let f = fixture_with(MemoryServer::with_latency(Duration::from_millis(50))).await;

        let results = join_all((0..8).map(|_| f.vault_keys(true))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(f.server.vault_key_fetches(), 1);
    }

    #[tokio::test]
    async fn test_waiters_share_a_failed_refresh() {
        let f = fixture_with(MemoryServer::with_latency(Duration::from_millis(50))).await;
        f.server.set_offline(true);

        let results = join_all((0..4).map(|_| f.vault_keys(true))).await;

        assert!(results
            .iter()
            .all(|r| matches!(r, Err(Error::Transport(_)))));
        assert_eq!(f.server.vault_key_fetches(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_cached_set() {
        let f = fixture().await;
        let before = f.vault_keys(false).await.unwrap();

        f.server.set_offline(true);
        assert!(matches!(f.vault_keys(true).await, Err(Error::Transport(_))));

        let after = f.vault_keys(false).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_keeps_cached_set() {
        let f = fixture_with(MemoryServer::with_latency(Duration::from_millis(200))).await;
        let before = f.vault_keys(false).await.unwrap();

        let resolver = f.resolver.clone();
        let alice = f.alice.clone();
        let share = f.share.clone();
        let task = tokio::spawn(async move {
            let signing_key = *alice.public_key();
            resolver
                .get_vault_keys(&alice, &share, &signing_key, true, false)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let cache_key = CacheKey::new(&f.alice.address_id, &f.share);
        let cached = f.resolver.cache.get(&cache_key).await.unwrap();
        assert_eq!(cached.vault_keys(), before.as_slice());

        // The pair is not stuck behind the cancelled refresh
        assert!(f.vault_keys(true).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_rotation_after_refresh() {
        let f = fixture().await;
        f.vault_keys(false).await.unwrap();

        let missing = RotationId::new("missing").unwrap();
        let result = f
            .resolver
            .get_vault_key_by_id(&f.alice, &f.share, f.alice.public_key(), &missing)
            .await;

        assert!(matches!(result, Err(Error::KeyNotFound { .. })));
        assert_eq!(f.server.vault_key_fetches(), 2);
    }

    #[tokio::test]
    async fn test_new_rotation_found_by_refresh() {
        let f = fixture().await;
        f.vault_keys(false).await.unwrap();

        let next = f.rotate().await;
        let item_key = f
            .resolver
            .get_item_key_by_id(
                &f.alice,
                &f.share,
                f.alice.public_key(),
                &next.item_key.rotation_id,
            )
            .await
            .unwrap();
        assert_eq!(item_key.public_key(), next.item_key.public_key());

        // Old rotation is still retrievable
        let old = f
            .resolver
            .get_item_key_by_id(
                &f.alice,
                &f.share,
                f.alice.public_key(),
                &f.bundle.item_key.rotation_id,
            )
            .await
            .unwrap();
        assert_eq!(old.public_key(), f.bundle.item_key.public_key());

        let keys = f.vault_keys(false).await.unwrap();
        let rotations: Vec<u64> = keys.iter().map(|k| k.rotation).collect();
        assert_eq!(rotations, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_latest_follows_rotation_after_invalidate() {
        let f = fixture().await;
        let (vault_key, item_key) = f
            .resolver
            .get_latest_vault_item_key(&f.alice, &f.share, f.alice.public_key())
            .await
            .unwrap();
        assert_eq!(vault_key.rotation, 1);
        assert_eq!(item_key.rotation_id, vault_key.rotation_id);

        f.rotate().await;
        f.resolver
            .invalidate(&f.alice.address_id, &f.share)
            .await
            .unwrap();

        let latest = f
            .resolver
            .get_latest_vault_key(&f.alice, &f.share, f.alice.public_key())
            .await
            .unwrap();
        assert_eq!(latest.rotation, 2);
        assert!(latest.is_primary);
    }

    #[tokio::test]
    async fn test_record_from_wrong_issuer_rejected() {
        let f = fixture().await;
        let mallory = address("mallory");
        let forged = KeyRotation::new(Arc::new(DefaultCryptoProvider))
            .create_vault(&mallory, &[VaultMember::from(&f.alice)])
            .unwrap();
        let records = forged
            .vault_key_records
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        f.server
            .replace_vault_keys(&f.share, &f.alice.address_id, records)
            .await;

        let result = f.vault_keys(true).await;
        assert_eq!(
            result.unwrap_err(),
            Error::InvalidSignature(SignatureFailure::VaultKeyRecord)
        );
    }

    #[tokio::test]
    async fn test_wrong_address_key_fails_to_open() {
        let f = fixture().await;
        let impostor = UserAddress::new(
            f.alice.address_id.clone(),
            f.alice.email.clone(),
            KeyPair::generate(),
        );

        let result = f
            .resolver
            .get_vault_keys(&impostor, &f.share, f.alice.public_key(), false, false)
            .await;
        assert!(matches!(result, Err(Error::DecryptionFailure(_))));
    }

    #[tokio::test]
    async fn test_local_store_serves_offline_resolver() {
        let f = fixture().await;
        f.resolver
            .get_vault_keys(&f.alice, &f.share, f.alice.public_key(), false, true)
            .await
            .unwrap();
        assert!(f
            .local
            .load(&f.alice.address_id, &f.share)
            .await
            .unwrap()
            .is_some());

        f.server.set_offline(true);
        let fresh = resolver_for(f.server.clone(), f.local.clone());
        let keys = fresh
            .get_vault_keys(&f.alice, &f.share, f.alice.public_key(), false, false)
            .await
            .unwrap();
        assert_eq!(keys[0].private_key(), f.bundle.vault_key.private_key());
    }

    #[tokio::test]
    async fn test_corrupted_local_records_fall_back_to_remote() {
        let f = fixture().await;
        f.local
            .put_raw(&f.alice.address_id, &f.share, b"garbage".to_vec())
            .await;

        let keys = f.vault_keys(false).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(f.server.vault_key_fetches(), 1);
    }

    #[tokio::test]
    async fn test_observe_vault_keys() {
        let f = fixture().await;

        let states: Vec<_> = f
            .resolver
            .observe_vault_keys(&f.alice, &f.share, f.alice.public_key(), false, false)
            .collect()
            .await;
        assert_eq!(states.len(), 2);
        assert!(states[0].is_loading());
        assert_eq!(states[1].value().map(|keys| keys.len()), Some(1));

        f.server.set_offline(true);
        let states: Vec<_> = f
            .resolver
            .observe_vault_keys(&f.alice, &f.share, f.alice.public_key(), true, false)
            .collect()
            .await;
        assert!(states[0].is_loading());
        assert!(matches!(states[1], Resource::Error(Error::Transport(_))));
        assert_eq!(states.len(), 2);
    }
}
