//! Cache Groups
//!
//! A group is a named keyspace with its own backfill, expiration policy and
//! pair of LRU tiers. Every group on a node shares the node's [`Cluster`].
//!
//! # Get path
//!
//! ```text
//! get(key)
//!   ├─ owner = ring.lookup(key)
//!   ├─ tier hit (main if owned, hot otherwise) ──────────────▶ value
//!   └─ miss ─▶ coordinator.run(group, key)
//!                ├─ owned:  backfill(key)   ─▶ main tier ──▶ value
//!                └─ remote: fetch from owner ─▶ hot tier ──▶ value
//! ```
//!
//! Failures are never cached.

mod backfill;
mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::{Capacity, CacheTier, Expiration, TierConfig, TieredCache};
use crate::cluster::{Cluster, Peer};
use crate::coordinator::{CoordinatorStats, RequestCoordinator};
use crate::error::{Error, Result};

pub use backfill::{Backfill, BackfillError, DirBackfill, FnBackfill, MapBackfill};
pub use registry::GroupRegistry;

// =============================================================================
// Configuration
// =============================================================================

/// Group configuration
#[derive(Clone, Default)]
pub struct CacheGroupConfig {
    /// Unique, non-empty group name
    pub name: String,

    /// Tier for keys this node owns
    pub main: TierConfig,

    /// Tier for keys fetched from their owner
    pub hot: TierConfig,

    /// Default lifetime of cached values; `None` keeps them until evicted
    pub item_expiration: Option<Duration>,

    /// Source for owned keys nobody has cached
    pub backfill: Option<Arc<dyn Backfill>>,
}

impl CacheGroupConfig {
    /// Default tiers, no expiration, no backfill
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            main: TierConfig::main_default(),
            hot: TierConfig::hot_default(),
            item_expiration: None,
            backfill: None,
        }
    }

    /// Size the main tier to `capacity` and the hot tier to an eighth of it
    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.main = TierConfig::new(capacity);
        self.hot = TierConfig::new(capacity.with_amount((capacity.amount() / 8).max(1)));
        self
    }

    pub fn with_hot_capacity(mut self, capacity: Capacity) -> Self {
        self.hot = TierConfig::new(capacity);
        self
    }

    pub fn with_item_expiration(mut self, ttl: Duration) -> Self {
        self.item_expiration = Some(ttl);
        self
    }

    pub fn with_backfill(mut self, backfill: impl Backfill + 'static) -> Self {
        self.backfill = Some(Arc::new(backfill));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::NameRequired);
        }
        if self.main.capacity.unit() != self.hot.capacity.unit() {
            return Err(Error::Config(format!(
                "group '{}' mixes capacity units: main in {}, hot in {}",
                self.name,
                self.main.capacity.unit(),
                self.hot.capacity.unit()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CacheGroupConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGroupConfig")
            .field("name", &self.name)
            .field("main", &self.main)
            .field("hot", &self.hot)
            .field("item_expiration", &self.item_expiration)
            .field("backfill", &self.backfill.is_some())
            .finish()
    }
}

/// The parts of a config that re-registration swaps in place
struct Settings {
    item_expiration: Option<Duration>,
    backfill: Option<Arc<dyn Backfill>>,
}

// =============================================================================
// Counters
// =============================================================================

#[derive(Debug, Default)]
struct GroupCounters {
    gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    backfills: AtomicU64,
    backfill_errors: AtomicU64,
    peer_fetches: AtomicU64,
    peer_fetch_errors: AtomicU64,
    peer_requests: AtomicU64,
    sets: AtomicU64,
    removes: AtomicU64,
}

/// Group-level request counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct GroupCounterStats {
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    pub backfills: u64,
    pub backfill_errors: u64,
    pub peer_fetches: u64,
    pub peer_fetch_errors: u64,
    /// Requests served to other peers
    pub peer_requests: u64,
    pub sets: u64,
    pub removes: u64,
    pub coordinator: CoordinatorStats,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// Cache Group
// =============================================================================

/// A named, distributed, read-through cache
pub struct CacheGroup {
    name: String,
    settings: ArcSwap<Settings>,
    cache: TieredCache,
    cluster: Arc<Cluster>,
    coordinator: RequestCoordinator,
    counters: GroupCounters,
}

impl CacheGroup {
    /// Create a group; use [`GroupRegistry::add`] to make it reachable by name
    pub fn new(config: CacheGroupConfig, cluster: Arc<Cluster>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            cache: TieredCache::new(config.main, config.hot),
            settings: ArcSwap::from_pointee(Settings {
                item_expiration: config.item_expiration,
                backfill: config.backfill,
            }),
            name: config.name,
            cluster,
            coordinator: RequestCoordinator::new(),
            counters: GroupCounters::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn item_expiration(&self) -> Option<Duration> {
        self.settings.load().item_expiration
    }

    /// Swap in a new backfill and expiration and resize both tiers; cached
    /// data stays
    pub(crate) fn reconfigure(&self, config: CacheGroupConfig) -> Result<()> {
        config.validate()?;

        self.settings.store(Arc::new(Settings {
            item_expiration: config.item_expiration,
            backfill: config.backfill,
        }));
        self.cache.main().resize(config.main.capacity);
        self.cache.hot().resize(config.hot.capacity);

        info!(
            group = %self.name,
            main = config.main.capacity.amount(),
            hot = config.hot.capacity.amount(),
            unit = config.main.capacity.unit(),
            "Cache group reconfigured"
        );
        Ok(())
    }

    /// Read-through get
    #[instrument(skip(self), fields(group = %self.name))]
    pub async fn get(self: &Arc<Self>, key: &str) -> Result<Bytes> {
        bump(&self.counters.gets);
        let owner = self.cluster.owner_of(key);
        let local = self.cluster.is_local(&owner);

        let tier = if local { CacheTier::Main } else { CacheTier::Hot };
        if let Some(entry) = self.cache.tier(tier).get(key) {
            bump(&self.counters.hits);
            debug!(%tier, "Cache hit");
            return Ok(entry.into_value());
        }
        // Values written by a local `set` live in main even for remote-owned keys
        if !local {
            if let Some(entry) = self.cache.main().peek(key) {
                bump(&self.counters.hits);
                debug!("Cache hit on locally set value");
                return Ok(entry.into_value());
            }
        }
        bump(&self.counters.misses);
        debug!(%owner, "Cache miss");

        let group = Arc::clone(self);
        let load_key = key.to_string();
        self.coordinator
            .run(&self.name, key, move || async move {
                group.load(load_key, owner).await
            })
            .await
    }

    /// Serve a request from another peer; only keys this node owns are served
    #[instrument(skip(self), fields(group = %self.name))]
    pub async fn serve_peer(self: &Arc<Self>, key: &str) -> Result<Bytes> {
        bump(&self.counters.peer_requests);
        let owner = self.cluster.owner_of(key);
        if !self.cluster.is_local(&owner) {
            debug!(%owner, "Refusing key owned elsewhere");
            return Err(Error::NotOwned {
                group: self.name.clone(),
                key: key.to_string(),
                owner: owner.to_string(),
            });
        }
        self.get(key).await
    }

    /// Produce and cache the value for a miss; runs once per coalesced load
    async fn load(&self, key: String, owner: Peer) -> Result<Bytes> {
        let now = Utc::now();
        let expire_at = Expiration::DefaultPolicy.resolve(self.item_expiration(), now);

        if self.cluster.is_local(&owner) {
            // A load that finished just before this one started may have filled it
            if let Some(entry) = self.cache.main().peek(&key) {
                return Ok(entry.into_value());
            }
            let value = self.backfill(&key).await?;
            self.store(CacheTier::Main, key, value.clone(), expire_at);
            Ok(value)
        } else {
            bump(&self.counters.peer_fetches);
            match self.cluster.fetch(&owner, &self.name, &key).await {
                Ok(value) => {
                    self.store(CacheTier::Hot, key, value.clone(), expire_at);
                    Ok(value)
                }
                Err(e) => {
                    bump(&self.counters.peer_fetch_errors);
                    warn!(%owner, "Peer fetch failed: {}", e);
                    Err(e)
                }
            }
        }
    }

    async fn backfill(&self, key: &str) -> Result<Bytes> {
        let Some(backfill) = self.settings.load().backfill.clone() else {
            return Err(Error::NilBackfill {
                group: self.name.clone(),
            });
        };

        bump(&self.counters.backfills);
        match backfill.fetch(key).await {
            Ok(value) => {
                debug!(key, bytes = value.len(), "Backfilled");
                Ok(value)
            }
            Err(BackfillError::NotFound) => {
                bump(&self.counters.backfill_errors);
                Err(Error::ItemNotFound {
                    group: self.name.clone(),
                    key: key.to_string(),
                })
            }
            Err(BackfillError::Other(source)) => {
                bump(&self.counters.backfill_errors);
                warn!(key, "Backfill failed: {}", source);
                Err(Error::backfill(&self.name, key, source))
            }
        }
    }

    fn store(&self, tier: CacheTier, key: String, value: Bytes, expire_at: Option<DateTime<Utc>>) {
        if !self.cache.tier(tier).put(key, value, expire_at) {
            warn!(%tier, "Value larger than tier capacity; not cached");
        }
    }

    /// Store `value` in the main tier with the group's default expiration
    pub fn set(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.set_with_expiration(key, value, Expiration::DefaultPolicy);
    }

    /// Store `value` in the main tier, expiring at `expire_at`
    pub fn set_to_expire_at(
        &self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        expire_at: DateTime<Utc>,
    ) {
        self.set_with_expiration(key, value, Expiration::ExpireAt(expire_at));
    }

    /// Store `value` in the main tier, dropping any hot-tier copy so later
    /// reads see the new value
    pub fn set_with_expiration(
        &self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        expiration: Expiration,
    ) {
        bump(&self.counters.sets);
        let key = key.into();
        let expire_at = expiration.resolve(self.item_expiration(), Utc::now());
        self.cache.hot().remove(&key);
        self.store(CacheTier::Main, key, value.into(), expire_at);
    }

    /// Drop `key` from both local tiers and ask every peer to do the same
    ///
    /// Returns whether this node held it.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.remove_local(key);
        self.cluster.broadcast_remove(&self.name, key);
        removed
    }

    /// Drop `key` from both local tiers only
    pub fn remove_local(&self, key: &str) -> bool {
        bump(&self.counters.removes);
        self.cache.remove(key)
    }

    pub fn counters(&self) -> GroupCounterStats {
        let c = &self.counters;
        GroupCounterStats {
            gets: c.gets.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            backfills: c.backfills.load(Ordering::Relaxed),
            backfill_errors: c.backfill_errors.load(Ordering::Relaxed),
            peer_fetches: c.peer_fetches.load(Ordering::Relaxed),
            peer_fetch_errors: c.peer_fetch_errors.load(Ordering::Relaxed),
            peer_requests: c.peer_requests.load(Ordering::Relaxed),
            sets: c.sets.load(Ordering::Relaxed),
            removes: c.removes.load(Ordering::Relaxed),
            coordinator: self.coordinator.stats(),
        }
    }
}

impl std::fmt::Debug for CacheGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGroup")
            .field("name", &self.name)
            .field("cache", &self.cache)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::RingConfig;
    use crate::transport::{PeerTransport, TransportConfig};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Answers every fetch with `remote:{key}`
    #[derive(Default)]
    struct FakeTransport {
        fetches: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn fetch(&self, peer: &Peer, _group: &str, key: &str) -> Result<Bytes> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Transport {
                    peer: peer.to_string(),
                    reason: "connection refused".into(),
                });
            }
            Ok(Bytes::from(format!("remote:{}", key)))
        }

        async fn remove(&self, _peer: &Peer, _group: &str, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn standalone() -> Arc<Cluster> {
        Arc::new(
            Cluster::new(
                "127.0.0.1:9000",
                RingConfig::default(),
                TransportConfig::default(),
                Arc::new(FakeTransport::default()),
            )
            .unwrap(),
        )
    }

    /// Two-node cluster seen from 127.0.0.1:9000, plus a key owned by each side
    fn two_nodes(transport: Arc<FakeTransport>) -> (Arc<Cluster>, String, String) {
        let cluster = Cluster::new(
            "127.0.0.1:9000",
            RingConfig::default(),
            TransportConfig::default(),
            transport,
        )
        .unwrap();
        cluster.set_peers(["127.0.0.1:9000", "127.0.0.1:9001"]).unwrap();

        let key_owned_by = |local: bool| {
            (0..)
                .map(|i| format!("key-{}", i))
                .find(|k| cluster.is_local(&cluster.owner_of(k)) == local)
                .unwrap()
        };
        let local_key = key_owned_by(true);
        let remote_key = key_owned_by(false);
        (Arc::new(cluster), local_key, remote_key)
    }

    fn counting_backfill(calls: Arc<AtomicUsize>) -> impl Backfill {
        FnBackfill::new(move |key: String| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                match key.as_str() {
                    "1" => Ok(Bytes::from_static(b"alice")),
                    "broken" => Err(BackfillError::other("database unavailable")),
                    _ => Err(BackfillError::NotFound),
                }
            }
        })
    }

    fn users(calls: &Arc<AtomicUsize>) -> Arc<CacheGroup> {
        let config = CacheGroupConfig::new("users")
            .with_capacity(Capacity::Items(100))
            .with_backfill(counting_backfill(Arc::clone(calls)));
        Arc::new(CacheGroup::new(config, standalone()).unwrap())
    }

    #[test]
    fn test_config_validation() {
        assert_matches!(CacheGroupConfig::new("").validate(), Err(Error::NameRequired));
        let mixed = CacheGroupConfig::new("g")
            .with_capacity(Capacity::Items(10))
            .with_hot_capacity(Capacity::Bytes(10));
        assert_matches!(mixed.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_with_capacity_sizes_hot_tier() {
        let config = CacheGroupConfig::new("g").with_capacity(Capacity::Items(800));
        assert_eq!(config.main.capacity, Capacity::Items(800));
        assert_eq!(config.hot.capacity, Capacity::Items(100));
    }

    #[tokio::test]
    async fn test_first_get_backfills_second_hits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = users(&calls);

        assert_eq!(group.get("1").await.unwrap(), Bytes::from_static(b"alice"));
        assert_eq!(group.get("1").await.unwrap(), Bytes::from_static(b"alice"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counters = group.counters();
        assert_eq!(counters.gets, 2);
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.backfills, 1);
        assert_eq!(group.cache().main().len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = users(&calls);

        assert_matches!(group.get("2").await, Err(Error::ItemNotFound { key, .. }) if key == "2");
        assert_matches!(group.get("2").await, Err(Error::ItemNotFound { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(group.counters().backfill_errors, 2);
    }

    #[tokio::test]
    async fn test_backfill_failure_is_wrapped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = users(&calls);

        let err = group.get("broken").await.unwrap_err();
        assert_matches!(err, Error::Backfill { .. });
        assert!(err.to_string().contains("database unavailable"));
        assert!(group.cache().main().is_empty());
    }

    #[tokio::test]
    async fn test_nil_backfill() {
        let group = Arc::new(CacheGroup::new(CacheGroupConfig::new("empty"), standalone()).unwrap());
        assert_matches!(group.get("1").await, Err(Error::NilBackfill { group }) if group == "empty");
    }

    #[tokio::test]
    async fn test_set_then_get_skips_backfill() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = users(&calls);

        group.set("k", "v");
        assert_eq!(group.get("k").await.unwrap(), Bytes::from_static(b"v"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_to_expire_in_past_is_a_miss() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = users(&calls);

        group.set_to_expire_at("1", "stale", Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(group.get("1").await.unwrap(), Bytes::from_static(b"alice"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_expiration_applies() {
        let config = CacheGroupConfig::new("ttl")
            .with_capacity(Capacity::Items(10))
            .with_item_expiration(Duration::from_secs(60));
        let group = CacheGroup::new(config, standalone()).unwrap();

        group.set("a", "1");
        group.set_with_expiration("b", "2", Expiration::NoExpiry);

        let a = group.cache().main().peek("a").unwrap();
        assert!(a.expire_at().unwrap() > Utc::now());
        assert!(group.cache().main().peek("b").unwrap().expire_at().is_none());
    }

    #[tokio::test]
    async fn test_eviction_forces_backfill_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backfill = FnBackfill::new({
            let calls = Arc::clone(&calls);
            move |key: String| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Bytes::from(key)) }
            }
        });
        let config = CacheGroupConfig::new("small")
            .with_capacity(Capacity::Items(3))
            .with_backfill(backfill);
        let group = Arc::new(CacheGroup::new(config, standalone()).unwrap());

        for key in ["a", "b", "c", "d"] {
            group.get(key).await.unwrap();
        }
        assert_eq!(group.cache().main().stats().evictions, 1);

        group.get("a").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_concurrent_cold_gets_backfill_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backfill = FnBackfill::new({
            let calls = Arc::clone(&calls);
            move |_key: String| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Bytes::from_static(b"shared"))
                }
            }
        });
        let config = CacheGroupConfig::new("dedup").with_backfill(backfill);
        let group = Arc::new(CacheGroup::new(config, standalone()).unwrap());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let group = Arc::clone(&group);
                tokio::spawn(async move { group.get("hot-key").await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Bytes::from_static(b"shared"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_key_goes_to_hot_tier() {
        let transport = Arc::new(FakeTransport::default());
        let (cluster, local_key, remote_key) = two_nodes(Arc::clone(&transport));
        let calls = Arc::new(AtomicUsize::new(0));
        let config = CacheGroupConfig::new("users")
            .with_capacity(Capacity::Items(100))
            .with_backfill(counting_backfill(Arc::clone(&calls)));
        let group = Arc::new(CacheGroup::new(config, cluster).unwrap());

        let value = group.get(&remote_key).await.unwrap();
        assert_eq!(value, Bytes::from(format!("remote:{}", remote_key)));
        assert!(group.cache().hot().contains(&remote_key));
        assert!(!group.cache().main().contains(&remote_key));

        // Second read is served from the hot tier
        group.get(&remote_key).await.unwrap();
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(group.counters().peer_fetches, 1);

        // Owned keys never touch the transport
        assert_matches!(group.get(&local_key).await, Err(Error::ItemNotFound { .. }));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peer_failure_reaches_caller() {
        let transport = Arc::new(FakeTransport {
            fail: true,
            ..Default::default()
        });
        let (cluster, _, remote_key) = two_nodes(transport);
        let group = Arc::new(CacheGroup::new(CacheGroupConfig::new("users"), cluster).unwrap());

        let err = group.get(&remote_key).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(group.counters().peer_fetch_errors, 1);
        assert!(group.cache().hot().is_empty());
    }

    #[tokio::test]
    async fn test_serve_peer_refuses_remote_keys() {
        let (cluster, local_key, remote_key) = two_nodes(Arc::default());
        let config = CacheGroupConfig::new("users").with_backfill(MapBackfill::new([(
            local_key.clone(),
            "mine",
        )]));
        let group = Arc::new(CacheGroup::new(config, cluster).unwrap());

        assert_eq!(group.serve_peer(&local_key).await.unwrap(), Bytes::from_static(b"mine"));
        assert_matches!(
            group.serve_peer(&remote_key).await,
            Err(Error::NotOwned { owner, .. }) if owner == "127.0.0.1:9001"
        );
    }

    #[tokio::test]
    async fn test_set_is_readable_for_remote_keys() {
        let transport = Arc::new(FakeTransport::default());
        let (cluster, _, remote_key) = two_nodes(Arc::clone(&transport));
        let group = Arc::new(CacheGroup::new(CacheGroupConfig::new("users"), cluster).unwrap());

        group.set(remote_key.clone(), "local");
        assert_eq!(group.get(&remote_key).await.unwrap(), Bytes::from_static(b"local"));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_after_fetch_replaces_hot_copy() {
        let transport = Arc::new(FakeTransport::default());
        let (cluster, _, remote_key) = two_nodes(Arc::clone(&transport));
        let group = Arc::new(CacheGroup::new(CacheGroupConfig::new("users"), cluster).unwrap());

        let fetched = group.get(&remote_key).await.unwrap();
        assert_eq!(fetched, Bytes::from(format!("remote:{}", remote_key)));
        assert!(group.cache().hot().contains(&remote_key));

        group.set(remote_key.clone(), "local");
        assert!(!group.cache().hot().contains(&remote_key));
        assert_eq!(group.get(&remote_key).await.unwrap(), Bytes::from_static(b"local"));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_clears_both_tiers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = users(&calls);

        group.get("1").await.unwrap();
        group.cache().hot().put("1", Bytes::from_static(b"copy"), None);
        assert!(group.remove("1"));
        assert!(!group.cache().main().contains("1"));
        assert!(!group.cache().hot().contains("1"));

        group.get("1").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_data_and_resizes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = users(&calls);
        for i in 0..10 {
            group.set(format!("k{}", i), "v");
        }

        let replacement = CacheGroupConfig::new("users")
            .with_capacity(Capacity::Items(4))
            .with_backfill(MapBackfill::new([("1", "bob")]));
        group.reconfigure(replacement).unwrap();

        assert_eq!(group.cache().main().len(), 4);
        assert!(group.cache().main().contains("k9"));
        assert_eq!(group.get("1").await.unwrap(), Bytes::from_static(b"bob"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
