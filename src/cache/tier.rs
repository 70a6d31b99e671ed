//! Tiered LRU
//!
//! Two independent LRU tiers per group:
//!
//! - **Main**: keys this node owns, filled by local backfills and `set`
//! - **Hot**: keys owned elsewhere that this node fetched from the owner
//!
//! # Design
//!
//! - Each tier is split into power-of-two shards, one lock per shard
//! - Capacity is enforced over the whole tier: a tier-wide budget tracks
//!   usage, and eviction pops whichever shard tail has the oldest recency tick
//! - Reads only take their shard's lock; writes also hold the budget lock
//! - Expiry is lazy: checked on read; an expired entry popped by eviction
//!   counts as an expiration rather than an eviction

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::entry::CacheEntry;
use super::metrics::{TierMetrics, TierStats};
use super::policy::Capacity;
use super::shard::{shard_hash, Lookup, Shard};
use super::{DEFAULT_HOT_CAPACITY_BYTES, DEFAULT_MAIN_CAPACITY_BYTES, DEFAULT_SHARDS};

/// Which tier of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// Authoritative for keys this node owns
    Main,
    /// Opportunistic copies of remote-owned keys
    Hot,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Main => "main",
            CacheTier::Hot => "hot",
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierConfig {
    /// Bound and unit
    pub capacity: Capacity,
    /// Requested shard count (rounded up to a power of two)
    pub shards: usize,
}

impl TierConfig {
    pub fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            shards: DEFAULT_SHARDS,
        }
    }

    pub fn main_default() -> Self {
        Self::new(Capacity::Bytes(DEFAULT_MAIN_CAPACITY_BYTES))
    }

    pub fn hot_default() -> Self {
        Self::new(Capacity::Bytes(DEFAULT_HOT_CAPACITY_BYTES))
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::main_default()
    }
}

/// Bound and current usage, in the capacity's unit
#[derive(Debug)]
struct Budget {
    capacity: Capacity,
    used: u64,
}

/// Entries reclaimed by one eviction pass
#[derive(Debug, Default, Clone, Copy)]
struct Reclaimed {
    evicted: u64,
    expired: u64,
}

/// One LRU tier
pub struct TierCache {
    tier: CacheTier,
    shards: Box<[Shard]>,
    mask: usize,
    budget: Mutex<Budget>,
    /// Recency clock stamped on every insert and hit
    clock: AtomicU64,
    metrics: TierMetrics,
}

impl TierCache {
    /// Create a tier
    pub fn new(tier: CacheTier, config: TierConfig) -> Self {
        let count = config.shards.max(1).next_power_of_two();
        let shards: Vec<Shard> = (0..count).map(|_| Shard::new()).collect();

        Self {
            tier,
            shards: shards.into_boxed_slice(),
            mask: count - 1,
            budget: Mutex::new(Budget {
                capacity: config.capacity,
                used: 0,
            }),
            clock: AtomicU64::new(0),
            metrics: TierMetrics::new(),
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard {
        &self.shards[(shard_hash(key) as usize) & self.mask]
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Pop globally least recently used entries until usage fits the bound
    fn evict_to_fit(&self, budget: &mut Budget, now: DateTime<Utc>) -> Reclaimed {
        let mut reclaimed = Reclaimed::default();
        while budget.used > budget.capacity.amount() {
            let oldest = self
                .shards
                .iter()
                .filter_map(|shard| shard.oldest_tick().map(|tick| (tick, shard)))
                .min_by_key(|(tick, _)| *tick);
            let Some((key, entry)) = oldest.and_then(|(_, shard)| shard.pop_oldest()) else {
                break;
            };

            let cost = budget.capacity.cost(key.len(), entry.value().len());
            budget.used = budget.used.saturating_sub(cost);
            if entry.is_expired_at(now) {
                reclaimed.expired += 1;
            } else {
                reclaimed.evicted += 1;
            }
        }
        reclaimed
    }

    fn account(&self, reclaimed: Reclaimed) {
        self.metrics.record_evictions(reclaimed.evicted);
        self.metrics.record_expirations(reclaimed.expired);
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    /// Get a live entry; expired entries count as a miss and are dropped
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let shard = self.shard(key);
        match shard.get(key, now, self.tick()) {
            Lookup::Hit(entry) => {
                self.metrics.record_hit();
                Some(entry)
            }
            Lookup::Expired => {
                let mut budget = self.budget.lock();
                if let Some(entry) = shard.remove_expired(key, now) {
                    let cost = budget.capacity.cost(key.len(), entry.value().len());
                    budget.used = budget.used.saturating_sub(cost);
                    self.metrics.record_expirations(1);
                }
                drop(budget);
                self.metrics.record_miss();
                None
            }
            Lookup::Miss => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Insert a value. Returns false if it is larger than the whole tier; an
    /// older value under the same key is dropped in that case.
    pub fn put(&self, key: impl Into<String>, value: Bytes, expire_at: Option<DateTime<Utc>>) -> bool {
        let key = key.into();
        let now = Utc::now();
        let shard = self.shard(&key);
        let key_len = key.len();

        let mut budget = self.budget.lock();
        let cost = budget.capacity.cost(key_len, value.len());
        if cost > budget.capacity.amount() {
            if let Some(old) = shard.remove(&key) {
                let old_cost = budget.capacity.cost(key_len, old.value().len());
                budget.used = budget.used.saturating_sub(old_cost);
            }
            drop(budget);
            self.metrics.record_rejected();
            return false;
        }

        let entry = CacheEntry::with_expiry(value, expire_at);
        if let Some(old) = shard.insert(key, entry, self.tick()) {
            let old_cost = budget.capacity.cost(key_len, old.value().len());
            budget.used = budget.used.saturating_sub(old_cost);
        }
        budget.used += cost;
        let reclaimed = self.evict_to_fit(&mut budget, now);
        drop(budget);

        self.account(reclaimed);
        self.metrics.record_put();
        true
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        let mut budget = self.budget.lock();
        let removed = self.shard(key).remove(key)?;
        let cost = budget.capacity.cost(key.len(), removed.value().len());
        budget.used = budget.used.saturating_sub(cost);
        drop(budget);

        self.metrics.record_removal();
        Some(removed)
    }

    /// Live entry without touching recency or stats
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.shard(key).peek(key).filter(|e| !e.is_expired())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Change the bound, evicting down to it immediately
    pub fn resize(&self, capacity: Capacity) {
        let mut budget = self.budget.lock();
        if capacity.unit() != budget.capacity.unit() {
            budget.used = self
                .shards
                .iter()
                .map(|shard| shard.total_cost(|k, v| capacity.cost(k, v)))
                .sum();
        }
        budget.capacity = capacity;
        let reclaimed = self.evict_to_fit(&mut budget, Utc::now());
        drop(budget);

        self.account(reclaimed);
    }

    /// Number of entries (expired-but-unread entries included)
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Key + value bytes held
    pub fn size_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.size_bytes()).sum()
    }

    pub fn capacity(&self) -> Capacity {
        self.budget.lock().capacity
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn metrics(&self) -> &TierMetrics {
        &self.metrics
    }

    /// Counters plus current size
    pub fn stats(&self) -> TierStats {
        let capacity = self.capacity();
        let mut stats = self.metrics.snapshot();
        stats.items = self.len() as u64;
        stats.bytes_stored = self.size_bytes();
        stats.capacity = capacity.amount();
        stats.capacity_unit = capacity.unit();
        stats
    }
}

impl std::fmt::Debug for TierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierCache")
            .field("tier", &self.tier)
            .field("shards", &self.shards.len())
            .field("capacity", &self.capacity())
            .field("items", &self.len())
            .finish()
    }
}

/// Main + hot tier pair for one group
#[derive(Debug)]
pub struct TieredCache {
    main: TierCache,
    hot: TierCache,
}

impl TieredCache {
    pub fn new(main: TierConfig, hot: TierConfig) -> Self {
        Self {
            main: TierCache::new(CacheTier::Main, main),
            hot: TierCache::new(CacheTier::Hot, hot),
        }
    }

    pub fn main(&self) -> &TierCache {
        &self.main
    }

    pub fn hot(&self) -> &TierCache {
        &self.hot
    }

    pub fn tier(&self, tier: CacheTier) -> &TierCache {
        match tier {
            CacheTier::Main => &self.main,
            CacheTier::Hot => &self.hot,
        }
    }

    /// Remove a key from both tiers; true if either held it
    pub fn remove(&self, key: &str) -> bool {
        let main = self.main.remove(key).is_some();
        let hot = self.hot.remove(key).is_some();
        main || hot
    }
}

// =============================================================================
// Tests
// =============================================================================
