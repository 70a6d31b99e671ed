//! LRU Shard
//!
//! One slice of a tier: an LRU list behind its own lock, with lock-free
//! size counters for stats. Shards hold no bound of their own; the tier
//! enforces its capacity across all of them.
//!
//! # Design
//!
//! - Each shard has its own Mutex (LRU reads reorder the list, so no RwLock)
//! - Every slot carries the tier-wide recency tick of its last insert or hit,
//!   so the tier can find the globally least recently used entry by comparing
//!   shard tails
//! - Cache-line padding between shards prevents false sharing

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;

use super::entry::CacheEntry;
use super::CACHE_LINE_SIZE;

/// Seed for shard selection; the ring uses a different one
const SHARD_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Hash a key to pick its shard
#[inline]
pub(crate) fn shard_hash(key: &str) -> u64 {
    xxhash_rust::xxh64::xxh64(key.as_bytes(), SHARD_SEED)
}

/// Result of a shard lookup
#[derive(Debug)]
pub enum Lookup {
    /// Live entry
    Hit(CacheEntry),
    /// Entry is present but expired; the caller drops it with
    /// [`Shard::remove_expired`]
    Expired,
    /// No entry
    Miss,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

/// Single shard of a tier
#[repr(C)]
pub struct Shard {
    lru: Mutex<LruCache<String, Slot>>,
    /// Number of entries
    count: AtomicU64,
    /// Key + value bytes held
    size_bytes: AtomicU64,
    /// Padding to prevent false sharing
    _padding: [u8; CACHE_LINE_SIZE - 16],
}

impl Default for Shard {
    fn default() -> Self {
        Self::new()
    }
}

impl Shard {
    pub fn new() -> Self {
        Self {
            lru: Mutex::new(LruCache::unbounded()),
            count: AtomicU64::new(0),
            size_bytes: AtomicU64::new(0),
            _padding: [0; CACHE_LINE_SIZE - 16],
        }
    }

    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get total key + value bytes held
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Look up a key, stamping it with `tick` on a hit
    pub fn get(&self, key: &str, now: DateTime<Utc>, tick: u64) -> Lookup {
        let mut lru = self.lru.lock();
        match lru.get_mut(key) {
            None => Lookup::Miss,
            Some(slot) if slot.entry.is_expired_at(now) => Lookup::Expired,
            Some(slot) => {
                slot.tick = tick;
                Lookup::Hit(slot.entry.clone())
            }
        }
    }

    /// Remove `key` only if it is still present and expired at `now`
    pub fn remove_expired(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut lru = self.lru.lock();
        if !lru.peek(key)?.entry.is_expired_at(now) {
            return None;
        }
        let (k, slot) = lru.pop_entry(key)?;
        self.forget(&k, &slot.entry);
        Some(slot.entry)
    }

    /// Look up without touching recency or expiring anything
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.lru.lock().peek(key).map(|slot| slot.entry.clone())
    }

    /// Insert as most recently used, returning the entry it replaced
    pub fn insert(&self, key: String, entry: CacheEntry, tick: u64) -> Option<CacheEntry> {
        let mut lru = self.lru.lock();
        let replaced = lru.pop_entry(key.as_str()).map(|(k, old)| {
            self.forget(&k, &old.entry);
            old.entry
        });

        self.count.fetch_add(1, Ordering::Relaxed);
        self.size_bytes
            .fetch_add((key.len() + entry.value().len()) as u64, Ordering::Relaxed);
        lru.push(key, Slot { entry, tick });
        replaced
    }

    /// Remove a key, returning its entry if present
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        let mut lru = self.lru.lock();
        let (k, slot) = lru.pop_entry(key)?;
        self.forget(&k, &slot.entry);
        Some(slot.entry)
    }

    /// Recency tick of this shard's least recently used entry
    pub fn oldest_tick(&self) -> Option<u64> {
        self.lru.lock().peek_lru().map(|(_, slot)| slot.tick)
    }

    /// Remove this shard's least recently used entry
    pub fn pop_oldest(&self) -> Option<(String, CacheEntry)> {
        let mut lru = self.lru.lock();
        let (k, slot) = lru.pop_lru()?;
        self.forget(&k, &slot.entry);
        Some((k, slot.entry))
    }

    /// Sum of `cost(key_len, value_len)` over every entry
    pub fn total_cost(&self, cost: impl Fn(usize, usize) -> u64) -> u64 {
        self.lru
            .lock()
            .iter()
            .map(|(k, slot)| cost(k.len(), slot.entry.value().len()))
            .sum()
    }

    /// Account for an entry that has left the LRU list
    fn forget(&self, key: &str, entry: &CacheEntry) {
        self.count.fetch_sub(1, Ordering::Relaxed);
        self.size_bytes
            .fetch_sub((key.len() + entry.value().len()) as u64, Ordering::Relaxed);
    }
}

// =============================================================================
// Tests
// =============================================================================
