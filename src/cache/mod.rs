//! Two-Tier Group Cache
//!
//! Per-group storage: a main tier for keys this node owns and a hot tier for
//! copies of keys owned by peers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          TieredCache (per group)                          │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Main tier (owned keys)             │  Hot tier (remote-owned keys)       │
//! │  ┌──────────────────────────────┐   │  ┌──────────────────────────────┐   │
//! │  │ Shard 0 │ Shard 1 │ ... │ N  │   │  │ Shard 0 │ Shard 1 │ ... │ N  │   │
//! │  │ (Mutex<LruCache>)            │   │  │ (Mutex<LruCache>)            │   │
//! │  └──────────────────────────────┘   │  └──────────────────────────────┘   │
//! │         fed by backfill / set       │        fed by peer fetches          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Independent capacity and LRU eviction per tier
//! - Capacity in items or bytes, one unit per group
//! - Lazy expiry, no sweeper thread
//! - Cache-line padded shards

mod entry;
mod metrics;
mod policy;
mod shard;
mod tier;

pub use entry::CacheEntry;
pub use metrics::{TierMetrics, TierStats};
pub(crate) use metrics::hit_ratio;
pub use policy::{Capacity, Expiration};
pub use shard::{Lookup, Shard};
pub use tier::{CacheTier, TierCache, TierConfig, TieredCache};

/// Default shard count requested per tier
pub const DEFAULT_SHARDS: usize = 16;

/// Cache line size for alignment (x86-64)
pub const CACHE_LINE_SIZE: usize = 64;

/// Default main tier capacity (64MB)
pub const DEFAULT_MAIN_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;

/// Default hot tier capacity (8MB, an eighth of main)
pub const DEFAULT_HOT_CAPACITY_BYTES: u64 = DEFAULT_MAIN_CAPACITY_BYTES / 8;

// =============================================================================
// Tests
// =============================================================================
