//! groupcache - Distributed Read-Through Cache
//!
//! Every node runs the same set of named cache groups. A consistent hash ring
//! assigns each key to one owning node; the owner loads misses from the
//! group's backfill and keeps them in its main tier, while other nodes fetch
//! from the owner and keep a copy in a smaller hot tier.
//!
//! # Architecture
//!
//! ```text
//!            get(key)
//!               │
//!        ┌──────▼──────┐   miss   ┌─────────────┐  owner = self  ┌──────────┐
//!        │  CacheGroup │─────────▶│ Coordinator │───────────────▶│ Backfill │
//!        │ (main, hot) │          │(singleflight)│               └──────────┘
//!        └─────────────┘          └──────┬──────┘
//!                                        │ owner = peer
//!                                 ┌──────▼──────┐   HTTP   ┌──────────────┐
//!                                 │   Cluster   │─────────▶│ peer's group │
//!                                 │ (hash ring) │          └──────────────┘
//!                                 └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Sharded LRU tiers with byte or item capacity
//! - [`cluster`] - Peer set and consistent hash ring
//! - [`config`] - YAML group definitions
//! - [`coordinator`] - Collapses concurrent loads of the same key
//! - [`error`] - Error types
//! - [`group`] - Cache groups, backfills and the group registry
//! - [`stats`] - JSON and Prometheus statistics
//! - [`transport`] - HTTP peer protocol and node server

pub mod cache;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod group;
pub mod stats;
pub mod transport;

// Re-export commonly used types
pub use cache::{Capacity, Expiration, TierConfig};
pub use cluster::{Cluster, HashRing, Peer, RingConfig};
pub use config::GroupsFile;
pub use coordinator::RequestCoordinator;
pub use error::{Error, Result};
pub use group::{
    Backfill, BackfillError, CacheGroup, CacheGroupConfig, DirBackfill, FnBackfill,
    GroupRegistry, MapBackfill,
};
pub use stats::StatsAggregator;
pub use transport::{HttpTransport, NodeServer, PeerTransport, ServerState, TransportConfig};
