//! Statistics
//!
//! Point-in-time view of every group on the node, read straight from the
//! atomic counters the groups and tiers keep. Taking a snapshot never pauses
//! traffic; counters read during concurrent requests may be a few
//! operations apart from each other.

mod exposition;

use std::sync::Arc;

use serde::Serialize;

use crate::cache::{hit_ratio, TierStats};
use crate::cluster::RingStats;
use crate::coordinator::CoordinatorStats;
use crate::error::{Error, Result};
use crate::group::{CacheGroup, GroupRegistry};

pub use exposition::render_prometheus;

/// A value per tier
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PerTier {
    pub main: u64,
    pub hot: u64,
}

/// Group-level counters
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct GroupStats {
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub backfills: u64,
    pub backfill_errors: u64,
    pub peer_fetches: u64,
    pub peer_fetch_errors: u64,
    pub peer_requests: u64,
    pub sets: u64,
    pub removes: u64,
    pub evictions: PerTier,
    pub bytes_stored: PerTier,
    pub coordinator: CoordinatorStats,
}

/// Everything known about one group
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupSnapshot {
    pub group: String,
    pub ring: RingStats,
    pub main: TierStats,
    pub hot: TierStats,
    pub counters: GroupStats,
}

impl GroupSnapshot {
    pub fn of(group: &CacheGroup) -> Self {
        let main = group.cache().main().stats();
        let hot = group.cache().hot().stats();
        let c = group.counters();

        Self {
            group: group.name().to_string(),
            ring: group.cluster().stats(),
            counters: GroupStats {
                gets: c.gets,
                hits: c.hits,
                misses: c.misses,
                hit_ratio: hit_ratio(c.hits, c.misses),
                backfills: c.backfills,
                backfill_errors: c.backfill_errors,
                peer_fetches: c.peer_fetches,
                peer_fetch_errors: c.peer_fetch_errors,
                peer_requests: c.peer_requests,
                sets: c.sets,
                removes: c.removes,
                evictions: PerTier {
                    main: main.evictions,
                    hot: hot.evictions,
                },
                bytes_stored: PerTier {
                    main: main.bytes_stored,
                    hot: hot.bytes_stored,
                },
                coordinator: c.coordinator,
            },
            main,
            hot,
        }
    }
}

/// Builds snapshots of every registered group
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    registry: Arc<GroupRegistry>,
}

impl StatsAggregator {
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self { registry }
    }

    /// One entry per group, sorted by name
    pub fn snapshot(&self) -> Vec<GroupSnapshot> {
        let mut snapshots: Vec<GroupSnapshot> = self
            .registry
            .groups()
            .iter()
            .map(|g| GroupSnapshot::of(g))
            .collect();
        snapshots.sort_by(|a, b| a.group.cmp(&b.group));
        snapshots
    }

    pub fn snapshot_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| Error::Internal(format!("Failed to serialize stats: {}", e)))
    }

    /// Prometheus text exposition of the current snapshot
    pub fn prometheus(&self) -> Result<String> {
        render_prometheus(&self.snapshot())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Capacity;
    use crate::cluster::Cluster;
    use crate::group::{CacheGroupConfig, MapBackfill};

    fn aggregator() -> (Arc<GroupRegistry>, StatsAggregator) {
        let cluster = Arc::new(Cluster::standalone("127.0.0.1:9000").unwrap());
        let registry = Arc::new(GroupRegistry::new(cluster));
        let stats = StatsAggregator::new(Arc::clone(&registry));
        (registry, stats)
    }

    #[test]
    fn test_empty_snapshot() {
        let (_, stats) = aggregator();
        assert!(stats.snapshot().is_empty());
        assert_eq!(stats.snapshot_json().unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_snapshot_counts_traffic() {
        let (registry, stats) = aggregator();
        registry
            .add(
                CacheGroupConfig::new("users")
                    .with_capacity(Capacity::Items(2))
                    .with_backfill(MapBackfill::new([("1", "alice"), ("2", "bob"), ("3", "carol")])),
            )
            .unwrap();
        registry.add(CacheGroupConfig::new("avatars")).unwrap();

        for key in ["1", "1", "2", "3", "4"] {
            let _ = registry.get_value("users", key).await;
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].group, "avatars");

        let users = &snapshot[1];
        assert_eq!(users.counters.hits, 1);
        assert_eq!(users.counters.misses, 4);
        assert_eq!(users.counters.backfills, 4);
        assert_eq!(users.counters.backfill_errors, 1);
        assert_eq!(users.counters.evictions.main, 1);
        assert_eq!(users.counters.bytes_stored.main, users.main.bytes_stored);
        assert_eq!(users.main.items, 2);
        assert_eq!(users.main.capacity_unit, "items");
        assert_eq!(users.ring.peers, 1);
        assert_eq!(users.ring.owned_fraction, 1.0);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let (registry, stats) = aggregator();
        registry.add(CacheGroupConfig::new("users")).unwrap();

        let json: serde_json::Value = serde_json::from_str(&stats.snapshot_json().unwrap()).unwrap();
        let group = &json[0];
        assert_eq!(group["group"], "users");
        for field in ["ring", "main", "hot", "counters"] {
            assert!(group.get(field).is_some(), "missing {}", field);
        }
        assert!(group["counters"]["evictions"].get("hot").is_some());
    }
}
