//! Group Registry
//!
//! Name → group table. Readers load an immutable map snapshot; `add` copies
//! the map under a writer lock and publishes the copy.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::info;

use super::{CacheGroup, CacheGroupConfig};
use crate::cluster::Cluster;
use crate::error::{Error, Result};

type GroupMap = HashMap<String, Arc<CacheGroup>>;

/// Every cache group on this node
pub struct GroupRegistry {
    cluster: Arc<Cluster>,
    groups: ArcSwap<GroupMap>,
    writer: Mutex<()>,
}

impl GroupRegistry {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self {
            cluster,
            groups: ArcSwap::from_pointee(GroupMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Register a group, or reconfigure the one already using its name
    ///
    /// Re-registration keeps cached values: the backfill and expiration are
    /// replaced and both tiers are resized to the new capacities.
    pub fn add(&self, config: CacheGroupConfig) -> Result<Arc<CacheGroup>> {
        config.validate()?;

        let _guard = self.writer.lock();
        if let Some(existing) = self.groups.load().get(&config.name) {
            existing.reconfigure(config)?;
            return Ok(Arc::clone(existing));
        }

        let name = config.name.clone();
        let group = Arc::new(CacheGroup::new(config, Arc::clone(&self.cluster))?);
        let mut next = GroupMap::clone(&self.groups.load());
        next.insert(name.clone(), Arc::clone(&group));
        self.groups.store(Arc::new(next));

        info!(group = %name, "Cache group registered");
        Ok(group)
    }

    /// Look up a group by name
    pub fn get(&self, name: &str) -> Result<Arc<CacheGroup>> {
        self.groups
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))
    }

    /// Registered names, in no particular order
    pub fn names(&self) -> Vec<String> {
        self.groups.load().keys().cloned().collect()
    }

    /// Every registered group
    pub fn groups(&self) -> Vec<Arc<CacheGroup>> {
        self.groups.load().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.load().is_empty()
    }

    /// Read-through get of `key` in group `name`
    pub async fn get_value(&self, name: &str, key: &str) -> Result<Bytes> {
        self.get(name)?.get(key).await
    }
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.names())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
