//! Group Definitions File
//!
//! YAML description of the groups a node serves at startup:
//!
//! ```yaml
//! groups:
//!   - name: users
//!     capacity: { items: 10000 }
//!     itemExpiration: 5m
//!     backfill:
//!       dir: /srv/users
//!   - name: avatars
//!     capacity: { bytes: 268435456 }
//!     hotCapacity: { bytes: 16777216 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::Capacity;
use crate::error::{Error, Result};
use crate::group::{CacheGroupConfig, DirBackfill};

/// Top-level document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupsFile {
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

/// One group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    /// Group name, unique on the node
    pub name: String,

    /// Main tier bound; the hot tier gets an eighth unless `hot_capacity` is set
    #[serde(default)]
    pub capacity: Option<Capacity>,

    /// Hot tier bound, in the same unit as `capacity`
    #[serde(default)]
    pub hot_capacity: Option<Capacity>,

    /// Default lifetime of cached values (e.g. "30s", "5m", "1h30m")
    #[serde(default)]
    pub item_expiration: Option<String>,

    /// Where owned misses are loaded from
    #[serde(default)]
    pub backfill: Option<BackfillSpec>,
}

/// Backing source for a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillSpec {
    /// One file per key under this directory
    Dir(PathBuf),
}

impl GroupsFile {
    /// Read and parse a groups file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read groups file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid groups file: {}", e)))
    }

    /// Group configurations in file order
    pub fn into_configs(self) -> Result<Vec<CacheGroupConfig>> {
        self.groups.iter().map(GroupSpec::to_config).collect()
    }
}

impl GroupSpec {
    pub fn to_config(&self) -> Result<CacheGroupConfig> {
        let mut config = CacheGroupConfig::new(self.name.clone());

        if let Some(capacity) = self.capacity {
            config = config.with_capacity(capacity);
        }
        if let Some(hot) = self.hot_capacity {
            config = config.with_hot_capacity(hot);
        }
        if let Some(ttl) = &self.item_expiration {
            config = config.with_item_expiration(parse_duration(ttl)?);
        }
        match &self.backfill {
            Some(BackfillSpec::Dir(root)) => {
                config = config.with_backfill(DirBackfill::new(root.clone()));
            }
            None => {}
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parse a duration string like "1h", "30m", "90s", "1d" or "1h30m"
///
/// A trailing bare number is taken as seconds. Zero is rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config("empty duration string".to_string()));
    }

    let invalid = || Error::Config(format!("invalid number in duration: {}", s));
    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf.parse().map_err(|_| invalid())?;
        num_buf.clear();

        let multiplier = match c {
            'd' | 'D' => 86400,
            'h' | 'H' => 3600,
            'm' | 'M' => 60,
            's' | 'S' => 1,
            _ => return Err(Error::Config(format!("unknown duration unit: {}", c))),
        };
        total_secs = num
            .checked_mul(multiplier)
            .and_then(|n| total_secs.checked_add(n))
            .ok_or_else(invalid)?;
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf.parse().map_err(|_| invalid())?;
        total_secs = total_secs.checked_add(num).ok_or_else(invalid)?;
    }

    if total_secs == 0 {
        return Err(Error::Config(format!("duration must be positive: {}", s)));
    }
    Ok(Duration::from_secs(total_secs))
}

// =============================================================================
// Tests
// =============================================================================
