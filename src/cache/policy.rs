//! Capacity and Expiration Policies
//!
//! How a tier measures its bound and how a write decides its expiry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tier capacity and the unit it is measured in
///
/// A group uses one unit for both of its tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// Maximum number of entries
    Items(u64),
    /// Maximum total of key + value bytes
    Bytes(u64),
}

impl Capacity {
    /// Raw bound in this capacity's unit
    pub fn amount(&self) -> u64 {
        match self {
            Capacity::Items(n) | Capacity::Bytes(n) => *n,
        }
    }

    /// Cost of storing one entry, in this capacity's unit
    #[inline]
    pub fn cost(&self, key_len: usize, value_len: usize) -> u64 {
        match self {
            Capacity::Items(_) => 1,
            Capacity::Bytes(_) => (key_len + value_len) as u64,
        }
    }

    /// Same unit, different bound
    pub fn with_amount(&self, amount: u64) -> Self {
        match self {
            Capacity::Items(_) => Capacity::Items(amount),
            Capacity::Bytes(_) => Capacity::Bytes(amount),
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Capacity::Items(_) => "items",
            Capacity::Bytes(_) => "bytes",
        }
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity::Bytes(super::DEFAULT_MAIN_CAPACITY_BYTES)
    }
}

/// Expiration requested for a single write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Never expires, whatever the group default says
    NoExpiry,
    /// Use the group's default item expiration (or none if unset)
    #[default]
    DefaultPolicy,
    /// Expire at this absolute time
    ExpireAt(DateTime<Utc>),
}

impl Expiration {
    /// Expire after `ttl` from now
    pub fn after(ttl: Duration) -> Self {
        match deadline(Utc::now(), ttl) {
            Some(at) => Expiration::ExpireAt(at),
            None => Expiration::NoExpiry,
        }
    }

    /// Resolve to an absolute expiry against the group's default TTL
    pub fn resolve(self, default_ttl: Option<Duration>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Expiration::NoExpiry => None,
            Expiration::ExpireAt(at) => Some(at),
            Expiration::DefaultPolicy => default_ttl.and_then(|ttl| deadline(now, ttl)),
        }
    }
}

/// `now + ttl`; a TTL past the representable range means "never"
fn deadline(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}

// =============================================================================
// Tests
// =============================================================================
