//! Consistent Hash Ring
//!
//! Maps keys to owning peers. Every peer is placed on a `u64` ring at
//! `virtual_replicas` positions; a key belongs to the first point at or
//! clockwise after its hash, wrapping past the top of the ring.
//!
//! Points and key hashes use xxHash64 with a fixed seed, so every process
//! agrees on ownership for the same peer set regardless of the order the
//! peers were listed in.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh64::{xxh64, Xxh64};

use crate::error::{Error, Result};

/// Seed shared by every node; changing it reassigns the whole keyspace
const RING_SEED: u64 = 0x6772_6f75_7063_6163;

/// Virtual replicas per peer unless configured otherwise
pub const DEFAULT_VIRTUAL_REPLICAS: usize = 50;

/// Fewer replicas than this leaves ownership badly skewed
pub const MIN_VIRTUAL_REPLICAS: usize = 40;

/// Hash a key onto the ring
#[inline]
pub fn hash_key(key: &str) -> u64 {
    xxh64(key.as_bytes(), RING_SEED)
}

/// Hash the `m`th virtual replica of a peer onto the ring
pub fn hash_node(peer: &Peer, m: usize) -> u64 {
    let mut hasher = Xxh64::new(RING_SEED);
    hasher.update(peer.addr.as_bytes());
    hasher.update(b":");
    hasher.update(&(m as u64).to_le_bytes());
    hasher.digest()
}

// =============================================================================
// Peer
// =============================================================================

/// A cache node, identified by its `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Peer {
    addr: String,
}

impl Peer {
    /// Parse and validate a `host:port` address
    pub fn parse(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        let invalid = |reason: &str| Error::InvalidPeer {
            addr: addr.to_string(),
            reason: reason.to_string(),
        };

        if addr.contains("://") || addr.contains('/') {
            return Err(invalid("expected host:port without scheme or path"));
        }
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() || host == "[]" {
            return Err(invalid("missing host"));
        }
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(invalid("IPv6 hosts must be bracketed"));
        }
        match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err(invalid("port must be in 1..=65535")),
            Ok(_) => {}
        }

        Ok(Self {
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

impl std::str::FromStr for Peer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Peer::parse(s)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Ring configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Points placed on the ring per peer
    pub virtual_replicas: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            virtual_replicas: DEFAULT_VIRTUAL_REPLICAS,
        }
    }
}

impl RingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.virtual_replicas < MIN_VIRTUAL_REPLICAS {
            return Err(Error::Config(format!(
                "virtual_replicas must be at least {}, got {}",
                MIN_VIRTUAL_REPLICAS, self.virtual_replicas
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Ring
// =============================================================================

/// Ring statistics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RingStats {
    pub peers: usize,
    pub virtual_replicas: usize,
    pub points: usize,
    /// Share of the hash space owned by the local node, in `[0, 1]`
    pub owned_fraction: f64,
}

/// Immutable ring snapshot
///
/// Reconfiguration builds a new ring and swaps it in whole; see
/// [`Cluster::set_peers`](super::Cluster::set_peers).
#[derive(Debug, Clone)]
pub struct HashRing {
    peers: Vec<Peer>,
    /// (position, index into `peers`), sorted by position
    points: Vec<(u64, usize)>,
    virtual_replicas: usize,
}

impl HashRing {
    /// Build a ring over `peers`; duplicates are collapsed and order is irrelevant
    pub fn new(peers: impl IntoIterator<Item = Peer>, virtual_replicas: usize) -> Self {
        let peers: Vec<Peer> = peers.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

        // (position, peer, replica) ordering breaks position ties deterministically
        let mut placed = BTreeSet::new();
        for (idx, peer) in peers.iter().enumerate() {
            for m in 0..virtual_replicas {
                placed.insert((hash_node(peer, m), idx, m));
            }
        }
        let points: Vec<(u64, usize)> = placed.into_iter().map(|(pos, idx, _)| (pos, idx)).collect();

        debug!(
            peers = peers.len(),
            points = points.len(),
            "Built hash ring"
        );

        Self {
            peers,
            points,
            virtual_replicas,
        }
    }

    /// Owner of `key`, or `None` on an empty ring
    pub fn lookup(&self, key: &str) -> Option<&Peer> {
        if self.points.is_empty() {
            return None;
        }

        let hash = hash_key(key);
        let idx = match self.points.binary_search_by(|(pos, _)| pos.cmp(&hash)) {
            Ok(i) => i,
            Err(i) if i >= self.points.len() => 0,
            Err(i) => i,
        };
        Some(&self.peers[self.points[idx].1])
    }

    /// Peers on the ring, sorted by address
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn contains(&self, peer: &Peer) -> bool {
        self.peers.binary_search(peer).is_ok()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn virtual_replicas(&self) -> usize {
        self.virtual_replicas
    }

    /// Fraction of the hash space `peer` owns
    ///
    /// Each point owns the arc from the previous point (exclusive) up to
    /// itself; the first point also owns the wraparound arc.
    pub fn owned_fraction(&self, peer: &Peer) -> f64 {
        let Ok(target) = self.peers.binary_search(peer) else {
            return 0.0;
        };
        if self.peers.len() == 1 {
            return 1.0;
        }

        let mut owned: u128 = 0;
        let mut prev = self.points[self.points.len() - 1].0;
        for &(pos, idx) in &self.points {
            if idx == target {
                owned += u128::from(pos.wrapping_sub(prev));
            }
            prev = pos;
        }
        owned as f64 / (u128::from(u64::MAX) + 1) as f64
    }

    pub fn stats(&self, local: &Peer) -> RingStats {
        RingStats {
            peers: self.peers.len(),
            virtual_replicas: self.virtual_replicas,
            points: self.points.len(),
            owned_fraction: self.owned_fraction(local),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
