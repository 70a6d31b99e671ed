//! Cluster Membership
//!
//! Holds this node's identity, the active hash ring and the peer transport.
//! Lookups load the current ring snapshot without locking; `set_peers`
//! rebuilds the ring under a writer lock and publishes it atomically, so a
//! fetch or serve that already loaded the old ring finishes against it.

mod ring;

use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::transport::{HttpTransport, PeerTransport, TransportConfig};

pub use ring::{
    hash_key, hash_node, HashRing, Peer, RingConfig, RingStats, DEFAULT_VIRTUAL_REPLICAS,
    MIN_VIRTUAL_REPLICAS,
};

/// Membership, ownership and peer I/O for one node
pub struct Cluster {
    local: Peer,
    ring_config: RingConfig,
    transport_config: TransportConfig,
    ring: ArcSwap<HashRing>,
    writer: Mutex<()>,
    transport: Arc<dyn PeerTransport>,
}

impl Cluster {
    /// Create a cluster containing only `local_addr`
    pub fn new(
        local_addr: &str,
        ring_config: RingConfig,
        transport_config: TransportConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self> {
        ring_config.validate()?;
        let local = Peer::parse(local_addr)?;
        let ring = HashRing::new([local.clone()], ring_config.virtual_replicas);

        Ok(Self {
            local,
            ring_config,
            transport_config,
            ring: ArcSwap::from_pointee(ring),
            writer: Mutex::new(()),
            transport,
        })
    }

    /// Single-node cluster talking HTTP with default settings
    pub fn standalone(local_addr: &str) -> Result<Self> {
        let config = TransportConfig::default();
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::new(local_addr, RingConfig::default(), config, transport)
    }

    /// This node
    pub fn local(&self) -> &Peer {
        &self.local
    }

    /// Current ring snapshot
    pub fn ring(&self) -> Arc<HashRing> {
        self.ring.load_full()
    }

    pub fn ring_config(&self) -> &RingConfig {
        &self.ring_config
    }

    pub fn transport_config(&self) -> &TransportConfig {
        &self.transport_config
    }

    /// Replace the peer set
    ///
    /// Every address is validated before anything changes; one bad address
    /// leaves the current ring in place. The local node is always a member.
    pub fn set_peers<I, S>(&self, addrs: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut peers = addrs
            .into_iter()
            .map(|a| Peer::parse(a.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if !peers.contains(&self.local) {
            debug!(local = %self.local, "Adding local node to peer list");
            peers.push(self.local.clone());
        }

        let _guard = self.writer.lock();
        let ring = HashRing::new(peers, self.ring_config.virtual_replicas);
        info!(
            peers = ring.peers().len(),
            points = ring.len(),
            owned_fraction = ring.owned_fraction(&self.local),
            "Hash ring reconfigured"
        );
        self.ring.store(Arc::new(ring));
        Ok(())
    }

    /// Peers on the current ring
    pub fn peers(&self) -> Vec<Peer> {
        self.ring.load().peers().to_vec()
    }

    /// Owner of `key` on the current ring
    pub fn owner_of(&self, key: &str) -> Peer {
        self.ring
            .load()
            .lookup(key)
            .cloned()
            .unwrap_or_else(|| self.local.clone())
    }

    pub fn is_local(&self, peer: &Peer) -> bool {
        *peer == self.local
    }

    pub fn stats(&self) -> RingStats {
        self.ring.load().stats(&self.local)
    }

    /// Fetch from `peer`, bounded by the fetch timeout
    #[instrument(skip(self), fields(peer = %peer))]
    pub async fn fetch(&self, peer: &Peer, group: &str, key: &str) -> Result<Bytes> {
        let timeout = self.transport_config.fetch_timeout;
        match tokio::time::timeout(timeout, self.transport.fetch(peer, group, key)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                peer: peer.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Tell every other peer to drop `key` of `group`
    ///
    /// Fire-and-forget: requests run on their own tasks and failures are only
    /// logged. Does nothing outside a tokio runtime.
    pub fn broadcast_remove(&self, group: &str, key: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(group, key, "No runtime; skipping removal broadcast");
            return;
        };

        let timeout = self.transport_config.broadcast_timeout;
        let ring = self.ring.load_full();
        for peer in ring.peers().iter().filter(|p| !self.is_local(p)) {
            let peer = peer.clone();
            let transport = Arc::clone(&self.transport);
            let group = group.to_string();
            let key = key.to_string();
            handle.spawn(async move {
                match tokio::time::timeout(timeout, transport.remove(&peer, &group, &key)).await {
                    Ok(Ok(())) => debug!(peer = %peer, group = %group, key = %key, "Removal propagated"),
                    Ok(Err(e)) => warn!(peer = %peer, group = %group, key = %key, "Removal broadcast failed: {}", e),
                    Err(_) => warn!(peer = %peer, group = %group, key = %key, "Removal broadcast timed out"),
                }
            });
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("local", &self.local)
            .field("peers", &self.ring.load().peers().len())
            .field("ring_config", &self.ring_config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
