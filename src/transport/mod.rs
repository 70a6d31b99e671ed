//! Peer Transport
//!
//! Node-to-node protocol over HTTP/1.1:
//!
//! ```text
//! GET    /_groupcache/{group}/{key}   -> 200 raw bytes | error status + x-groupcache-error
//! DELETE /_groupcache/{group}/{key}   -> 204 (local removal, never rebroadcast)
//! ```
//!
//! Both path segments are percent-encoded. A node only serves keys it owns
//! according to its own ring; anything else is answered with `421 not-owned`.

mod http;
mod server;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::cluster::Peer;
use crate::error::{Error, Result};

pub use self::http::HttpTransport;
pub use self::server::{NodeServer, ServerState};

/// Path prefix of the peer protocol
pub const PEER_PATH_PREFIX: &str = "/_groupcache/";

/// Error kind carried on every non-2xx peer response
pub const ERROR_HEADER: &str = "x-groupcache-error";

/// Owner reported alongside a `not-owned` error
pub const OWNER_HEADER: &str = "x-groupcache-owner";

/// RFC 3339 expiry accepted by `PUT /cache/{group}/{key}`
pub const EXPIRE_AT_HEADER: &str = "x-expire-at";

// =============================================================================
// Configuration
// =============================================================================

/// Transport timeouts
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bound on one peer fetch round-trip
    pub fetch_timeout: Duration,

    /// Bound on each removal broadcast request
    pub broadcast_timeout: Duration,

    /// Idle pooled connections are closed after this long
    pub pool_idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(2),
            broadcast_timeout: Duration::from_millis(500),
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Client side of the peer protocol
///
/// [`Cluster`](crate::cluster::Cluster) bounds every call with the configured
/// timeouts, so implementations need not.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fetch `key` of `group` from its owner
    async fn fetch(&self, peer: &Peer, group: &str, key: &str) -> Result<Bytes>;

    /// Ask `peer` to drop `key` of `group` from its local tiers
    async fn remove(&self, peer: &Peer, group: &str, key: &str) -> Result<()>;
}

// =============================================================================
// Wire Format
// =============================================================================

/// Path of `key` in `group` on the peer protocol
pub fn peer_path(group: &str, key: &str) -> String {
    format!(
        "{}{}/{}",
        PEER_PATH_PREFIX,
        urlencoding::encode(group),
        urlencoding::encode(key)
    )
}

/// Split `{prefix}{group}/{key}` into decoded segments
///
/// Returns `None` unless there are exactly two segments after `prefix`.
pub fn split_path(path: &str, prefix: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix(prefix)?;
    let (group, key) = rest.split_once('/')?;
    if key.contains('/') {
        return None;
    }
    let group = urlencoding::decode(group).ok()?.into_owned();
    let key = urlencoding::decode(key).ok()?.into_owned();
    Some((group, key))
}

/// Error kinds that cross the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ItemNotFound,
    CacheNotFound,
    NotOwned,
    NilBackfill,
    Backfill,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ItemNotFound => "item-not-found",
            ErrorCode::CacheNotFound => "cache-not-found",
            ErrorCode::NotOwned => "not-owned",
            ErrorCode::NilBackfill => "nil-backfill",
            ErrorCode::Backfill => "backfill",
            ErrorCode::Internal => "internal",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "item-not-found" => Some(ErrorCode::ItemNotFound),
            "cache-not-found" => Some(ErrorCode::CacheNotFound),
            "not-owned" => Some(ErrorCode::NotOwned),
            "nil-backfill" => Some(ErrorCode::NilBackfill),
            "backfill" => Some(ErrorCode::Backfill),
            "internal" => Some(ErrorCode::Internal),
            _ => None,
        }
    }

    /// HTTP status this code is sent with
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::ItemNotFound | ErrorCode::CacheNotFound => 404,
            ErrorCode::NotOwned => 421,
            ErrorCode::NilBackfill | ErrorCode::Internal => 500,
            ErrorCode::Backfill => 502,
        }
    }

    /// Wire code for a local error
    pub fn of(error: &Error) -> Self {
        match error {
            Error::ItemNotFound { .. } => ErrorCode::ItemNotFound,
            Error::CacheNotFound(_) => ErrorCode::CacheNotFound,
            Error::NotOwned { .. } => ErrorCode::NotOwned,
            Error::NilBackfill { .. } => ErrorCode::NilBackfill,
            Error::Backfill { .. } => ErrorCode::Backfill,
            _ => ErrorCode::Internal,
        }
    }

    /// Rebuild the error a peer reported
    pub fn into_error(
        self,
        peer: &Peer,
        group: &str,
        key: &str,
        owner: Option<String>,
        message: String,
    ) -> Error {
        match self {
            ErrorCode::ItemNotFound => Error::ItemNotFound {
                group: group.to_string(),
                key: key.to_string(),
            },
            ErrorCode::CacheNotFound => Error::CacheNotFound(group.to_string()),
            ErrorCode::NotOwned => Error::NotOwned {
                group: group.to_string(),
                key: key.to_string(),
                owner: owner.unwrap_or_else(|| "unknown".to_string()),
            },
            ErrorCode::NilBackfill => Error::NilBackfill {
                group: group.to_string(),
            },
            ErrorCode::Backfill => Error::backfill(group, key, format!("on {}: {}", peer, message)),
            ErrorCode::Internal => Error::Transport {
                peer: peer.to_string(),
                reason: format!("internal error: {}", message),
            },
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
