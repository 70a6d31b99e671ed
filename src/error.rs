//! Error types for groupcache

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error shared between every waiter of a coalesced load.
pub type SharedSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in groupcache
///
/// `Clone` so the request coordinator can hand the same failure to every
/// caller waiting on a load.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Group registered without a name
    #[error("cache group name is required")]
    NameRequired,

    /// Peer address could not be parsed as `host:port`
    #[error("invalid peer address '{addr}': {reason}")]
    InvalidPeer { addr: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// No group registered under this name
    #[error("cache group not found: {0}")]
    CacheNotFound(String),

    /// The backing source reports the key does not exist
    #[error("item not found: {group}/{key}")]
    ItemNotFound { group: String, key: String },

    /// A miss on an owned key in a group with no backfill configured
    #[error("cache group '{group}' has no backfill configured")]
    NilBackfill { group: String },

    /// The backfill function failed
    #[error("backfill failed for {group}/{key}: {source}")]
    Backfill {
        group: String,
        key: String,
        #[source]
        source: SharedSource,
    },

    /// A peer asked this node for a key it does not own
    #[error("key {group}/{key} is not owned by this node (owner: {owner})")]
    NotOwned {
        group: String,
        key: String,
        owner: String,
    },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Peer unreachable or replied with an unexpected status
    #[error("peer {peer} transport error: {reason}")]
    Transport { peer: String, reason: String },

    /// Peer did not answer within the fetch timeout
    #[error("peer {peer} timed out after {timeout_ms}ms")]
    Timeout { peer: String, timeout_ms: u64 },

    /// The task driving a coalesced load went away before producing a result
    #[error("in-flight load for {group}/{key} was aborted")]
    LoadAborted { group: String, key: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an arbitrary backfill failure
    pub fn backfill(
        group: impl Into<String>,
        key: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Error::Backfill {
            group: group.into(),
            key: key.into(),
            source: Arc::from(source.into()),
        }
    }

    /// True for errors that mean "the value does not exist" rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ItemNotFound { .. } | Error::CacheNotFound(_))
    }

    /// True for transport-class failures (peer unreachable, timeout, bad status)
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Timeout { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}
