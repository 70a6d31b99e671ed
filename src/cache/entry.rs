//! Cache Entry Types
//!
//! An entry is an immutable value plus an optional absolute expiry. Entries are
//! owned by exactly one tier and dropped on eviction or expiry.

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Cached value with its expiry
#[derive(Clone)]
pub struct CacheEntry {
    /// Cached data (zero-copy clones)
    value: Bytes,
    /// Absolute expiry; `None` never expires by policy
    expire_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Create an entry that never expires
    pub fn new(value: Bytes) -> Self {
        Self::with_expiry(value, None)
    }

    /// Create an entry with an optional absolute expiry
    pub fn with_expiry(value: Bytes, expire_at: Option<DateTime<Utc>>) -> Self {
        Self { value, expire_at }
    }

    /// Get data (zero-copy)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Consume the entry, returning its data
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Get value size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.value.len() as u64
    }

    #[inline]
    pub fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.expire_at
    }

    /// Check expiry against a caller-supplied clock reading
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expire_at {
            Some(at) => at <= now,
            None => false,
        }
    }

    /// Check if expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.size())
            .field("expire_at", &self.expire_at)
            .field("is_expired", &self.is_expired())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
