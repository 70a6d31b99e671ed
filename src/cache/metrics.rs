//! Tier Metrics Collection
//!
//! Lock-free counters for one tier, plus the serializable snapshot they render to.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for one tier
#[derive(Debug, Default)]
pub struct TierMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    rejected: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    removals: AtomicU64,
}

impl TierMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry larger than the tier could ever hold
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, n: u64) {
        if n > 0 {
            self.evictions.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn record_expirations(&self, n: u64) {
        if n > 0 {
            self.expirations.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        hit_ratio(self.hits(), self.misses())
    }

    /// Read every counter; size fields are filled in by the tier
    pub fn snapshot(&self) -> TierStats {
        TierStats {
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            puts: self.puts.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evictions: self.evictions(),
            expirations: self.expirations(),
            removals: self.removals.load(Ordering::Relaxed),
            items: 0,
            bytes_stored: 0,
            capacity: 0,
            capacity_unit: "",
        }
    }
}

pub(crate) fn hit_ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Point-in-time view of one tier
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub puts: u64,
    pub rejected: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub removals: u64,
    /// Entries currently held
    pub items: u64,
    /// Key + value bytes currently held
    pub bytes_stored: u64,
    pub capacity: u64,
    pub capacity_unit: &'static str,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = TierMetrics::new();
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.misses(), 0);
        assert_eq!(metrics.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_tracking() {
        let metrics = TierMetrics::new();

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();

        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
        assert!((metrics.hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_zero_counts_are_not_recorded() {
        let metrics = TierMetrics::new();
        metrics.record_evictions(0);
        metrics.record_evictions(3);
        metrics.record_expirations(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.evictions, 3);
        assert_eq!(snapshot.expirations, 2);
    }
}
