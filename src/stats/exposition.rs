//! Prometheus exposition
//!
//! Renders a snapshot into the text format. A fresh registry is built per
//! scrape, so the output always mirrors the live counters exactly.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use super::GroupSnapshot;
use crate::error::{Error, Result};

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("Prometheus error: {}", e))
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help), labels).map_err(prom_err)?;
    registry.register(Box::new(vec.clone())).map_err(prom_err)?;
    Ok(vec)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntGaugeVec> {
    let vec = IntGaugeVec::new(Opts::new(name, help), labels).map_err(prom_err)?;
    registry.register(Box::new(vec.clone())).map_err(prom_err)?;
    Ok(vec)
}

/// Render `snapshots` in the Prometheus text format
pub fn render_prometheus(snapshots: &[GroupSnapshot]) -> Result<String> {
    let registry = Registry::new();
    let group = &["group"];
    let group_tier = &["group", "tier"];

    let requests = counter_vec(
        &registry,
        "groupcache_requests_total",
        "Requests by outcome",
        &["group", "outcome"],
    )?;
    let backfills = counter_vec(&registry, "groupcache_backfills_total", "Backfill calls", group)?;
    let backfill_errors = counter_vec(
        &registry,
        "groupcache_backfill_errors_total",
        "Backfill calls that produced no value",
        group,
    )?;
    let peer_fetches = counter_vec(
        &registry,
        "groupcache_peer_fetches_total",
        "Fetches from owning peers",
        group,
    )?;
    let peer_fetch_errors = counter_vec(
        &registry,
        "groupcache_peer_fetch_errors_total",
        "Failed fetches from owning peers",
        group,
    )?;
    let coalesced = counter_vec(
        &registry,
        "groupcache_coalesced_total",
        "Gets that joined a load already in flight",
        group,
    )?;
    let in_flight = gauge_vec(&registry, "groupcache_loads_in_flight", "Loads in flight", group)?;

    let evictions = counter_vec(
        &registry,
        "groupcache_tier_evictions_total",
        "Entries evicted to make room",
        group_tier,
    )?;
    let expirations = counter_vec(
        &registry,
        "groupcache_tier_expirations_total",
        "Entries dropped after expiring",
        group_tier,
    )?;
    let items = gauge_vec(&registry, "groupcache_tier_items", "Entries held", group_tier)?;
    let bytes = gauge_vec(
        &registry,
        "groupcache_tier_bytes",
        "Key and value bytes held",
        group_tier,
    )?;

    for snap in snapshots {
        let name = snap.group.as_str();
        let c = &snap.counters;

        requests.with_label_values(&[name, "hit"]).inc_by(c.hits);
        requests.with_label_values(&[name, "miss"]).inc_by(c.misses);
        requests.with_label_values(&[name, "peer"]).inc_by(c.peer_requests);
        backfills.with_label_values(&[name]).inc_by(c.backfills);
        backfill_errors.with_label_values(&[name]).inc_by(c.backfill_errors);
        peer_fetches.with_label_values(&[name]).inc_by(c.peer_fetches);
        peer_fetch_errors.with_label_values(&[name]).inc_by(c.peer_fetch_errors);
        coalesced.with_label_values(&[name]).inc_by(c.coordinator.coalesced);
        in_flight
            .with_label_values(&[name])
            .set(c.coordinator.in_flight as i64);

        for (tier, stats) in [("main", &snap.main), ("hot", &snap.hot)] {
            evictions.with_label_values(&[name, tier]).inc_by(stats.evictions);
            expirations.with_label_values(&[name, tier]).inc_by(stats.expirations);
            items.with_label_values(&[name, tier]).set(stats.items as i64);
            bytes.with_label_values(&[name, tier]).set(stats.bytes_stored as i64);
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(prom_err)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Non-UTF-8 exposition: {}", e)))
}

// =============================================================================
// Tests
// =============================================================================
