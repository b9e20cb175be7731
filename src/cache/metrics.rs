//! Cache Metrics Collection
//!
//! Lookup outcome counters for monitoring cache health. All counters are
//! relaxed atomics; a [`MetricsSnapshot`] is a point-in-time copy.
//! Evictions are counted per layer, see [`Layer::evictions`](super::Layer::evictions).

use std::sync::atomic::{AtomicU64, Ordering};

/// Cache metrics collector
#[derive(Debug)]
pub struct CacheMetrics {
    /// Hits per tier, index 0 nearest
    tier_hits: Vec<AtomicU64>,
    origin_hits: AtomicU64,
    misses: AtomicU64,

    // Background writes into tiers
    promotions: AtomicU64,
    populations: AtomicU64,
    write_failures: AtomicU64,

    transform_failures: AtomicU64,
}

impl CacheMetrics {
    /// Create a collector for a cache with `tiers` layers
    pub fn new(tiers: usize) -> Self {
        Self {
            tier_hits: (0..tiers).map(|_| AtomicU64::new(0)).collect(),
            origin_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            populations: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            transform_failures: AtomicU64::new(0),
        }
    }

    pub fn record_tier_hit(&self, tier: usize) {
        if let Some(counter) = self.tier_hits.get(tier) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_origin_hit(&self) {
        self.origin_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// One successful write of a promoted blob into a nearer tier
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// One successful write of a freshly transformed blob into a tier
    pub fn record_population(&self) {
        self.populations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transform_failure(&self) {
        self.transform_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tier_hits(&self, tier: usize) -> u64 {
        self.tier_hits
            .get(tier)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Lookups answered by any tier
    pub fn hits(&self) -> u64 {
        self.tier_hits.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Fraction of lookups answered by a tier rather than the origin
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits
            + self.origin_hits.load(Ordering::Relaxed) as f64
            + self.misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tier_hits: self
                .tier_hits
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            origin_hits: self.origin_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            populations: self.populations.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub tier_hits: Vec<u64>,
    pub origin_hits: u64,
    pub misses: u64,
    pub promotions: u64,
    pub populations: u64,
    pub write_failures: u64,
    pub transform_failures: u64,
    pub hit_ratio: f64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache Metrics:")?;
        for (tier, hits) in self.tier_hits.iter().enumerate() {
            writeln!(f, "  Tier {} hits: {}", tier, hits)?;
        }
        writeln!(f, "  Origin hits: {}", self.origin_hits)?;
        writeln!(f, "  Misses: {}", self.misses)?;
        writeln!(f, "  Hit ratio: {:.2}%", self.hit_ratio * 100.0)?;
        writeln!(
            f,
            "  Writes: {} promotions, {} populations, {} failed",
            self.promotions, self.populations, self.write_failures
        )?;
        write!(f, "  Transform failures: {}", self.transform_failures)
    }
}

// =============================================================================
// Tests
// =============================================================================
