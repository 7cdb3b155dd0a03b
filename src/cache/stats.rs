//! Hit/miss counters for cache observability.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free lookup counters. Purely observational; never feeds back into
/// cache behavior.
#[derive(Debug, Default)]
pub struct CacheStats {
  hits: AtomicU64,
  stale_hits: AtomicU64,
  misses: AtomicU64,
}

impl CacheStats {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record_hit(&self) {
    self.hits.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_stale_hit(&self) {
    self.stale_hits.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_miss(&self) {
    self.misses.fetch_add(1, Ordering::Relaxed);
  }

  /// Snapshot the counters together with the current store size.
  pub fn snapshot(&self, size: usize) -> StatsSnapshot {
    StatsSnapshot {
      hits: self.hits.load(Ordering::Relaxed),
      stale_hits: self.stale_hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      size,
    }
  }
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
  pub hits: u64,
  pub stale_hits: u64,
  pub misses: u64,
  pub size: usize,
}

impl StatsSnapshot {
  /// Fraction of lookups served from cache (fresh or stale), 0.0 if no
  /// lookups yet.
  #[allow(clippy::cast_precision_loss)]
  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.stale_hits + self.misses;
    if total == 0 {
      0.0
    } else {
      (self.hits + self.stale_hits) as f64 / total as f64
    }
  }
}
