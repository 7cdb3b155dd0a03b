//! Per-category staleness and persistence policy.

use std::collections::HashMap;
use std::time::Duration;

/// Which mirror scope (if any) a category's entries are written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
  /// In-memory only; never mirrored.
  Memory,
  /// Mirrored to the ephemeral, per-session store.
  Session,
  /// Mirrored to the durable, cross-reload store.
  Durable,
}

/// Staleness and persistence configuration for one resource category.
#[derive(Debug, Clone, Copy)]
pub struct CategoryPolicy {
  /// Hard expiry: past this the entry is a miss.
  pub ttl: Duration,
  /// Soft expiry: past this the entry is served stale while a background
  /// refresh runs. Always `<= ttl`.
  pub stale_time: Duration,
  pub storage: StorageClass,
  /// Volatile categories skip stale serving while the context is hidden
  /// and must never appear in any mirror.
  pub volatile: bool,
}

impl CategoryPolicy {
  /// Memory-only policy with a stale window. `stale_time` is clamped to
  /// `ttl` so the entry invariant holds.
  pub fn new(ttl: Duration, stale_time: Duration) -> Self {
    Self {
      ttl,
      stale_time: stale_time.min(ttl),
      storage: StorageClass::Memory,
      volatile: false,
    }
  }

  /// Policy with stale serving disabled: the entry is fresh until `ttl`
  /// and a miss after, with no stale window in between. Used for data
  /// whose staleness would be unsafe to show after a state-changing
  /// action.
  pub fn fresh_or_miss(ttl: Duration) -> Self {
    Self::new(ttl, ttl)
  }

  pub fn with_storage(mut self, storage: StorageClass) -> Self {
    self.storage = storage;
    self
  }

  pub fn volatile(mut self) -> Self {
    self.volatile = true;
    // A volatile category is never safe to rehydrate from a mirror.
    self.storage = StorageClass::Memory;
    self
  }
}

/// Category-name to policy table, injected into the cache at construction.
///
/// Unknown categories fall back to a short-lived memory-only default so a
/// new resource added at a call site degrades to conservative behavior
/// rather than panicking or persisting by accident.
#[derive(Debug, Clone)]
pub struct CachePolicies {
  categories: HashMap<String, CategoryPolicy>,
  fallback: CategoryPolicy,
}

impl CachePolicies {
  pub fn new() -> Self {
    Self {
      categories: HashMap::new(),
      fallback: CategoryPolicy::new(Duration::from_secs(60), Duration::from_secs(30)),
    }
  }

  pub fn with_category(mut self, name: &str, policy: CategoryPolicy) -> Self {
    self.categories.insert(name.to_string(), policy);
    self
  }

  #[allow(dead_code)]
  pub fn with_fallback(mut self, policy: CategoryPolicy) -> Self {
    self.fallback = policy;
    self
  }

  /// Policy for a category name.
  pub fn for_category(&self, category: &str) -> &CategoryPolicy {
    self.categories.get(category).unwrap_or(&self.fallback)
  }

  /// Policy for a full cache key.
  pub fn for_key(&self, key: &str) -> &CategoryPolicy {
    self.for_category(super::key::category_of(key))
  }
}

impl Default for CachePolicies {
  fn default() -> Self {
    Self::new()
  }
}
