//! In-memory cache store with freshness classification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::entry::{CacheEntry, Clock, Freshness};

/// Result of a store lookup: the classification plus the cached payload
/// where one exists. Fresh and Stale both carry data; only Miss requires a
/// blocking fetch.
#[derive(Debug, Clone)]
pub enum Lookup {
  Fresh(Value),
  Stale(Value),
  Miss,
}

/// Map from key to entry, guarded by a mutex. The lock is never held
/// across an await point; all suspension happens above this layer.
pub struct CacheStore {
  entries: Mutex<HashMap<String, CacheEntry>>,
  clock: Arc<dyn Clock>,
}

impl CacheStore {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      clock,
    }
  }

  /// Classify the entry under `key` and return its payload if servable.
  pub fn get(&self, key: &str) -> Lookup {
    let entries = self.entries.lock().unwrap();
    let Some(entry) = entries.get(key) else {
      return Lookup::Miss;
    };

    match entry.classify(self.clock.now()) {
      Freshness::Fresh => Lookup::Fresh(entry.data.clone()),
      Freshness::Stale => Lookup::Stale(entry.data.clone()),
      Freshness::Miss => Lookup::Miss,
    }
  }

  /// Write an entry, overwriting any existing one wholesale. Returns the
  /// stored entry so the caller can mirror it.
  pub fn set(&self, key: &str, data: Value, ttl: Duration, stale_time: Duration) -> CacheEntry {
    let entry = CacheEntry::new(key.to_string(), data, self.clock.now(), ttl, stale_time);
    let mut entries = self.entries.lock().unwrap();
    entries.insert(key.to_string(), entry.clone());
    entry
  }

  /// Insert a rehydrated entry with its original timestamps.
  pub fn insert_entry(&self, entry: CacheEntry) {
    let mut entries = self.entries.lock().unwrap();
    entries.insert(entry.key.clone(), entry);
  }

  pub fn delete(&self, key: &str) -> bool {
    self.entries.lock().unwrap().remove(key).is_some()
  }

  pub fn clear(&self) {
    self.entries.lock().unwrap().clear();
  }

  pub fn keys(&self) -> Vec<String> {
    self.entries.lock().unwrap().keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().unwrap().len()
  }

  /// Evict every entry whose hard expiry passed more than `grace` ago.
  /// Runs independent of read traffic so keys that are never re-read still
  /// get reclaimed. Returns the evicted keys.
  pub fn sweep(&self, grace: Duration) -> Vec<String> {
    let now = self.clock.now();
    let mut entries = self.entries.lock().unwrap();
    let evicted: Vec<String> = entries
      .values()
      .filter(|e| e.is_evictable(now, grace))
      .map(|e| e.key.clone())
      .collect();
    for key in &evicted {
      entries.remove(key);
    }
    evicted
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use crate::cache::entry::test_clock::ManualClock;

  use super::*;

  fn store_with_clock() -> (CacheStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (CacheStore::new(clock.clone()), clock)
  }

  #[test]
  fn test_miss_on_absent_key() {
    let (store, _clock) = store_with_clock();
    assert!(matches!(store.get("nope"), Lookup::Miss));
  }

  #[test]
  fn test_set_then_get_is_fresh() {
    let (store, _clock) = store_with_clock();
    store.set(
      "k",
      json!({"id": 1}),
      Duration::from_secs(5),
      Duration::from_secs(2),
    );

    match store.get("k") {
      Lookup::Fresh(v) => assert_eq!(v, json!({"id": 1})),
      other => panic!("expected fresh, got {:?}", other),
    }
  }

  #[test]
  fn test_classification_over_time() {
    let (store, clock) = store_with_clock();
    store.set(
      "k",
      json!(42),
      Duration::from_millis(5000),
      Duration::from_millis(2000),
    );

    clock.advance(Duration::from_millis(1000));
    assert!(matches!(store.get("k"), Lookup::Fresh(_)));

    clock.advance(Duration::from_millis(2000));
    assert!(matches!(store.get("k"), Lookup::Stale(_)));

    clock.advance(Duration::from_millis(3000));
    assert!(matches!(store.get("k"), Lookup::Miss));
  }

  #[test]
  fn test_set_overwrites_wholesale() {
    let (store, clock) = store_with_clock();
    store.set("k", json!(1), Duration::from_secs(5), Duration::from_secs(2));
    clock.advance(Duration::from_secs(4));

    // Overwrite resets the timestamps, not just the payload.
    store.set("k", json!(2), Duration::from_secs(5), Duration::from_secs(2));
    match store.get("k") {
      Lookup::Fresh(v) => assert_eq!(v, json!(2)),
      other => panic!("expected fresh, got {:?}", other),
    }
  }

  #[test]
  fn test_sweep_respects_grace() {
    let (store, clock) = store_with_clock();
    store.set("old", json!(1), Duration::from_secs(5), Duration::from_secs(2));
    store.set("young", json!(2), Duration::from_secs(600), Duration::from_secs(60));

    // Expired but inside the grace window: kept.
    clock.advance(Duration::from_secs(10));
    assert!(store.sweep(Duration::from_secs(60)).is_empty());

    // Past expiry plus grace: evicted.
    clock.advance(Duration::from_secs(60));
    let evicted = store.sweep(Duration::from_secs(60));
    assert_eq!(evicted, vec!["old".to_string()]);
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn test_delete_and_clear() {
    let (store, _clock) = store_with_clock();
    store.set("a", json!(1), Duration::from_secs(5), Duration::from_secs(2));
    store.set("b", json!(2), Duration::from_secs(5), Duration::from_secs(2));

    assert!(store.delete("a"));
    assert!(!store.delete("a"));
    assert_eq!(store.len(), 1);

    store.clear();
    assert_eq!(store.len(), 0);
  }
}
