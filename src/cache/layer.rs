//! Response cache orchestration.
//!
//! `ResponseCache` is the public contract the rest of the application
//! consumes. It sits between UI consumers and the rate-limited upstream
//! API and combines the cache store, staleness policy, persistence mirror,
//! request coordinator, invalidation engine, and stats collector.
//!
//! Lookup flow for `get`:
//! - fresh entries return immediately;
//! - stale entries return immediately and detach a background refresh;
//! - misses block on a coordinated fetch that writes through the store and
//!   the mirror scope the key's category is allow-listed for.
//!
//! The cache is a cheap-to-clone handle over shared state; the composition
//! root constructs one and passes clones to whoever needs it. Policies,
//! mirrors, and the clock are constructor-injected so instances are
//! independent and resettable.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::coordinator::RequestCoordinator;
use super::entry::{Clock, SystemClock};
use super::mirror::MirrorStore;
use super::policy::{CachePolicies, CategoryPolicy, StorageClass};
use super::stats::{CacheStats, StatsSnapshot};
use super::store::{CacheStore, Lookup};

/// Re-invokable fetch closure with the payload serialized and the error
/// erased, so one fetch can be shared by coalesced callers and re-run by a
/// background refresh.
type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Bulk-deletion pattern: a literal substring or a regular expression,
/// matched against full cache keys.
#[derive(Debug, Clone)]
pub enum InvalidationPattern {
  Substring(String),
  Regex(regex::Regex),
}

impl InvalidationPattern {
  fn matches(&self, key: &str) -> bool {
    match self {
      Self::Substring(s) => key.contains(s.as_str()),
      Self::Regex(re) => re.is_match(key),
    }
  }
}

impl From<&str> for InvalidationPattern {
  fn from(s: &str) -> Self {
    Self::Substring(s.to_string())
  }
}

impl From<String> for InvalidationPattern {
  fn from(s: String) -> Self {
    Self::Substring(s)
  }
}

impl From<regex::Regex> for InvalidationPattern {
  fn from(re: regex::Regex) -> Self {
    Self::Regex(re)
  }
}

/// Cache construction parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  pub policies: CachePolicies,
  /// How often the background sweep runs.
  pub sweep_interval: Duration,
  /// How long past hard expiry an entry may linger before the sweep
  /// evicts it.
  pub sweep_grace: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      policies: CachePolicies::default(),
      sweep_interval: Duration::from_secs(60),
      sweep_grace: Duration::from_secs(300),
    }
  }
}

/// The shared response cache. Clones are handles to the same state.
#[derive(Clone)]
pub struct ResponseCache {
  inner: Arc<CacheInner>,
}

struct CacheInner {
  store: CacheStore,
  coordinator: RequestCoordinator,
  durable: Arc<dyn MirrorStore>,
  session: Arc<dyn MirrorStore>,
  policies: CachePolicies,
  stats: CacheStats,
  visible: AtomicBool,
  sweep_interval: Duration,
  sweep_grace: Duration,
  clock: Arc<dyn Clock>,
}

impl ResponseCache {
  /// Build a cache over the given mirror scopes and rehydrate surviving
  /// mirrored entries into memory.
  pub fn new(
    config: CacheConfig,
    durable: Arc<dyn MirrorStore>,
    session: Arc<dyn MirrorStore>,
  ) -> Self {
    Self::with_clock(config, durable, session, Arc::new(SystemClock))
  }

  /// As [`new`](Self::new) with an explicit time source.
  pub fn with_clock(
    config: CacheConfig,
    durable: Arc<dyn MirrorStore>,
    session: Arc<dyn MirrorStore>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let cache = Self {
      inner: Arc::new(CacheInner {
        store: CacheStore::new(clock.clone()),
        coordinator: RequestCoordinator::new(),
        durable,
        session,
        policies: config.policies,
        stats: CacheStats::new(),
        visible: AtomicBool::new(true),
        sweep_interval: config.sweep_interval,
        sweep_grace: config.sweep_grace,
        clock,
      }),
    };
    cache.rehydrate();
    cache
  }

  /// Staleness-aware lookup.
  ///
  /// Fresh entries return the cached value. Stale entries return the
  /// cached value and detach a refresh; refresh failures are logged and
  /// swallowed since the caller already has a usable value. Misses block
  /// on a coordinated fetch. Reads of a volatile category while the
  /// context is hidden always take the miss path, so a backgrounded
  /// instance cannot serve data that may have changed elsewhere.
  pub async fn get<T, F, Fut>(
    &self,
    key: &str,
    fetcher: F,
    ttl: Duration,
    stale_time: Duration,
  ) -> Result<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let fetcher = erase_fetcher(fetcher);
    let policy = self.policy_for(key);

    let lookup = if policy.volatile && !self.is_visible() {
      Lookup::Miss
    } else {
      self.inner.store.get(key)
    };

    match lookup {
      Lookup::Fresh(value) => {
        self.inner.stats.record_hit();
        decode(value)
      }
      Lookup::Stale(value) => {
        self.inner.stats.record_stale_hit();
        self.spawn_refresh(key, fetcher, ttl, stale_time);
        decode(value)
      }
      Lookup::Miss => {
        self.inner.stats.record_miss();
        let value = self
          .coordinate(key, fetcher, ttl, stale_time)
          .await
          .map_err(|e| eyre!(e))?;
        decode(value)
      }
    }
  }

  /// Store a value under `key`, overwriting any existing entry and
  /// mirroring it if the key's category is allow-listed.
  #[allow(dead_code)]
  pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration, stale_time: Duration) {
    match serde_json::to_value(data) {
      Ok(value) => self.write_through(key, value, ttl, stale_time),
      Err(e) => warn!(key = %key, error = %e, "refusing to cache unserializable value"),
    }
  }

  /// Remove `key` from memory and from both mirror scopes.
  pub fn delete(&self, key: &str) {
    self.inner.store.delete(key);
    for mirror in [&self.inner.durable, &self.inner.session] {
      if let Err(e) = mirror.remove(key) {
        warn!(key = %key, error = %e, "mirror delete failed");
      }
    }
  }

  /// Delete every key matching `pattern` from memory and from both mirror
  /// scopes. In-flight fetches are left alone; use
  /// [`invalidate_namespace`](Self::invalidate_namespace) after mutations.
  pub fn invalidate(&self, pattern: impl Into<InvalidationPattern>) {
    self.invalidate_pattern(&pattern.into(), false);
  }

  /// Delete every cache entry for one resource identifier, across every
  /// sub-resource: any key carrying `id` as a whole segment matches. Also
  /// drops matching in-flight fetches, so a fetch started before the
  /// mutation cannot write its response back afterwards.
  pub fn invalidate_namespace(&self, id: &str) {
    match regex::Regex::new(&format!("(^|:){}(:|$)", regex::escape(id))) {
      Ok(re) => self.invalidate_pattern(&InvalidationPattern::Regex(re), true),
      Err(e) => warn!(id = %id, error = %e, "invalid namespace pattern"),
    }
  }

  fn invalidate_pattern(&self, pattern: &InvalidationPattern, drop_pending: bool) {
    let matching: Vec<String> = self
      .inner
      .store
      .keys()
      .into_iter()
      .filter(|k| pattern.matches(k))
      .collect();
    for key in &matching {
      self.inner.store.delete(key);
    }

    // The mirrors may hold matching keys that are not in memory (written
    // by another instance); enumerate them independently.
    for mirror in [&self.inner.durable, &self.inner.session] {
      match mirror.keys() {
        Ok(keys) => {
          let matched: Vec<String> = keys.into_iter().filter(|k| pattern.matches(k)).collect();
          if matched.is_empty() {
            continue;
          }
          if let Err(e) = mirror.remove_many(&matched) {
            warn!(error = %e, "mirror invalidation failed");
          }
        }
        Err(e) => warn!(error = %e, "mirror key enumeration failed"),
      }
    }

    if drop_pending {
      self.inner.coordinator.remove_matching(|k| pattern.matches(k));
    }

    debug!(removed = matching.len(), "invalidated cache keys");
  }

  /// Bypass classification entirely: drop the existing entry and any
  /// in-flight fetch for `key`, then fetch and store fresh data. Used
  /// immediately after a mutation so the next read cannot be served from
  /// anything computed before it. Write-through timing comes from the
  /// category policy.
  pub async fn network_only<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let fetcher = erase_fetcher(fetcher);
    let policy = self.policy_for(key);

    self.inner.coordinator.remove(key);
    self.delete(key);

    let value = self
      .coordinate(key, fetcher, policy.ttl, policy.stale_time)
      .await
      .map_err(|e| eyre!(e))?;
    decode(value)
  }

  /// Drop every entry from memory, both mirror scopes, and the pending
  /// registry. Counters are preserved.
  #[allow(dead_code)]
  pub fn clear(&self) {
    self.inner.store.clear();
    self.inner.coordinator.clear();
    for mirror in [&self.inner.durable, &self.inner.session] {
      if let Err(e) = mirror.clear() {
        warn!(error = %e, "mirror clear failed");
      }
    }
  }

  /// Snapshot of the lookup counters and current size.
  pub fn stats(&self) -> StatsSnapshot {
    self.inner.stats.snapshot(self.inner.store.len())
  }

  /// The staleness/persistence policy for a key's category. Call sites
  /// use this as the source of truth for `get` timing parameters.
  pub fn policy_for(&self, key: &str) -> CategoryPolicy {
    *self.inner.policies.for_key(key)
  }

  /// Page-visibility signal from the embedding context. While not
  /// visible, volatile-category reads always take the miss path.
  #[allow(dead_code)]
  pub fn set_visible(&self, visible: bool) {
    self.inner.visible.store(visible, Ordering::Relaxed);
  }

  pub fn is_visible(&self) -> bool {
    self.inner.visible.load(Ordering::Relaxed)
  }

  /// Spawn the periodic sweep that evicts entries past hard expiry plus
  /// the grace window, independent of read traffic.
  pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
    let cache = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(cache.inner.sweep_interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let evicted = cache.inner.store.sweep(cache.inner.sweep_grace);
        if !evicted.is_empty() {
          debug!(count = evicted.len(), "swept expired cache entries");
        }
      }
    })
  }

  /// Funnel a fetch through the pending registry. Every concurrent caller
  /// for `key` awaits the same upstream fetch; the registration is removed
  /// on settle, and the result is written through only while the
  /// registration is still current.
  async fn coordinate(
    &self,
    key: &str,
    fetcher: ErasedFetcher,
    ttl: Duration,
    stale_time: Duration,
  ) -> Result<Value, String> {
    let shared = self.inner.coordinator.join_or_start(key, |id| {
      let cache = self.clone();
      let key = key.to_string();
      async move {
        let result = (fetcher)().await;
        let current = cache.inner.coordinator.settle(&key, id);
        match result {
          Ok(value) => {
            if current {
              cache.write_through(&key, value.clone(), ttl, stale_time);
            }
            Ok(value)
          }
          Err(e) => Err(e),
        }
      }
      .boxed()
      .shared()
    });
    shared.await
  }

  fn spawn_refresh(&self, key: &str, fetcher: ErasedFetcher, ttl: Duration, stale_time: Duration) {
    let cache = self.clone();
    let key = key.to_string();
    tokio::spawn(async move {
      // Funneled through the coordinator: overlapping stale reads trigger
      // one refresh, not one per read.
      if let Err(e) = cache.coordinate(&key, fetcher, ttl, stale_time).await {
        // On failure the existing entry is left untouched; it remains
        // servable per normal classification on the next read.
        warn!(key = %key, error = %e, "background refresh failed");
      }
    });
  }

  fn write_through(&self, key: &str, data: Value, ttl: Duration, stale_time: Duration) {
    let entry = self.inner.store.set(key, data, ttl, stale_time);

    let policy = self.inner.policies.for_key(key);
    let mirror = if policy.volatile {
      // Volatile categories must never reach a mirror scope.
      None
    } else {
      match policy.storage {
        StorageClass::Durable => Some(&self.inner.durable),
        StorageClass::Session => Some(&self.inner.session),
        StorageClass::Memory => None,
      }
    };

    if let Some(mirror) = mirror {
      if let Err(e) = mirror.put(&entry) {
        // The in-memory entry stays valid; only the mirrored copy is
        // skipped.
        warn!(key = %key, error = %e, "mirror write failed");
      }
    }
  }

  fn rehydrate(&self) {
    self.rehydrate_scope(&self.inner.durable, StorageClass::Durable);
    self.rehydrate_scope(&self.inner.session, StorageClass::Session);
  }

  /// Load surviving entries from one mirror scope into memory. Entries
  /// that are expired, belong to a volatile category, or are not
  /// allow-listed for this scope are purged from the mirror; a previous,
  /// possibly buggy, version may have written them.
  fn rehydrate_scope(&self, mirror: &Arc<dyn MirrorStore>, scope: StorageClass) {
    let entries = match mirror.load_all() {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "mirror rehydration failed");
        return;
      }
    };

    let now = self.inner.clock.now();
    let mut loaded = 0usize;
    let mut purged: Vec<String> = Vec::new();

    for entry in entries {
      let policy = self.inner.policies.for_key(&entry.key);
      if policy.volatile || policy.storage != scope || now >= entry.expires_at {
        purged.push(entry.key);
        continue;
      }
      self.inner.store.insert_entry(entry);
      loaded += 1;
    }

    if !purged.is_empty() {
      debug!(count = purged.len(), "purging dead mirrored entries");
      if let Err(e) = mirror.remove_many(&purged) {
        warn!(error = %e, "mirror purge failed");
      }
    }

    if loaded > 0 {
      debug!(loaded, "rehydrated cache entries");
    }
  }
}

fn erase_fetcher<T, F, Fut>(fetcher: F) -> ErasedFetcher
where
  T: Serialize + Send + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  Arc::new(move || {
    let fut = fetcher();
    async move {
      let data = fut.await.map_err(|e| e.to_string())?;
      serde_json::to_value(&data).map_err(|e| format!("Failed to serialize fetched value: {}", e))
    }
    .boxed()
  })
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
  serde_json::from_value(value).map_err(|e| eyre!("Failed to decode cached value: {}", e))
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicU32;
  use std::sync::atomic::Ordering as AtomicOrdering;

  use serde::Deserialize;
  use serde_json::json;

  use crate::cache::entry::test_clock::ManualClock;
  use crate::cache::entry::CacheEntry;
  use crate::cache::mirror::{NoopMirror, SqliteMirror};
  use crate::cache::policy::CategoryPolicy;

  use super::*;

  const TTL: Duration = Duration::from_millis(5000);
  const STALE: Duration = Duration::from_millis(2000);

  fn test_policies() -> CachePolicies {
    CachePolicies::new()
      .with_category(
        "team-details",
        CategoryPolicy::new(TTL, STALE).with_storage(StorageClass::Durable),
      )
      .with_category(
        "permissions",
        CategoryPolicy::new(TTL, STALE).with_storage(StorageClass::Session),
      )
      .with_category("team-issues", CategoryPolicy::new(TTL, STALE).volatile())
      .with_fallback(CategoryPolicy::new(TTL, STALE))
  }

  fn cache_with(
    durable: Arc<dyn MirrorStore>,
    session: Arc<dyn MirrorStore>,
    clock: Arc<ManualClock>,
  ) -> ResponseCache {
    let config = CacheConfig {
      policies: test_policies(),
      sweep_interval: Duration::from_secs(60),
      sweep_grace: Duration::from_secs(300),
    };
    ResponseCache::with_clock(config, durable, session, clock)
  }

  fn memory_cache() -> (ResponseCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let cache = cache_with(Arc::new(NoopMirror), Arc::new(NoopMirror), clock.clone());
    (cache, clock)
  }

  /// Fetcher returning `value`, counting invocations.
  fn counting(
    calls: &Arc<AtomicU32>,
    value: i64,
  ) -> impl Fn() -> futures::future::Ready<Result<i64>> + Send + Sync + 'static {
    let calls = calls.clone();
    move || {
      calls.fetch_add(1, AtomicOrdering::SeqCst);
      futures::future::ready(Ok(value))
    }
  }

  #[tokio::test]
  async fn test_set_then_get_does_not_fetch() {
    let (cache, _clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    cache.set("linear:team-details:teamId:t1", &vec![1, 2, 3], TTL, STALE);
    let got: Vec<i32> = cache
      .get(
        "linear:team-details:teamId:t1",
        {
          let calls = calls.clone();
          move || {
            calls.fetch_add(1, AtomicOrdering::SeqCst);
            futures::future::ready(Ok(vec![9]))
          }
        },
        TTL,
        STALE,
      )
      .await
      .unwrap();

    assert_eq!(got, vec![1, 2, 3]);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
    assert_eq!(cache.stats().hits, 1);
  }

  #[tokio::test]
  async fn test_miss_fetches_and_caches() {
    let (cache, _clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let first: i64 = cache
      .get("linear:teams", counting(&calls, 7), TTL, STALE)
      .await
      .unwrap();
    let second: i64 = cache
      .get("linear:teams", counting(&calls, 8), TTL, STALE)
      .await
      .unwrap();

    assert_eq!(first, 7);
    assert_eq!(second, 7);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
  }

  #[tokio::test]
  async fn test_fresh_within_stale_window() {
    let (cache, clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let _: i64 = cache
      .get("linear:teams", counting(&calls, 1), TTL, STALE)
      .await
      .unwrap();

    clock.advance(Duration::from_millis(1000));
    let got: i64 = cache
      .get("linear:teams", counting(&calls, 2), TTL, STALE)
      .await
      .unwrap();

    assert_eq!(got, 1);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_serves_cached_and_refreshes_exactly_once() {
    let (cache, clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    cache.set("linear:teams", &1i64, TTL, STALE);

    clock.advance(Duration::from_millis(3000));

    // A slow fetcher keeps the first refresh in flight while the second
    // stale read schedules its own.
    let slow = {
      let calls = calls.clone();
      move || {
        let calls = calls.clone();
        async move {
          calls.fetch_add(1, AtomicOrdering::SeqCst);
          tokio::time::sleep(Duration::from_millis(20)).await;
          Ok(2i64)
        }
      }
    };

    // Two overlapping stale reads: both serve the aged value immediately.
    let a: i64 = cache
      .get("linear:teams", slow.clone(), TTL, STALE)
      .await
      .unwrap();
    let b: i64 = cache
      .get("linear:teams", slow, TTL, STALE)
      .await
      .unwrap();
    assert_eq!(a, 1);
    assert_eq!(b, 1);
    assert_eq!(cache.stats().stale_hits, 2);

    // Let the detached refreshes run; the coordinator collapses them into
    // a single upstream fetch.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

    // The refresh replaced the entry with policy-fresh timestamps.
    let after: i64 = cache
      .get("linear:teams", counting(&calls, 4), TTL, STALE)
      .await
      .unwrap();
    assert_eq!(after, 2);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_hard_expired_is_blocking_miss() {
    let (cache, clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    cache.set("linear:teams", &1i64, TTL, STALE);
    clock.advance(Duration::from_millis(6000));

    let got: i64 = cache
      .get("linear:teams", counting(&calls, 2), TTL, STALE)
      .await
      .unwrap();

    assert_eq!(got, 2);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(cache.stats().misses, 1);
  }

  #[tokio::test]
  async fn test_ten_concurrent_misses_coalesce() {
    let (cache, _clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let gets = (0..10).map(|_| {
      let cache = cache.clone();
      let calls = calls.clone();
      async move {
        cache
          .get::<i64, _, _>(
            "linear:team-details:teamId:t1",
            move || {
              let calls = calls.clone();
              async move {
                calls.fetch_add(1, AtomicOrdering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(42)
              }
            },
            TTL,
            STALE,
          )
          .await
          .unwrap()
      }
    });

    let results = futures::future::join_all(gets).await;

    assert_eq!(results, vec![42; 10]);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidate_namespace_precision() {
    let (cache, _clock) = memory_cache();

    cache.set("team:abc:issues", &1i64, TTL, STALE);
    cache.set("team:abc:config", &2i64, TTL, STALE);
    cache.set("team:xyz:issues", &3i64, TTL, STALE);

    cache.invalidate_namespace("abc");

    assert_eq!(cache.stats().size, 1);
    let calls = Arc::new(AtomicU32::new(0));
    let survivor: i64 = cache
      .get("team:xyz:issues", counting(&calls, 9), TTL, STALE)
      .await
      .unwrap();
    assert_eq!(survivor, 3);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_namespace_matching_is_segment_exact() {
    let (cache, _clock) = memory_cache();

    cache.set("team:abc:issues", &1i64, TTL, STALE);
    cache.set("team:abcd:issues", &2i64, TTL, STALE);
    cache.set("prefix:x:abc", &3i64, TTL, STALE);

    cache.invalidate_namespace("abc");

    // `abcd` is a different identifier; a trailing `abc` segment matches.
    assert_eq!(cache.stats().size, 1);
  }

  #[tokio::test]
  async fn test_invalidate_substring_and_regex() {
    let (cache, _clock) = memory_cache();

    cache.set("linear:team-issues:teamId:t1", &1i64, TTL, STALE);
    cache.set("linear:team-details:teamId:t1", &2i64, TTL, STALE);
    cache.set("linear:users", &3i64, TTL, STALE);

    cache.invalidate("team-issues");
    assert_eq!(cache.stats().size, 2);

    cache.invalidate(regex::Regex::new("^linear:team-").unwrap());
    assert_eq!(cache.stats().size, 1);
  }

  #[tokio::test]
  async fn test_persistence_allow_list() {
    let clock = Arc::new(ManualClock::new());
    let durable = Arc::new(SqliteMirror::in_memory().unwrap());
    let session = Arc::new(SqliteMirror::in_memory().unwrap());
    let cache = cache_with(durable.clone(), session.clone(), clock);

    // Volatile category: never mirrored anywhere.
    cache.set("linear:team-issues:teamId:t1", &json!([1]), TTL, STALE);
    assert!(durable.keys().unwrap().is_empty());
    assert!(session.keys().unwrap().is_empty());

    // Stable category: mirrored durably.
    cache.set("linear:team-details:teamId:t1", &json!({"id": "t1"}), TTL, STALE);
    assert_eq!(
      durable.keys().unwrap(),
      vec!["linear:team-details:teamId:t1".to_string()]
    );
    assert!(session.keys().unwrap().is_empty());

    // Session category: mirrored to the session scope only.
    cache.set("linear:permissions:userId:u1", &json!({"admin": true}), TTL, STALE);
    assert_eq!(
      session.keys().unwrap(),
      vec!["linear:permissions:userId:u1".to_string()]
    );
    assert_eq!(durable.keys().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_rehydration_restores_stable_entries() {
    let durable: Arc<SqliteMirror> = Arc::new(SqliteMirror::in_memory().unwrap());
    let clock = Arc::new(ManualClock::new());

    {
      let first = cache_with(durable.clone(), Arc::new(NoopMirror), clock.clone());
      first.set("linear:team-details:teamId:t1", &json!({"id": "t1"}), TTL, STALE);
    }

    // A second instance over the same durable store sees the entry
    // without fetching.
    let second = cache_with(durable, Arc::new(NoopMirror), clock);
    let calls = Arc::new(AtomicU32::new(0));
    let got: Value = second
      .get(
        "linear:team-details:teamId:t1",
        {
          let calls = calls.clone();
          move || {
            calls.fetch_add(1, AtomicOrdering::SeqCst);
            futures::future::ready(Ok(json!(null)))
          }
        },
        TTL,
        STALE,
      )
      .await
      .unwrap();

    assert_eq!(got, json!({"id": "t1"}));
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_rehydration_drops_expired_entries() {
    let durable: Arc<SqliteMirror> = Arc::new(SqliteMirror::in_memory().unwrap());
    let clock = Arc::new(ManualClock::new());

    {
      let first = cache_with(durable.clone(), Arc::new(NoopMirror), clock.clone());
      first.set("linear:team-details:teamId:t1", &json!({"id": "t1"}), TTL, STALE);
    }

    // Past hard expiry before the second instance starts.
    clock.advance(Duration::from_millis(6000));
    let second = cache_with(durable.clone(), Arc::new(NoopMirror), clock);

    assert_eq!(second.stats().size, 0);
    assert!(durable.keys().unwrap().is_empty());

    // The fetch is not skipped because of the dead entry.
    let calls = Arc::new(AtomicU32::new(0));
    let got: i64 = second
      .get("linear:team-details:teamId:t1", counting(&calls, 5), TTL, STALE)
      .await
      .unwrap();
    assert_eq!(got, 5);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_rehydration_purges_volatile_keys_from_durable_storage() {
    let durable: Arc<SqliteMirror> = Arc::new(SqliteMirror::in_memory().unwrap());
    let clock = Arc::new(ManualClock::new());

    // A volatile-category entry in durable storage is corruption left by
    // a previous version.
    durable
      .put(&CacheEntry::new(
        "linear:team-issues:teamId:t1".to_string(),
        json!([1, 2]),
        clock.now(),
        Duration::from_secs(600),
        Duration::from_secs(60),
      ))
      .unwrap();

    let cache = cache_with(durable.clone(), Arc::new(NoopMirror), clock);

    assert_eq!(cache.stats().size, 0);
    assert!(durable.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_only_always_fetches_and_overwrites() {
    let (cache, _clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    cache.set("linear:team-details:teamId:t1", &1i64, TTL, STALE);

    // Entry is fresh, but network_only must still hit the network.
    let got: i64 = cache
      .network_only("linear:team-details:teamId:t1", counting(&calls, 2))
      .await
      .unwrap();
    assert_eq!(got, 2);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

    // And the entry was overwritten.
    let after: i64 = cache
      .get("linear:team-details:teamId:t1", counting(&calls, 3), TTL, STALE)
      .await
      .unwrap();
    assert_eq!(after, 2);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_fetch_failure_propagates_and_is_retryable() {
    let (cache, _clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let fetcher = {
      let calls = calls.clone();
      move || {
        let attempt = calls.fetch_add(1, AtomicOrdering::SeqCst);
        async move {
          if attempt == 0 {
            Err(eyre!("upstream unavailable"))
          } else {
            Ok(11i64)
          }
        }
      }
    };

    let err = cache
      .get::<i64, _, _>("linear:teams", fetcher.clone(), TTL, STALE)
      .await
      .unwrap_err();
    assert!(err.to_string().contains("upstream unavailable"));

    // The failure did not create an entry or poison the key.
    assert_eq!(cache.stats().size, 0);
    let got: i64 = cache.get("linear:teams", fetcher, TTL, STALE).await.unwrap();
    assert_eq!(got, 11);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_failed_refresh_leaves_stale_entry_untouched() {
    let (cache, clock) = memory_cache();

    cache.set("linear:teams", &1i64, TTL, STALE);
    clock.advance(Duration::from_millis(3000));

    let failing = || futures::future::ready(Err::<i64, _>(eyre!("refresh boom")));

    let got: i64 = cache.get("linear:teams", failing, TTL, STALE).await.unwrap();
    assert_eq!(got, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    // Entry is still there and still servable as stale.
    let again: i64 = cache.get("linear:teams", failing, TTL, STALE).await.unwrap();
    assert_eq!(again, 1);
    assert_eq!(cache.stats().stale_hits, 2);
  }

  #[tokio::test]
  async fn test_hidden_context_forces_miss_for_volatile_category() {
    let (cache, _clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    cache.set("linear:team-issues:teamId:t1", &1i64, TTL, STALE);

    cache.set_visible(false);
    let got: i64 = cache
      .get("linear:team-issues:teamId:t1", counting(&calls, 2), TTL, STALE)
      .await
      .unwrap();
    assert_eq!(got, 2);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(cache.stats().misses, 1);

    // Non-volatile categories are unaffected by visibility.
    cache.set("linear:team-details:teamId:t1", &3i64, TTL, STALE);
    let detail: i64 = cache
      .get("linear:team-details:teamId:t1", counting(&calls, 4), TTL, STALE)
      .await
      .unwrap();
    assert_eq!(detail, 3);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

    // Visible again: the fresh overwrite from the forced miss serves.
    cache.set_visible(true);
    let visible: i64 = cache
      .get("linear:team-issues:teamId:t1", counting(&calls, 5), TTL, STALE)
      .await
      .unwrap();
    assert_eq!(visible, 2);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidation_drops_inflight_write_back() {
    let (cache, _clock) = memory_cache();
    let calls = Arc::new(AtomicU32::new(0));

    let slow = {
      let calls = calls.clone();
      move || {
        calls.fetch_add(1, AtomicOrdering::SeqCst);
        async move {
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok(1i64)
        }
      }
    };

    let pending = {
      let cache = cache.clone();
      let slow = slow.clone();
      tokio::spawn(async move {
        cache
          .get::<i64, _, _>("linear:team-details:teamId:abc", slow, TTL, STALE)
          .await
      })
    };

    // Let the fetch start, then invalidate the namespace mid-flight.
    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.invalidate_namespace("abc");

    // The caller still receives the fetched value...
    assert_eq!(pending.await.unwrap().unwrap(), 1);
    // ...but it was not written back into the cache.
    assert_eq!(cache.stats().size, 0);
  }

  #[tokio::test]
  async fn test_mirror_write_failure_keeps_memory_entry() {
    struct FailingMirror;

    impl MirrorStore for FailingMirror {
      fn put(&self, _entry: &CacheEntry) -> Result<()> {
        Err(eyre!("quota exceeded"))
      }
      fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
      }
      fn remove_many(&self, _keys: &[String]) -> Result<()> {
        Ok(())
      }
      fn load_all(&self) -> Result<Vec<CacheEntry>> {
        Ok(Vec::new())
      }
      fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
      }
      fn clear(&self) -> Result<()> {
        Ok(())
      }
    }

    let clock = Arc::new(ManualClock::new());
    let cache = cache_with(Arc::new(FailingMirror), Arc::new(NoopMirror), clock);
    let calls = Arc::new(AtomicU32::new(0));

    cache.set("linear:team-details:teamId:t1", &1i64, TTL, STALE);

    let got: i64 = cache
      .get("linear:team-details:teamId:t1", counting(&calls, 2), TTL, STALE)
      .await
      .unwrap();
    assert_eq!(got, 1);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_clear_empties_memory_and_mirrors() {
    let clock = Arc::new(ManualClock::new());
    let durable = Arc::new(SqliteMirror::in_memory().unwrap());
    let session = Arc::new(SqliteMirror::in_memory().unwrap());
    let cache = cache_with(durable.clone(), session.clone(), clock);

    cache.set("linear:team-details:teamId:t1", &1i64, TTL, STALE);
    cache.set("linear:permissions:userId:u1", &2i64, TTL, STALE);
    cache.set("linear:team-issues:teamId:t1", &3i64, TTL, STALE);

    cache.clear();

    assert_eq!(cache.stats().size, 0);
    assert!(durable.keys().unwrap().is_empty());
    assert!(session.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_typed_roundtrip() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TeamDetails {
      id: String,
      name: String,
      member_count: u32,
    }

    let (cache, _clock) = memory_cache();
    let details = TeamDetails {
      id: "t1".into(),
      name: "Platform".into(),
      member_count: 12,
    };

    let expected = details.clone();
    let got: TeamDetails = cache
      .get(
        "linear:team-details:teamId:t1",
        move || futures::future::ready(Ok(details.clone())),
        TTL,
        STALE,
      )
      .await
      .unwrap();

    assert_eq!(got, expected);
  }
}
