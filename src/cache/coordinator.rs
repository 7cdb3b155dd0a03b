//! In-flight request coordination.
//!
//! Concurrent cache-miss fetches for the same key are merged into one
//! shared upstream fetch: the first caller registers a pending fetch, later
//! callers await the same shared future. Registrations are removed on
//! settle (success and failure alike) so a failed fetch is retried by the
//! next caller rather than poisoning the key.
//!
//! Each registration carries a generation id. Write-back after a fetch is
//! only permitted while its registration is still the current one, so an
//! invalidation (or a `network_only` overwrite) that lands mid-flight
//! prevents the old response from being written back into the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures::future::{BoxFuture, Shared};
use serde_json::Value;

/// The future every coalesced caller awaits. Errors are erased to strings
/// so the output is cheaply clonable across callers.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value, String>>>;

struct PendingFetch {
  id: u64,
  shared: SharedFetch,
}

/// Registry of in-flight fetches keyed by cache key.
pub struct RequestCoordinator {
  pending: Mutex<HashMap<String, PendingFetch>>,
  next_id: AtomicU64,
}

impl RequestCoordinator {
  pub fn new() -> Self {
    Self {
      pending: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(1),
    }
  }

  /// Join the in-flight fetch for `key`, or register the one built by
  /// `start`. Returns the shared future to await; at most one fetch is in
  /// flight per key between its start and settle.
  ///
  /// `start` receives the generation id the new fetch must pass to
  /// [`settle`](Self::settle).
  pub fn join_or_start<F>(&self, key: &str, start: F) -> SharedFetch
  where
    F: FnOnce(u64) -> SharedFetch,
  {
    let mut pending = self.pending.lock().unwrap();
    if let Some(p) = pending.get(key) {
      return p.shared.clone();
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let shared = start(id);
    pending.insert(
      key.to_string(),
      PendingFetch {
        id,
        shared: shared.clone(),
      },
    );
    shared
  }

  /// Remove the registration for `key` if generation `id` is still the
  /// current one. Returns whether it was: the fetch that started this
  /// generation may write its result back exactly when this returns true.
  pub fn settle(&self, key: &str, id: u64) -> bool {
    let mut pending = self.pending.lock().unwrap();
    match pending.get(key) {
      Some(p) if p.id == id => {
        pending.remove(key);
        true
      }
      _ => false,
    }
  }

  /// Drop the registration for `key` regardless of generation. The fetch
  /// itself is not cancelled; it settles unobserved and skips write-back.
  pub fn remove(&self, key: &str) {
    self.pending.lock().unwrap().remove(key);
  }

  /// Drop every registration whose key satisfies `matches`.
  pub fn remove_matching(&self, matches: impl Fn(&str) -> bool) {
    self.pending.lock().unwrap().retain(|key, _| !matches(key));
  }

  pub fn clear(&self) {
    self.pending.lock().unwrap().clear();
  }

  #[cfg(test)]
  pub fn is_pending(&self, key: &str) -> bool {
    self.pending.lock().unwrap().contains_key(key)
  }
}

impl Default for RequestCoordinator {
  fn default() -> Self {
    Self::new()
  }
}
