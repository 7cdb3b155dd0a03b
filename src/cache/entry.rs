//! Cache entry model and freshness classification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A single cached response.
///
/// The payload is held as a `serde_json::Value` so one store can hold every
/// resource type; the public API converts at the boundary. Timestamps are
/// absolute wall-clock times so an entry survives the mirror round-trip
/// across process restarts. Invariant: `created_at <= stale_at <= expires_at`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  pub data: Value,
  pub created_at: DateTime<Utc>,
  pub stale_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Create an entry timestamped at `now` with the given policy durations.
  ///
  /// `stale_time` is clamped to `ttl` so the invariant holds even for a
  /// misconfigured caller; `stale_time == ttl` disables the stale window
  /// entirely (fresh-or-miss).
  pub fn new(
    key: String,
    data: Value,
    now: DateTime<Utc>,
    ttl: Duration,
    stale_time: Duration,
  ) -> Self {
    let stale_time = stale_time.min(ttl);
    Self {
      key,
      data,
      created_at: now,
      stale_at: now + to_chrono(stale_time),
      expires_at: now + to_chrono(ttl),
    }
  }

  /// Classify this entry relative to `now`.
  ///
  /// The stale bound is the narrower window and must be tested first;
  /// `expires_at` only bounds the stale case.
  pub fn classify(&self, now: DateTime<Utc>) -> Freshness {
    if now < self.stale_at {
      Freshness::Fresh
    } else if now < self.expires_at {
      Freshness::Stale
    } else {
      Freshness::Miss
    }
  }

  /// Whether the entry expired more than `grace` ago (sweep eligibility).
  pub fn is_evictable(&self, now: DateTime<Utc>, grace: Duration) -> bool {
    now >= self.expires_at + to_chrono(grace)
  }
}

/// Freshness classification of an entry at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Inside the fresh window; serve directly.
  Fresh,
  /// Past the stale bound but not hard-expired; serve and refresh.
  Stale,
  /// Hard-expired or absent; a blocking fetch is required.
  Miss,
}

fn to_chrono(d: Duration) -> chrono::Duration {
  chrono::Duration::milliseconds(d.as_millis().min(i64::MAX as u128) as i64)
}

/// Time source for classification and sweeping.
///
/// Injected at cache construction so tests can drive the clock directly
/// instead of sleeping through real TTL windows.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}
