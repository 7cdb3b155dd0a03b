//! Client-side throttle for outbound API requests.
//!
//! The upstream API enforces a per-key request budget; pacing requests
//! locally keeps the portal from burning it down and turns a burst of
//! cache misses into a queue instead of a string of 429s. The cache layer
//! treats a limiter rejection like any other fetch failure.

use std::num::NonZeroU32;

use color_eyre::{eyre::eyre, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Token-bucket pacing for outbound requests, shared by all fetchers.
pub struct ApiRateLimiter {
  limiter: DefaultDirectRateLimiter,
}

impl ApiRateLimiter {
  /// Limiter allowing `per_minute` requests per minute. Zero disables
  /// pacing entirely by treating the quota as effectively unbounded.
  pub fn new(per_minute: u32) -> Result<Self> {
    let per_minute = if per_minute == 0 { u32::MAX } else { per_minute };
    let quota = NonZeroU32::new(per_minute)
      .map(Quota::per_minute)
      .ok_or_else(|| eyre!("Invalid rate limit quota"))?;

    Ok(Self {
      limiter: RateLimiter::direct(quota),
    })
  }

  /// Wait until a request slot is available.
  pub async fn acquire(&self) {
    self.limiter.until_ready().await;
  }
}
