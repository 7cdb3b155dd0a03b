//! Linear API integration: typed client, outbound rate limiting, the
//! cache key registry, and the cached client the portal consumes.

mod api_types;
pub mod cached_client;
pub mod client;
pub mod keys;
pub mod rate_limit;
pub mod types;

pub use cached_client::CachedLinearClient;
pub use client::LinearClient;
