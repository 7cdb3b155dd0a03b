//! Response cache and request-coordination layer.
//!
//! Sits between UI consumers and the rate-limited upstream API:
//! - time-based expiry with stale-while-revalidate serving
//! - in-flight request deduplication across concurrent callers
//! - cross-reload persistence with a durable/volatile category split
//! - pattern-based bulk invalidation triggered by mutations
//! - hit/miss/stale counters for observability

mod coordinator;
mod entry;
mod key;
mod layer;
mod mirror;
mod policy;
mod stats;
mod store;

pub use entry::{CacheEntry, Clock, SystemClock};
pub use key::{build_key, category_of};
pub use layer::{CacheConfig, InvalidationPattern, ResponseCache};
pub use mirror::{MirrorStore, NoopMirror, SqliteMirror};
pub use policy::{CachePolicies, CategoryPolicy, StorageClass};
pub use stats::StatsSnapshot;
