//! Deterministic cache key construction.
//!
//! Keys are structured as colon-separated segments so that pattern-based
//! invalidation can match on them:
//!
//! ```text
//! <namespace>:<resource>[:<paramName>:<paramValue>]*
//! ```
//!
//! e.g. `linear:team-details:teamId:abc123`. Parameters are sorted by name
//! before concatenation, so identical `(namespace, params)` pairs always
//! produce the identical key regardless of supply order.

/// Build a cache key from a resource namespace and a parameter set.
///
/// The namespace is typically `<api>:<resource>` (e.g. `linear:teams`).
/// With no params the namespace alone is the key.
pub fn build_key(namespace: &str, params: &[(&str, &str)]) -> String {
  if params.is_empty() {
    return namespace.to_string();
  }

  let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
  sorted.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(b.1)));

  let mut key = String::from(namespace);
  for (name, value) in sorted {
    key.push(':');
    key.push_str(name);
    key.push(':');
    key.push_str(value);
  }
  key
}

/// Extract the resource category a key belongs to.
///
/// The category is the resource segment (second segment) of the key; a
/// single-segment key is its own category. Staleness and persistence
/// policies are looked up by category.
pub fn category_of(key: &str) -> &str {
  let mut segments = key.splitn(3, ':');
  let first = segments.next().unwrap_or(key);
  segments.next().unwrap_or(first)
}
