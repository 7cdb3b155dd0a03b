//! Cache key registry and category policies for Linear resources.
//!
//! Every cache key used by the portal is built here, so the key format
//! (`linear:<resource>[:<param>:<value>]*`) and the category policy table
//! stay in one place.

use std::time::Duration;

use crate::cache::{build_key, CachePolicies, CategoryPolicy, StorageClass};

pub fn teams() -> String {
  build_key("linear:teams", &[])
}

pub fn team_details(team_id: &str) -> String {
  build_key("linear:team-details", &[("teamId", team_id)])
}

pub fn team_members(team_id: &str) -> String {
  build_key("linear:team-members", &[("teamId", team_id)])
}

pub fn workflow_states(team_id: &str) -> String {
  build_key("linear:workflow-states", &[("teamId", team_id)])
}

pub fn team_issues(team_id: &str, state_id: Option<&str>) -> String {
  match state_id {
    Some(state) => build_key(
      "linear:team-issues",
      &[("teamId", team_id), ("stateId", state)],
    ),
    None => build_key("linear:team-issues", &[("teamId", team_id)]),
  }
}

pub fn issue_details(issue_id: &str) -> String {
  build_key("linear:issue-details", &[("issueId", issue_id)])
}

pub fn users() -> String {
  build_key("linear:users", &[])
}

pub fn customers() -> String {
  build_key("linear:customers", &[])
}

pub fn permissions(user_id: &str) -> String {
  build_key("linear:permissions", &[("userId", user_id)])
}

/// The portal's category policy table.
///
/// Stable, rarely-changing domain objects (teams, rosters, workflow
/// definitions, users) persist durably across reloads. The resolved
/// permission hierarchy is session-scoped. Issue-level data is volatile:
/// memory-only, never mirrored, and not served stale while the portal is
/// hidden. Issue lists run fresh-or-miss so a list can never show an item
/// in a pre-approval state after an action.
pub fn policies() -> CachePolicies {
  let stable = |ttl_secs, stale_secs| {
    CategoryPolicy::new(
      Duration::from_secs(ttl_secs),
      Duration::from_secs(stale_secs),
    )
    .with_storage(StorageClass::Durable)
  };

  CachePolicies::new()
    .with_category("teams", stable(1800, 600))
    .with_category("team-details", stable(1800, 600))
    .with_category("team-members", stable(1800, 600))
    .with_category("workflow-states", stable(3600, 1800))
    .with_category("users", stable(1800, 600))
    .with_category(
      "permissions",
      CategoryPolicy::new(Duration::from_secs(900), Duration::from_secs(300))
        .with_storage(StorageClass::Session),
    )
    .with_category(
      "team-issues",
      CategoryPolicy::fresh_or_miss(Duration::from_secs(120)).volatile(),
    )
    .with_category(
      "issue-details",
      CategoryPolicy::new(Duration::from_secs(300), Duration::from_secs(60)).volatile(),
    )
    .with_category(
      "customers",
      CategoryPolicy::new(Duration::from_secs(600), Duration::from_secs(180)),
    )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_format_matches_contract() {
    assert_eq!(
      team_details("abc123"),
      "linear:team-details:teamId:abc123"
    );
    assert_eq!(teams(), "linear:teams");
    assert_eq!(
      team_issues("abc123", Some("s1")),
      "linear:team-issues:stateId:s1:teamId:abc123"
    );
  }

  #[test]
  fn test_issue_categories_are_never_mirrored() {
    let policies = policies();
    for key in [team_issues("t1", None), issue_details("i1")] {
      let policy = policies.for_key(&key);
      assert!(policy.volatile);
      assert_eq!(policy.storage, StorageClass::Memory);
    }
  }

  #[test]
  fn test_stable_categories_are_durable() {
    let policies = policies();
    for key in [
      teams(),
      team_details("t1"),
      team_members("t1"),
      workflow_states("t1"),
      users(),
    ] {
      assert_eq!(policies.for_key(&key).storage, StorageClass::Durable);
    }
    assert_eq!(
      policies.for_key(&permissions("u1")).storage,
      StorageClass::Session
    );
  }

  #[test]
  fn test_issue_lists_are_fresh_or_miss() {
    let policies = policies();
    let policy = policies.for_key(&team_issues("t1", None));
    assert_eq!(policy.stale_time, policy.ttl);
  }
}
