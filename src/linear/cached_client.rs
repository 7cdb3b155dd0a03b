//! Cached Linear client: the same API as [`LinearClient`], routed through
//! the response cache.
//!
//! Reads take their timing from the category policy table. Mutations drop
//! every cached view computed before the change (including in-flight
//! fetches) and re-read the affected resource with `network_only`, so the
//! next read cannot observe pre-mutation state.

use color_eyre::Result;
use regex::Regex;
use tracing::warn;

use crate::cache::ResponseCache;
use crate::config::Config;

use super::client::LinearClient;
use super::keys;
use super::types::{
  Customer, Issue, IssueSummary, PermissionHierarchy, Team, TeamDetails, TeamMember, User,
  WorkflowState,
};

#[derive(Clone)]
pub struct CachedLinearClient {
  inner: LinearClient,
  cache: ResponseCache,
}

impl CachedLinearClient {
  /// Wrap a client over the shared cache wired up by the composition root.
  pub fn new(config: &Config, cache: ResponseCache) -> Result<Self> {
    let inner = LinearClient::new(config)?;
    Ok(Self { inner, cache })
  }

  pub fn cache(&self) -> &ResponseCache {
    &self.cache
  }

  pub async fn teams(&self) -> Result<Vec<Team>> {
    let key = keys::teams();
    let policy = self.cache.policy_for(&key);
    let inner = self.inner.clone();
    self
      .cache
      .get(
        &key,
        move || {
          let inner = inner.clone();
          async move { inner.teams().await }
        },
        policy.ttl,
        policy.stale_time,
      )
      .await
  }

  pub async fn team_details(&self, team_id: &str) -> Result<TeamDetails> {
    let key = keys::team_details(team_id);
    let policy = self.cache.policy_for(&key);
    let inner = self.inner.clone();
    let team_id = team_id.to_string();
    self
      .cache
      .get(
        &key,
        move || {
          let inner = inner.clone();
          let team_id = team_id.clone();
          async move { inner.team_details(&team_id).await }
        },
        policy.ttl,
        policy.stale_time,
      )
      .await
  }

  pub async fn team_members(&self, team_id: &str) -> Result<Vec<TeamMember>> {
    let key = keys::team_members(team_id);
    let policy = self.cache.policy_for(&key);
    let inner = self.inner.clone();
    let team_id = team_id.to_string();
    self
      .cache
      .get(
        &key,
        move || {
          let inner = inner.clone();
          let team_id = team_id.clone();
          async move { inner.team_members(&team_id).await }
        },
        policy.ttl,
        policy.stale_time,
      )
      .await
  }

  pub async fn workflow_states(&self, team_id: &str) -> Result<Vec<WorkflowState>> {
    let key = keys::workflow_states(team_id);
    let policy = self.cache.policy_for(&key);
    let inner = self.inner.clone();
    let team_id = team_id.to_string();
    self
      .cache
      .get(
        &key,
        move || {
          let inner = inner.clone();
          let team_id = team_id.clone();
          async move { inner.workflow_states(&team_id).await }
        },
        policy.ttl,
        policy.stale_time,
      )
      .await
  }

  pub async fn team_issues(
    &self,
    team_id: &str,
    state_id: Option<&str>,
  ) -> Result<Vec<IssueSummary>> {
    let key = keys::team_issues(team_id, state_id);
    let policy = self.cache.policy_for(&key);
    let inner = self.inner.clone();
    let team_id = team_id.to_string();
    let state_id = state_id.map(String::from);
    self
      .cache
      .get(
        &key,
        move || {
          let inner = inner.clone();
          let team_id = team_id.clone();
          let state_id = state_id.clone();
          async move { inner.team_issues(&team_id, state_id.as_deref()).await }
        },
        policy.ttl,
        policy.stale_time,
      )
      .await
  }

  pub async fn issue(&self, issue_id: &str) -> Result<Issue> {
    let key = keys::issue_details(issue_id);
    let policy = self.cache.policy_for(&key);
    let inner = self.inner.clone();
    let issue_id = issue_id.to_string();
    self
      .cache
      .get(
        &key,
        move || {
          let inner = inner.clone();
          let issue_id = issue_id.clone();
          async move { inner.issue(&issue_id).await }
        },
        policy.ttl,
        policy.stale_time,
      )
      .await
  }

  pub async fn users(&self) -> Result<Vec<User>> {
    let key = keys::users();
    let policy = self.cache.policy_for(&key);
    let inner = self.inner.clone();
    self
      .cache
      .get(
        &key,
        move || {
          let inner = inner.clone();
          async move { inner.users().await }
        },
        policy.ttl,
        policy.stale_time,
      )
      .await
  }

  pub async fn customers(&self) -> Result<Vec<Customer>> {
    let key = keys::customers();
    let policy = self.cache.policy_for(&key);
    let inner = self.inner.clone();
    self
      .cache
      .get(
        &key,
        move || {
          let inner = inner.clone();
          async move { inner.customers().await }
        },
        policy.ttl,
        policy.stale_time,
      )
      .await
  }

  /// Resolved permission hierarchy for the signed-in user.
  pub async fn permissions(&self, user_id: &str) -> Result<PermissionHierarchy> {
    let key = keys::permissions(user_id);
    let policy = self.cache.policy_for(&key);
    let inner = self.inner.clone();
    self
      .cache
      .get(
        &key,
        move || {
          let inner = inner.clone();
          async move { inner.viewer_permissions().await }
        },
        policy.ttl,
        policy.stale_time,
      )
      .await
  }

  /// Move a work item to another workflow state (the approve/reject
  /// action), then re-read it authoritatively.
  pub async fn update_issue_state(&self, issue_id: &str, state_id: &str) -> Result<Issue> {
    let updated = self.inner.update_issue_state(issue_id, state_id).await?;

    // Drop every cached view computed before the state change: the issue
    // itself and its team's issue lists.
    self.cache.invalidate_namespace(issue_id);
    if let Some(team_id) = &updated.team_id {
      self.invalidate_team_issue_lists(team_id);
    }

    let key = keys::issue_details(issue_id);
    let inner = self.inner.clone();
    let issue_id = issue_id.to_string();
    self
      .cache
      .network_only(&key, move || {
        let inner = inner.clone();
        let issue_id = issue_id.clone();
        async move { inner.issue(&issue_id).await }
      })
      .await
  }

  /// Archive a work item. The owning team is unknown after archival, so
  /// every issue list is dropped.
  pub async fn archive_issue(&self, issue_id: &str) -> Result<()> {
    self.inner.archive_issue(issue_id).await?;
    self.cache.invalidate_namespace(issue_id);
    self.cache.invalidate("linear:team-issues");
    Ok(())
  }

  /// Activate or deactivate a portal user (admin screens), then re-read
  /// the user list authoritatively.
  pub async fn update_user_active(&self, user_id: &str, active: bool) -> Result<User> {
    let updated = self.inner.update_user_active(user_id, active).await?;

    // Permission hierarchies derived from this user are stale too.
    self.cache.invalidate_namespace(user_id);

    let key = keys::users();
    let inner = self.inner.clone();
    let _: Vec<User> = self
      .cache
      .network_only(&key, move || {
        let inner = inner.clone();
        async move { inner.users().await }
      })
      .await?;

    Ok(updated)
  }

  /// Create a customer organization (admin screens), then re-read the
  /// customer list authoritatively.
  pub async fn create_customer(&self, name: &str, domain: Option<&str>) -> Result<Customer> {
    let created = self.inner.create_customer(name, domain).await?;

    let key = keys::customers();
    let inner = self.inner.clone();
    let _: Vec<Customer> = self
      .cache
      .network_only(&key, move || {
        let inner = inner.clone();
        async move { inner.customers().await }
      })
      .await?;

    Ok(created)
  }

  /// Drop every cached issue list for one team, whatever state filter it
  /// was fetched with.
  fn invalidate_team_issue_lists(&self, team_id: &str) {
    match Regex::new(&format!(
      "^linear:team-issues:.*teamId:{}(:|$)",
      regex::escape(team_id)
    )) {
      Ok(re) => self.cache.invalidate(re),
      Err(e) => warn!(team_id = %team_id, error = %e, "invalid team list pattern"),
    }
  }
}
