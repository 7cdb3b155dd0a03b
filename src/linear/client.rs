//! Linear GraphQL API client.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use url::Url;

use crate::config::Config;

use super::api_types::{
  ApiCustomer, ApiIssue, ApiMember, ApiNodes, ApiTeam, ApiTeamDetails, ApiUser, ApiViewer,
  ApiWorkflowState,
};
use super::rate_limit::ApiRateLimiter;
use super::types::{
  Customer, Issue, IssueSummary, PermissionHierarchy, Team, TeamDetails, TeamMember, User,
  WorkflowState,
};

const TEAMS_QUERY: &str = "query { teams { nodes { id key name } } }";

const TEAM_DETAILS_QUERY: &str =
  "query($id: String!) { team(id: $id) { id key name description private } }";

const TEAM_MEMBERS_QUERY: &str =
  "query($id: String!) { team(id: $id) { members { nodes { id name email admin } } } }";

const WORKFLOW_STATES_QUERY: &str =
  "query($id: String!) { team(id: $id) { states { nodes { id name type position } } } }";

const TEAM_ISSUES_QUERY: &str = "query($id: String!, $filter: IssueFilter) {
  team(id: $id) { issues(filter: $filter) {
    nodes { id identifier title state { id } assignee { name } updatedAt createdAt }
  } }
}";

const ISSUE_QUERY: &str = "query($id: String!) {
  issue(id: $id) {
    id identifier title description team { id } state { id } assignee { name }
    labels { nodes { name } } createdAt updatedAt
  }
}";

const USERS_QUERY: &str = "query { users { nodes { id name email active } } }";

const CUSTOMERS_QUERY: &str = "query { customers { nodes { id name domain } } }";

const VIEWER_QUERY: &str = "query {
  viewer { id admin teamMemberships { nodes { team { id } owner } } }
}";

const UPDATE_ISSUE_STATE_MUTATION: &str = "mutation($id: String!, $stateId: String!) {
  issueUpdate(id: $id, input: { stateId: $stateId }) {
    issue {
      id identifier title description team { id } state { id } assignee { name }
      labels { nodes { name } } createdAt updatedAt
    }
  }
}";

const ARCHIVE_ISSUE_MUTATION: &str =
  "mutation($id: String!) { issueArchive(id: $id) { success } }";

const UPDATE_USER_MUTATION: &str = "mutation($id: String!, $active: Boolean!) {
  userUpdate(id: $id, input: { active: $active }) { user { id name email active } }
}";

const CREATE_CUSTOMER_MUTATION: &str = "mutation($name: String!, $domain: String) {
  customerCreate(input: { name: $name, domain: $domain }) { customer { id name domain } }
}";

/// Authenticated client for the Linear API. Every request is paced by the
/// shared rate limiter before it leaves the process.
#[derive(Clone)]
pub struct LinearClient {
  http: reqwest::Client,
  endpoint: Url,
  api_key: String,
  limiter: Arc<ApiRateLimiter>,
}

impl LinearClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_token()?;

    let endpoint = Url::parse(&config.linear.url)
      .map_err(|e| eyre!("Invalid Linear API URL {}: {}", config.linear.url, e))?;

    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let limiter = Arc::new(ApiRateLimiter::new(config.requests_per_minute)?);

    Ok(Self {
      http,
      endpoint,
      api_key,
      limiter,
    })
  }

  /// Execute one GraphQL document and return its `data` payload.
  async fn query(&self, document: &str, variables: Value) -> Result<Value> {
    self.limiter.acquire().await;

    let response = self
      .http
      .post(self.endpoint.clone())
      .header("Authorization", self.api_key.as_str())
      .json(&json!({ "query": document, "variables": variables }))
      .send()
      .await
      .map_err(|e| eyre!("Linear API request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Linear API returned {}", status));
    }

    let body: Value = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse Linear API response: {}", e))?;

    if let Some(message) = body
      .pointer("/errors/0/message")
      .and_then(Value::as_str)
    {
      return Err(eyre!("Linear API error: {}", message));
    }

    body
      .get("data")
      .cloned()
      .ok_or_else(|| eyre!("Linear API response has no data"))
  }

  fn extract<T: serde::de::DeserializeOwned>(data: Value, pointer: &str) -> Result<T> {
    let value = data
      .pointer(pointer)
      .cloned()
      .ok_or_else(|| eyre!("Malformed Linear API response: missing {}", pointer))?;
    serde_json::from_value(value).map_err(|e| eyre!("Failed to parse Linear API response: {}", e))
  }

  pub async fn teams(&self) -> Result<Vec<Team>> {
    let data = self.query(TEAMS_QUERY, json!({})).await?;
    let nodes: ApiNodes<ApiTeam> = Self::extract(data, "/teams")?;
    Ok(nodes.nodes.into_iter().map(ApiTeam::into_team).collect())
  }

  pub async fn team_details(&self, team_id: &str) -> Result<TeamDetails> {
    let data = self.query(TEAM_DETAILS_QUERY, json!({ "id": team_id })).await?;
    let team: ApiTeamDetails = Self::extract(data, "/team")?;
    Ok(team.into_details())
  }

  pub async fn team_members(&self, team_id: &str) -> Result<Vec<TeamMember>> {
    let data = self.query(TEAM_MEMBERS_QUERY, json!({ "id": team_id })).await?;
    let nodes: ApiNodes<ApiMember> = Self::extract(data, "/team/members")?;
    Ok(nodes.nodes.into_iter().map(ApiMember::into_member).collect())
  }

  pub async fn workflow_states(&self, team_id: &str) -> Result<Vec<WorkflowState>> {
    let data = self
      .query(WORKFLOW_STATES_QUERY, json!({ "id": team_id }))
      .await?;
    let nodes: ApiNodes<ApiWorkflowState> = Self::extract(data, "/team/states")?;
    Ok(
      nodes
        .nodes
        .into_iter()
        .map(ApiWorkflowState::into_state)
        .collect(),
    )
  }

  pub async fn team_issues(
    &self,
    team_id: &str,
    state_id: Option<&str>,
  ) -> Result<Vec<IssueSummary>> {
    let filter = match state_id {
      Some(state) => json!({ "state": { "id": { "eq": state } } }),
      None => Value::Null,
    };
    let data = self
      .query(TEAM_ISSUES_QUERY, json!({ "id": team_id, "filter": filter }))
      .await?;
    let nodes: ApiNodes<ApiIssue> = Self::extract(data, "/team/issues")?;
    Ok(nodes.nodes.into_iter().map(ApiIssue::into_summary).collect())
  }

  pub async fn issue(&self, issue_id: &str) -> Result<Issue> {
    let data = self.query(ISSUE_QUERY, json!({ "id": issue_id })).await?;
    let issue: ApiIssue = Self::extract(data, "/issue")?;
    Ok(issue.into_full())
  }

  pub async fn users(&self) -> Result<Vec<User>> {
    let data = self.query(USERS_QUERY, json!({})).await?;
    let nodes: ApiNodes<ApiUser> = Self::extract(data, "/users")?;
    Ok(nodes.nodes.into_iter().map(ApiUser::into_user).collect())
  }

  pub async fn customers(&self) -> Result<Vec<Customer>> {
    let data = self.query(CUSTOMERS_QUERY, json!({})).await?;
    let nodes: ApiNodes<ApiCustomer> = Self::extract(data, "/customers")?;
    Ok(
      nodes
        .nodes
        .into_iter()
        .map(ApiCustomer::into_customer)
        .collect(),
    )
  }

  pub async fn viewer_permissions(&self) -> Result<PermissionHierarchy> {
    let data = self.query(VIEWER_QUERY, json!({})).await?;
    let viewer: ApiViewer = Self::extract(data, "/viewer")?;
    Ok(viewer.into_permissions())
  }

  /// Move a work item to another workflow state (approve, reject, ...).
  pub async fn update_issue_state(&self, issue_id: &str, state_id: &str) -> Result<Issue> {
    let data = self
      .query(
        UPDATE_ISSUE_STATE_MUTATION,
        json!({ "id": issue_id, "stateId": state_id }),
      )
      .await?;
    let issue: ApiIssue = Self::extract(data, "/issueUpdate/issue")?;
    Ok(issue.into_full())
  }

  pub async fn archive_issue(&self, issue_id: &str) -> Result<()> {
    let data = self
      .query(ARCHIVE_ISSUE_MUTATION, json!({ "id": issue_id }))
      .await?;
    let success = data
      .pointer("/issueArchive/success")
      .and_then(Value::as_bool)
      .unwrap_or(false);
    if !success {
      return Err(eyre!("Failed to archive issue {}", issue_id));
    }
    Ok(())
  }

  pub async fn update_user_active(&self, user_id: &str, active: bool) -> Result<User> {
    let data = self
      .query(
        UPDATE_USER_MUTATION,
        json!({ "id": user_id, "active": active }),
      )
      .await?;
    let user: ApiUser = Self::extract(data, "/userUpdate/user")?;
    Ok(user.into_user())
  }

  pub async fn create_customer(&self, name: &str, domain: Option<&str>) -> Result<Customer> {
    let data = self
      .query(
        CREATE_CUSTOMER_MUTATION,
        json!({ "name": name, "domain": domain }),
      )
      .await?;
    let customer: ApiCustomer = Self::extract(data, "/customerCreate/customer")?;
    Ok(customer.into_customer())
  }
}
