//! Wire-format types for the Linear GraphQL API.
//!
//! These mirror the nested response shapes and convert into the flat
//! domain types the rest of the portal (and the cache) works with.

use serde::Deserialize;

use super::types::{
  Customer, Issue, IssueSummary, PermissionGrant, PermissionHierarchy, Team, TeamDetails,
  TeamMember, User, WorkflowState,
};

/// Connection wrapper: `{ nodes: [...] }`.
#[derive(Debug, Deserialize)]
pub struct ApiNodes<T> {
  pub nodes: Vec<T>,
}

/// Object reference: `{ id }`.
#[derive(Debug, Deserialize)]
pub struct ApiRef {
  pub id: String,
}

/// Named object: `{ name }`.
#[derive(Debug, Deserialize)]
pub struct ApiNamed {
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiTeam {
  pub id: String,
  pub key: String,
  pub name: String,
}

impl ApiTeam {
  pub fn into_team(self) -> Team {
    Team {
      id: self.id,
      key: self.key,
      name: self.name,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiTeamDetails {
  pub id: String,
  pub key: String,
  pub name: String,
  pub description: Option<String>,
  pub private: bool,
}

impl ApiTeamDetails {
  pub fn into_details(self) -> TeamDetails {
    TeamDetails {
      id: self.id,
      key: self.key,
      name: self.name,
      description: self.description,
      private: self.private,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiMember {
  pub id: String,
  pub name: String,
  pub email: String,
  pub admin: bool,
}

impl ApiMember {
  pub fn into_member(self) -> TeamMember {
    TeamMember {
      id: self.id,
      name: self.name,
      email: self.email,
      admin: self.admin,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiWorkflowState {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub state_type: String,
  pub position: f64,
}

impl ApiWorkflowState {
  pub fn into_state(self) -> WorkflowState {
    WorkflowState {
      id: self.id,
      name: self.name,
      state_type: self.state_type,
      position: self.position,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiIssue {
  pub id: String,
  pub identifier: String,
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub team: Option<ApiRef>,
  pub state: ApiRef,
  #[serde(default)]
  pub assignee: Option<ApiNamed>,
  #[serde(default)]
  pub labels: Option<ApiNodes<ApiNamed>>,
  pub created_at: String,
  pub updated_at: String,
}

impl ApiIssue {
  pub fn into_summary(self) -> IssueSummary {
    IssueSummary {
      id: self.id,
      identifier: self.identifier,
      title: self.title,
      state_id: self.state.id,
      assignee: self.assignee.map(|a| a.name),
      updated_at: self.updated_at,
    }
  }

  pub fn into_full(self) -> Issue {
    Issue {
      id: self.id,
      identifier: self.identifier,
      title: self.title,
      description: self.description,
      team_id: self.team.map(|t| t.id),
      state_id: self.state.id,
      assignee: self.assignee.map(|a| a.name),
      labels: self
        .labels
        .map(|l| l.nodes.into_iter().map(|n| n.name).collect())
        .unwrap_or_default(),
      created_at: self.created_at,
      updated_at: self.updated_at,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub id: String,
  pub name: String,
  pub email: String,
  pub active: bool,
}

impl ApiUser {
  pub fn into_user(self) -> User {
    User {
      id: self.id,
      name: self.name,
      email: self.email,
      active: self.active,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiCustomer {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub domain: Option<String>,
}

impl ApiCustomer {
  pub fn into_customer(self) -> Customer {
    Customer {
      id: self.id,
      name: self.name,
      domain: self.domain,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiViewer {
  pub id: String,
  pub admin: bool,
  pub team_memberships: ApiNodes<ApiMembership>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMembership {
  pub team: ApiRef,
  #[serde(default)]
  pub owner: bool,
}

impl ApiViewer {
  pub fn into_permissions(self) -> PermissionHierarchy {
    PermissionHierarchy {
      user_id: self.id,
      admin: self.admin,
      grants: self
        .team_memberships
        .nodes
        .into_iter()
        .map(|m| PermissionGrant {
          team_id: m.team.id,
          role: if m.owner { "owner" } else { "member" }.to_string(),
        })
        .collect(),
    }
  }
}
