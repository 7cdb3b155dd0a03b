//! Domain types for the Linear portal.
//!
//! All types are serde round-trippable because they flow through the
//! response cache and its persistence mirror.

use serde::{Deserialize, Serialize};

/// A team the viewer can review work for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
  pub id: String,
  pub key: String,
  pub name: String,
}

/// Full team details, including description and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDetails {
  pub id: String,
  pub key: String,
  pub name: String,
  pub description: Option<String>,
  pub private: bool,
}

/// A member of a team roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
  pub id: String,
  pub name: String,
  pub email: String,
  pub admin: bool,
}

/// One state in a team's review workflow (e.g. "Submitted", "Approved").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub state_type: String,
  pub position: f64,
}

/// Summary of a work item for list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSummary {
  pub id: String,
  pub identifier: String,
  pub title: String,
  pub state_id: String,
  pub assignee: Option<String>,
  pub updated_at: String,
}

/// Full work item details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
  pub id: String,
  pub identifier: String,
  pub title: String,
  pub description: Option<String>,
  pub team_id: Option<String>,
  pub state_id: String,
  pub assignee: Option<String>,
  pub labels: Vec<String>,
  pub created_at: String,
  pub updated_at: String,
}

/// A portal user (admin screens).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub name: String,
  pub email: String,
  pub active: bool,
}

/// A customer organization (admin screens).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
  pub id: String,
  pub name: String,
  pub domain: Option<String>,
}

/// The viewer's resolved permission hierarchy: which teams they may
/// review for, and with what role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionHierarchy {
  pub user_id: String,
  pub admin: bool,
  pub grants: Vec<PermissionGrant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
  pub team_id: String,
  pub role: String,
}
