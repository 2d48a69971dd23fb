use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::ResolvedUser;

/// A group of users sharing one forest of tasks.
///
/// The creator is recorded once at creation and is also added as the first
/// manager. Member and manager lists hold user ids only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub creator_id: Option<Uuid>,
    pub member_ids: Vec<Uuid>,
    pub manager_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganizationInput {
    pub name: String,
}

/// An organization with its user references resolved, used for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationView {
    pub id: Uuid,
    pub name: String,
    pub creator: Option<ResolvedUser>,
    pub members: Vec<ResolvedUser>,
    pub managers: Vec<ResolvedUser>,
    pub created_at: DateTime<Utc>,
}
