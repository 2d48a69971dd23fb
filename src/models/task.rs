use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::user::ResolvedUser;

/// A unit of work inside an organization.
///
/// Tasks form a forest per organization via `parent_id`: a task without a
/// parent is a root, and a parent must belong to the same organization.
/// The store checks the parent on creation, but readers must not assume the
/// stored relation is acyclic.
///
/// Watcher and assignee lists keep insertion order and may contain the same
/// user more than once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub creator_id: Uuid,
    pub watcher_ids: Vec<Uuid>,
    pub assignee_ids: Vec<Uuid>,
    pub properties: TaskProperties,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-editable fields of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProperties {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

/// Input for creating a task in an organization. The caller becomes the creator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskInput {
    pub name: String,
    /// Parent task for nesting. `None` creates a root task.
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to `false`.
    #[serde(default)]
    pub is_private: Option<bool>,
}

/// Partial update of [`TaskProperties`]. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskPropertiesInput {
    pub name: Option<String>,
    /// Absent keeps the description, `null` clears it.
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    pub is_private: Option<bool>,
}

/// Outcome of a watcher or assignee list mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskUpdateResponse {
    /// Number of tasks matching the id (0 or 1).
    pub num_matched: usize,
    /// Number of tasks whose list actually changed.
    pub num_modified: usize,
}

/// A task with creator, watchers and assignees replaced by user records.
///
/// This is a derived, transient view; it is never written back to the store.
/// Descendants are siblings of their roots in a flat result, linked only by
/// `parent_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedTask {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub organization_id: Uuid,
    pub creator: ResolvedUser,
    pub watchers: Vec<ResolvedUser>,
    pub assignees: Vec<ResolvedUser>,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
}

/// Tells a field set to `null` apart from an absent one.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
