//! Organization-wide task forest resolution.
//!
//! [`resolve_task_forest`] materializes every task of one organization as a
//! flat, duplicate-free list with user references resolved. It runs as a
//! single pass over four stages:
//!
//! 1. [`roots::select_roots`]: tasks of the organization without a parent.
//! 2. [`closure::build_closures`]: breadth-first descendant expansion per root,
//!    sharing one visited set across all roots.
//! 3. [`resolver::resolve_references`]: one batched user lookup for every
//!    creator, watcher and assignee in the node set.
//! 4. [`flatten::flatten`]: roots and descendants merged into one list, keyed
//!    by task id.
//!
//! Localized data problems (cycles, missing creators, dangling user ids) never
//! abort the operation. They are logged, recorded as [`ForestDiagnostic`]s and
//! returned next to the partial result. Only store failures are errors.

pub mod closure;
pub mod flatten;
pub mod resolver;
pub mod roots;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ResolvedTask, Task, User};

pub use closure::{build_closures, Closure};
pub use flatten::flatten;
pub use resolver::{resolve_organizations, resolve_references, resolve_tasks, ResolvedClosure};
pub use roots::select_roots;

/// Read access to task records.
pub trait TaskStore {
    /// Tasks of `organization_id` whose parent is absent.
    fn find_roots_by_org(&self, organization_id: Uuid) -> anyhow::Result<Vec<Task>>;

    /// Tasks whose `parent_id` equals `parent_id`.
    fn find_children_by_parent(&self, parent_id: Uuid) -> anyhow::Result<Vec<Task>>;
}

/// Read access to user records.
pub trait UserStore {
    /// Look up many users at once. Unknown ids are absent from the map.
    fn find_users_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, User>>;
}

/// A store failure during resolution. Nothing is retried internally; callers
/// may retry the whole operation.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    #[error("task store unavailable: {0:#}")]
    TaskStore(anyhow::Error),
    #[error("user store unavailable: {0:#}")]
    UserStore(anyhow::Error),
}

/// A data anomaly found while resolving a forest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForestDiagnostic {
    /// The edge `parent_id -> task_id` leads to a task that was already
    /// visited. The edge is not followed.
    CycleAnomaly { parent_id: Uuid, task_id: Uuid },
    /// The store returned the same root twice. Only the first is expanded.
    DuplicateRoot { task_id: Uuid },
    /// A child of `parent_id` belongs to another organization. The edge is
    /// not followed.
    ForeignChild {
        parent_id: Uuid,
        task_id: Uuid,
        organization_id: Uuid,
    },
    /// The task's creator does not exist. The task is left out of the result.
    MissingCreator { task_id: Uuid, creator_id: Uuid },
    /// A watcher id does not exist and was dropped from the task.
    UnresolvedWatcher { task_id: Uuid, user_id: Uuid },
    /// An assignee id does not exist and was dropped from the task.
    UnresolvedAssignee { task_id: Uuid, user_id: Uuid },
}

impl ForestDiagnostic {
    /// Whether the anomaly removed a task from the result.
    pub fn omits_task(&self) -> bool {
        matches!(self, Self::MissingCreator { .. })
    }

    fn log(&self) {
        match self {
            Self::CycleAnomaly { parent_id, task_id } => {
                tracing::warn!(%parent_id, %task_id, "Task revisited during expansion, edge truncated")
            }
            Self::DuplicateRoot { task_id } => {
                tracing::warn!(%task_id, "Duplicate root task skipped")
            }
            Self::ForeignChild {
                parent_id,
                task_id,
                organization_id,
            } => tracing::warn!(
                %parent_id,
                %task_id,
                %organization_id,
                "Child task belongs to another organization, edge truncated"
            ),
            Self::MissingCreator {
                task_id,
                creator_id,
            } => tracing::warn!(%task_id, %creator_id, "Task creator not found, task omitted"),
            Self::UnresolvedWatcher { task_id, user_id } => {
                tracing::warn!(%task_id, %user_id, "Watcher not found, dropped")
            }
            Self::UnresolvedAssignee { task_id, user_id } => {
                tracing::warn!(%task_id, %user_id, "Assignee not found, dropped")
            }
        }
    }
}

/// Collects diagnostics for one resolution and logs each as it arrives.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<ForestDiagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: ForestDiagnostic) {
        diagnostic.log();
        self.entries.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn into_vec(self) -> Vec<ForestDiagnostic> {
        self.entries
    }
}

/// The flat task list of an organization plus any anomalies met on the way.
///
/// A non-empty `diagnostics` list marks a degraded result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForestReport {
    pub tasks: Vec<ResolvedTask>,
    pub diagnostics: Vec<ForestDiagnostic>,
}

impl ForestReport {
    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Materialize the full task forest of `organization_id`.
///
/// Every task reachable from a root of the organization appears exactly once,
/// with descendants listed as siblings of their roots. An organization without
/// tasks (or an unknown one) yields an empty report.
///
/// `include_private` is accepted but currently has no effect: private tasks
/// are returned either way. No visibility rule for private tasks has been
/// decided yet.
pub fn resolve_task_forest<T, U>(
    task_store: &T,
    user_store: &U,
    organization_id: Uuid,
    include_private: bool,
) -> Result<ForestReport, ForestError>
where
    T: TaskStore + ?Sized,
    U: UserStore + ?Sized,
{
    let mut diagnostics = Diagnostics::new();

    let roots = select_roots(task_store, organization_id)?;
    if roots.is_empty() {
        tracing::debug!(%organization_id, "No root tasks, empty forest");
        return Ok(ForestReport::default());
    }

    let closures = build_closures(task_store, organization_id, roots, &mut diagnostics)?;
    let resolved = resolve_references(user_store, &closures, &mut diagnostics)?;
    let tasks = flatten(resolved);

    tracing::debug!(
        %organization_id,
        include_private,
        tasks = tasks.len(),
        diagnostics = diagnostics.len(),
        "Resolved task forest"
    );

    Ok(ForestReport {
        tasks,
        diagnostics: diagnostics.into_vec(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;

    use chrono::Utc;

    use super::*;
    use crate::models::TaskProperties;

    /// A task/user store over plain vectors. Records may repeat ids, which is
    /// how tests build malformed hierarchies.
    #[derive(Default)]
    pub struct MemoryStore {
        pub tasks: Vec<Task>,
        pub users: Vec<User>,
        pub user_lookups: Cell<usize>,
    }

    impl MemoryStore {
        pub fn add_user(&mut self, email: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.users.push(User {
                id,
                email: email.to_string(),
                password_hash: String::new(),
                token_version: 0,
                created_at: Utc::now(),
            });
            id
        }

        pub fn add_task(&mut self, org: Uuid, parent: Option<Uuid>, creator: Uuid, name: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.tasks.push(task(id, org, parent, creator, name));
            id
        }
    }

    pub fn task(id: Uuid, org: Uuid, parent: Option<Uuid>, creator: Uuid, name: &str) -> Task {
        Task {
            id,
            organization_id: org,
            parent_id: parent,
            creator_id: creator,
            watcher_ids: Vec::new(),
            assignee_ids: Vec::new(),
            properties: TaskProperties {
                name: name.to_string(),
                description: None,
                is_private: false,
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    impl TaskStore for MemoryStore {
        fn find_roots_by_org(&self, organization_id: Uuid) -> anyhow::Result<Vec<Task>> {
            Ok(self
                .tasks
                .iter()
                .filter(|t| t.organization_id == organization_id && t.parent_id.is_none())
                .cloned()
                .collect())
        }

        fn find_children_by_parent(&self, parent_id: Uuid) -> anyhow::Result<Vec<Task>> {
            Ok(self
                .tasks
                .iter()
                .filter(|t| t.parent_id == Some(parent_id))
                .cloned()
                .collect())
        }
    }

    impl UserStore for MemoryStore {
        fn find_users_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, User>> {
            self.user_lookups.set(self.user_lookups.get() + 1);
            Ok(self
                .users
                .iter()
                .filter(|u| ids.contains(&u.id))
                .map(|u| (u.id, u.clone()))
                .collect())
        }
    }
}
