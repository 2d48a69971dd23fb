use std::collections::{BTreeSet, HashMap, HashSet};

use uuid::Uuid;

use super::closure::Closure;
use super::{Diagnostics, ForestDiagnostic, ForestError, UserStore};
use crate::models::{Organization, OrganizationView, ResolvedTask, ResolvedUser, Task, User};

/// A [`Closure`] after user resolution. `root` is `None` when the root's
/// creator could not be resolved; its descendants are still kept.
#[derive(Debug, Clone)]
pub struct ResolvedClosure {
    pub root: Option<ResolvedTask>,
    pub descendants: Vec<ResolvedTask>,
}

/// Resolve creator, watchers and assignees of every task in `closures`.
///
/// All user ids of the whole node set go to the store in a single
/// `find_users_by_ids` call.
pub fn resolve_references<S>(
    store: &S,
    closures: &[Closure],
    diagnostics: &mut Diagnostics,
) -> Result<Vec<ResolvedClosure>, ForestError>
where
    S: UserStore + ?Sized,
{
    let nodes = closures
        .iter()
        .flat_map(|c| std::iter::once(&c.root).chain(c.descendants.iter()));
    let users = fetch_users(store, collect_user_ids(nodes))?;

    Ok(closures
        .iter()
        .map(|closure| ResolvedClosure {
            root: resolve_task(&closure.root, &users, diagnostics),
            descendants: closure
                .descendants
                .iter()
                .filter_map(|task| resolve_task(task, &users, diagnostics))
                .collect(),
        })
        .collect())
}

/// Resolve a plain list of tasks with one batched user lookup.
/// Tasks with a missing creator are dropped.
pub fn resolve_tasks<S>(
    store: &S,
    tasks: &[Task],
    diagnostics: &mut Diagnostics,
) -> Result<Vec<ResolvedTask>, ForestError>
where
    S: UserStore + ?Sized,
{
    let users = fetch_users(store, collect_user_ids(tasks))?;
    Ok(tasks
        .iter()
        .filter_map(|task| resolve_task(task, &users, diagnostics))
        .collect())
}

/// Resolve creator, members and managers of organizations with one batched
/// lookup. Unknown users are left out silently; an organization is never
/// dropped.
pub fn resolve_organizations<S>(
    store: &S,
    orgs: &[Organization],
) -> Result<Vec<OrganizationView>, ForestError>
where
    S: UserStore + ?Sized,
{
    let ids: BTreeSet<Uuid> = orgs
        .iter()
        .flat_map(|org| {
            org.creator_id
                .iter()
                .chain(org.member_ids.iter())
                .chain(org.manager_ids.iter())
                .copied()
        })
        .collect();
    let users = fetch_users(store, ids.into_iter().collect())?;

    let lookup = |ids: &[Uuid]| -> Vec<ResolvedUser> {
        let mut seen = HashSet::new();
        ids.iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| users.get(id).map(ResolvedUser::from))
            .collect()
    };

    Ok(orgs
        .iter()
        .map(|org| OrganizationView {
            id: org.id,
            name: org.name.clone(),
            creator: org
                .creator_id
                .and_then(|id| users.get(&id))
                .map(ResolvedUser::from),
            members: lookup(&org.member_ids),
            managers: lookup(&org.manager_ids),
            created_at: org.created_at,
        })
        .collect())
}

/// Every distinct user id referenced by `tasks`, in ascending order.
pub fn collect_user_ids<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Vec<Uuid> {
    let ids: BTreeSet<Uuid> = tasks
        .into_iter()
        .flat_map(|task| {
            std::iter::once(task.creator_id)
                .chain(task.watcher_ids.iter().copied())
                .chain(task.assignee_ids.iter().copied())
        })
        .collect();
    ids.into_iter().collect()
}

fn fetch_users<S>(store: &S, ids: Vec<Uuid>) -> Result<HashMap<Uuid, User>, ForestError>
where
    S: UserStore + ?Sized,
{
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    store.find_users_by_ids(&ids).map_err(ForestError::UserStore)
}

/// Build the resolved view of one task, or `None` if its creator is unknown.
pub fn resolve_task(
    task: &Task,
    users: &HashMap<Uuid, User>,
    diagnostics: &mut Diagnostics,
) -> Option<ResolvedTask> {
    let Some(creator) = users.get(&task.creator_id) else {
        diagnostics.report(ForestDiagnostic::MissingCreator {
            task_id: task.id,
            creator_id: task.creator_id,
        });
        return None;
    };

    let watchers = resolve_user_list(
        &task.watcher_ids,
        users,
        |user_id| ForestDiagnostic::UnresolvedWatcher {
            task_id: task.id,
            user_id,
        },
        diagnostics,
    );
    let assignees = resolve_user_list(
        &task.assignee_ids,
        users,
        |user_id| ForestDiagnostic::UnresolvedAssignee {
            task_id: task.id,
            user_id,
        },
        diagnostics,
    );

    Some(ResolvedTask {
        id: task.id,
        parent_id: task.parent_id,
        organization_id: task.organization_id,
        creator: ResolvedUser::from(creator),
        watchers,
        assignees,
        name: task.properties.name.clone(),
        description: task.properties.description.clone(),
        is_private: task.properties.is_private,
    })
}

/// Keeps list order; a repeated id appears once, at its first position.
fn resolve_user_list(
    ids: &[Uuid],
    users: &HashMap<Uuid, User>,
    unresolved: impl Fn(Uuid) -> ForestDiagnostic,
    diagnostics: &mut Diagnostics,
) -> Vec<ResolvedUser> {
    let mut seen = HashSet::with_capacity(ids.len());
    let mut resolved = Vec::with_capacity(ids.len());

    for &id in ids {
        if !seen.insert(id) {
            continue;
        }
        match users.get(&id) {
            Some(user) => resolved.push(ResolvedUser::from(user)),
            None => diagnostics.report(unresolved(id)),
        }
    }

    resolved
}
