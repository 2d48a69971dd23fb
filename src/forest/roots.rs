use uuid::Uuid;

use super::{ForestError, TaskStore};
use crate::models::Task;

/// Tasks of `organization_id` that have no parent, in store order.
///
/// An unknown organization simply has no roots. Records that do not match the
/// request (wrong organization, parent set) are dropped in case the store is
/// lax about its filter.
pub fn select_roots<S>(store: &S, organization_id: Uuid) -> Result<Vec<Task>, ForestError>
where
    S: TaskStore + ?Sized,
{
    let mut roots = store
        .find_roots_by_org(organization_id)
        .map_err(ForestError::TaskStore)?;
    roots.retain(|task| task.organization_id == organization_id && task.parent_id.is_none());
    Ok(roots)
}
