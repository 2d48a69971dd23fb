use std::collections::{HashSet, VecDeque};

use uuid::Uuid;

use super::{Diagnostics, ForestDiagnostic, ForestError, TaskStore};
use crate::models::Task;

/// A root task and every task reachable below it, in breadth-first order.
#[derive(Debug, Clone)]
pub struct Closure {
    pub root: Task,
    pub descendants: Vec<Task>,
}

/// Expand each root into its full set of descendants.
///
/// One visited set spans all roots, so each task id is emitted at most once
/// for the whole organization. An edge into an already visited task is not
/// followed, which bounds the walk even when the stored parent links loop.
/// Children that belong to another organization are not followed either.
pub fn build_closures<S>(
    store: &S,
    organization_id: Uuid,
    roots: Vec<Task>,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<Closure>, ForestError>
where
    S: TaskStore + ?Sized,
{
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut closures = Vec::with_capacity(roots.len());

    for root in roots {
        if !visited.insert(root.id) {
            diagnostics.report(ForestDiagnostic::DuplicateRoot { task_id: root.id });
            continue;
        }

        let mut descendants = Vec::new();
        let mut queue = VecDeque::from([root.id]);

        while let Some(current) = queue.pop_front() {
            let children = store
                .find_children_by_parent(current)
                .map_err(ForestError::TaskStore)?;

            for child in children {
                if child.organization_id != organization_id {
                    diagnostics.report(ForestDiagnostic::ForeignChild {
                        parent_id: current,
                        task_id: child.id,
                        organization_id: child.organization_id,
                    });
                    continue;
                }
                if !visited.insert(child.id) {
                    diagnostics.report(ForestDiagnostic::CycleAnomaly {
                        parent_id: current,
                        task_id: child.id,
                    });
                    continue;
                }
                queue.push_back(child.id);
                descendants.push(child);
            }
        }

        closures.push(Closure { root, descendants });
    }

    Ok(closures)
}
