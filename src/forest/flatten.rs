use std::collections::HashSet;

use uuid::Uuid;

use super::resolver::ResolvedClosure;
use crate::models::ResolvedTask;

/// Merge resolved closures into one flat list.
///
/// Each root is followed by its descendants; a root without descendants
/// contributes only itself. The first copy of a task id wins.
pub fn flatten(closures: Vec<ResolvedClosure>) -> Vec<ResolvedTask> {
    let capacity = closures
        .iter()
        .map(|c| c.descendants.len() + usize::from(c.root.is_some()))
        .sum();
    let mut seen: HashSet<Uuid> = HashSet::with_capacity(capacity);
    let mut tasks = Vec::with_capacity(capacity);

    for closure in closures {
        for task in closure.root.into_iter().chain(closure.descendants) {
            if seen.insert(task.id) {
                tasks.push(task);
            }
        }
    }

    tasks
}
