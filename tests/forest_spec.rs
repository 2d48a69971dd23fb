use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use chrono::Utc;
use speculate2::speculate;
use taskforest::forest::{resolve_task_forest, ForestDiagnostic, ForestError, TaskStore, UserStore};
use taskforest::models::*;
use uuid::Uuid;

/// Vector-backed stores that count calls and can be told to fail.
#[derive(Default)]
struct FakeStore {
    tasks: Vec<Task>,
    users: Vec<User>,
    user_lookups: Cell<usize>,
    looked_up: RefCell<Vec<Uuid>>,
    fail_children: bool,
    fail_users: bool,
}

impl FakeStore {
    fn user(&mut self, email: &str) -> Uuid {
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

    fn task(&mut self, org: Uuid, parent: Option<Uuid>, creator: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.push_task(id, org, parent, creator, name);
        id
    }

    fn push_task(&mut self, id: Uuid, org: Uuid, parent: Option<Uuid>, creator: Uuid, name: &str) {
        self.tasks.push(Task {
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
        });
    }

    fn task_mut(&mut self, id: Uuid) -> &mut Task {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .expect("unknown task")
    }
}

impl TaskStore for FakeStore {
    fn find_roots_by_org(&self, organization_id: Uuid) -> anyhow::Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.organization_id == organization_id && t.parent_id.is_none())
            .cloned()
            .collect())
    }

    fn find_children_by_parent(&self, parent_id: Uuid) -> anyhow::Result<Vec<Task>> {
        if self.fail_children {
            anyhow::bail!("connection reset");
        }
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }
}

impl UserStore for FakeStore {
    fn find_users_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, User>> {
        self.user_lookups.set(self.user_lookups.get() + 1);
        self.looked_up.borrow_mut().extend_from_slice(ids);
        if self.fail_users {
            anyhow::bail!("user store timeout");
        }
        Ok(self
            .users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .map(|u| (u.id, u.clone()))
            .collect())
    }
}

fn names(tasks: &[ResolvedTask]) -> Vec<&str> {
    tasks.iter().map(|t| t.name.as_str()).collect()
}

speculate! {
    before {
        let mut store = FakeStore::default();
        let org = Uuid::new_v4();
        let alice = store.user("alice@example.com");
    }

    describe "resolve_task_forest" {
        it "returns an empty forest for an organization without tasks" {
            let report = resolve_task_forest(&store, &store, org, false).unwrap();

            assert!(report.tasks.is_empty());
            assert!(report.diagnostics.is_empty());
            assert_eq!(store.user_lookups.get(), 0);
        }

        it "flattens a chain into root-first breadth order" {
            let a = store.task(org, None, alice, "A");
            let b = store.task(org, Some(a), alice, "B");
            store.task(org, Some(b), alice, "C");

            let report = resolve_task_forest(&store, &store, org, false).unwrap();

            assert_eq!(names(&report.tasks), vec!["A", "B", "C"]);
            assert!(!report.is_degraded());
        }

        it "lists siblings before grandchildren" {
            let root = store.task(org, None, alice, "Root");
            let left = store.task(org, Some(root), alice, "Left");
            store.task(org, Some(root), alice, "Right");
            store.task(org, Some(left), alice, "Leaf");

            let report = resolve_task_forest(&store, &store, org, false).unwrap();

            assert_eq!(names(&report.tasks), vec!["Root", "Left", "Right", "Leaf"]);
        }

        it "keeps parent links on every resolved task" {
            let root = store.task(org, None, alice, "Root");
            let child = store.task(org, Some(root), alice, "Child");

            let report = resolve_task_forest(&store, &store, org, false).unwrap();
            let child = report.tasks.iter().find(|t| t.id == child).unwrap();

            assert_eq!(child.parent_id, Some(root));
            assert_eq!(child.organization_id, org);
        }

        it "makes one user lookup per resolution across many organizations" {
            let mut users = vec![alice];
            for i in 0..9 {
                users.push(store.user(&format!("user{i}@example.com")));
            }
            let orgs: Vec<Uuid> = std::iter::once(org)
                .chain((0..4).map(|_| Uuid::new_v4()))
                .collect();

            // Ten tasks per organization: two roots, each with a chain of four.
            for (o, &org_id) in orgs.iter().enumerate() {
                for r in 0..2 {
                    let mut parent = None;
                    for d in 0..5 {
                        let n = o * 10 + r * 5 + d;
                        let id = store.task(org_id, parent, users[n % 10], &format!("task-{n}"));
                        let task = store.task_mut(id);
                        task.watcher_ids = vec![users[n % 10], users[(n + 1) % 10], users[(n + 3) % 10]];
                        task.assignee_ids = vec![users[(n + 1) % 10], users[(n + 7) % 10]];
                        parent = Some(id);
                    }
                }
            }
            assert_eq!(store.tasks.len(), 50);

            for (calls, &org_id) in orgs.iter().enumerate() {
                let report = resolve_task_forest(&store, &store, org_id, false).unwrap();

                assert_eq!(report.tasks.len(), 10);
                assert!(report.diagnostics.is_empty());
                assert!(report.tasks.iter().all(|t| t.organization_id == org_id));
                assert!(report.tasks.iter().all(|t| t.watchers.len() == 3 && t.assignees.len() == 2));
                assert_eq!(store.user_lookups.get(), calls + 1);
            }
        }

        it "asks for each distinct user id once" {
            let bob = store.user("bob@example.com");
            let root = store.task(org, None, alice, "Root");
            let child = store.task(org, Some(root), bob, "Child");
            store.task_mut(root).watcher_ids = vec![bob, alice];
            store.task_mut(child).assignee_ids = vec![alice, bob];

            resolve_task_forest(&store, &store, org, false).unwrap();

            let mut asked = store.looked_up.borrow().clone();
            asked.sort();
            let mut expected = vec![alice, bob];
            expected.sort();
            assert_eq!(asked, expected);
        }

        it "never returns tasks of another organization" {
            let other = Uuid::new_v4();
            store.task(org, None, alice, "Mine");
            let theirs = store.task(other, None, alice, "Theirs");
            store.task(other, Some(theirs), alice, "Their child");

            let report = resolve_task_forest(&store, &store, org, false).unwrap();

            assert_eq!(names(&report.tasks), vec!["Mine"]);
            assert!(report.tasks.iter().all(|t| t.organization_id == org));
        }

        it "resolves creator, watchers and assignees to users" {
            let bob = store.user("bob@example.com");
            let root = store.task(org, None, alice, "Root");
            store.task_mut(root).watcher_ids = vec![bob];
            store.task_mut(root).assignee_ids = vec![alice, bob];

            let report = resolve_task_forest(&store, &store, org, false).unwrap();
            let task = &report.tasks[0];

            assert_eq!(task.creator.email, "alice@example.com");
            assert_eq!(task.watchers.iter().map(|u| u.id).collect::<Vec<_>>(), vec![bob]);
            assert_eq!(task.assignees.iter().map(|u| u.id).collect::<Vec<_>>(), vec![alice, bob]);
        }

        it "drops dangling watcher and assignee ids with a diagnostic" {
            let ghost = Uuid::new_v4();
            let root = store.task(org, None, alice, "Root");
            store.task_mut(root).watcher_ids = vec![ghost, alice];
            store.task_mut(root).assignee_ids = vec![ghost];

            let report = resolve_task_forest(&store, &store, org, false).unwrap();
            let task = &report.tasks[0];

            assert_eq!(task.watchers.iter().map(|u| u.id).collect::<Vec<_>>(), vec![alice]);
            assert!(task.assignees.is_empty());
            assert!(report.diagnostics.contains(&ForestDiagnostic::UnresolvedWatcher { task_id: root, user_id: ghost }));
            assert!(report.diagnostics.contains(&ForestDiagnostic::UnresolvedAssignee { task_id: root, user_id: ghost }));
        }

        it "omits a task whose creator is missing but keeps its children" {
            let ghost = Uuid::new_v4();
            let root = store.task(org, None, alice, "Root");
            let orphaned = store.task(org, Some(root), ghost, "No creator");
            store.task(org, Some(orphaned), alice, "Grandchild");

            let report = resolve_task_forest(&store, &store, org, false).unwrap();

            assert_eq!(names(&report.tasks), vec!["Root", "Grandchild"]);
            assert_eq!(
                report.diagnostics,
                vec![ForestDiagnostic::MissingCreator { task_id: orphaned, creator_id: ghost }]
            );
            assert!(report.diagnostics[0].omits_task());
        }

        it "terminates on a malformed cycle and reports it" {
            let a = store.task(org, None, alice, "A");
            let b = store.task(org, Some(a), alice, "B");
            // A second record claims `a` is a child of `b`.
            store.push_task(a, org, Some(b), alice, "A again");

            let report = resolve_task_forest(&store, &store, org, false).unwrap();

            assert_eq!(names(&report.tasks), vec!["A", "B"]);
            assert!(report.diagnostics.contains(&ForestDiagnostic::CycleAnomaly { parent_id: b, task_id: a }));
        }

        it "returns each task once even when reachable twice" {
            let a = store.task(org, None, alice, "A");
            let b = store.task(org, None, alice, "B");
            let shared = store.task(org, Some(a), alice, "Shared");
            store.push_task(shared, org, Some(b), alice, "Shared again");

            let report = resolve_task_forest(&store, &store, org, false).unwrap();

            let shared_count = report.tasks.iter().filter(|t| t.id == shared).count();
            assert_eq!(shared_count, 1);
            assert_eq!(report.tasks.len(), 3);
        }

        it "ignores include_private" {
            let root = store.task(org, None, alice, "Secret");
            store.task_mut(root).properties.is_private = true;

            let with = resolve_task_forest(&store, &store, org, true).unwrap();
            let without = resolve_task_forest(&store, &store, org, false).unwrap();

            assert_eq!(with.tasks, without.tasks);
            assert!(with.tasks[0].is_private);
        }

        it "fails as a whole when the task store fails mid-expansion" {
            store.task(org, None, alice, "Root");
            store.fail_children = true;

            let err = resolve_task_forest(&store, &store, org, false).unwrap_err();
            assert!(matches!(err, ForestError::TaskStore(_)));
            assert_eq!(store.user_lookups.get(), 0);
        }

        it "fails as a whole when the user store fails" {
            store.task(org, None, alice, "Root");
            store.fail_users = true;

            let err = resolve_task_forest(&store, &store, org, false).unwrap_err();
            assert!(matches!(err, ForestError::UserStore(_)));
            assert!(err.to_string().contains("user store timeout"));
        }
    }
}
