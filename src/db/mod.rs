mod schema;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

use crate::forest::{TaskStore, UserStore};
use crate::models::*;

const TASK_COLUMNS: &str = "id, organization_id, parent_id, creator_id, watcher_ids, assignee_ids,
     name, description, is_private, created_at, updated_at";

const USER_COLUMNS: &str = "id, email, password_hash, token_version, created_at";

const ORGANIZATION_COLUMNS: &str = "id, name, creator_id, member_ids, manager_ids, created_at";

/// Keeps each `IN (...)` list well under SQLite's bound-parameter limit.
const ID_BATCH_SIZE: usize = 500;

/// Another user already holds the email passed to [`Database::create_user`].
#[derive(Debug, thiserror::Error)]
#[error("Email already registered")]
pub struct DuplicateEmail;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Which user-id list of a task a membership mutation targets.
#[derive(Debug, Clone, Copy)]
enum TaskUserList {
    Watchers,
    Assignees,
}

impl TaskUserList {
    fn column(&self) -> &'static str {
        match self {
            Self::Watchers => "watcher_ids",
            Self::Assignees => "assignee_ids",
        }
    }
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // User operations
    // ============================================================

    /// Insert a user. Fails with [`DuplicateEmail`] if the email is taken.
    pub fn create_user(&self, input: CreateUserInput) -> Result<User> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        let inserted = conn.execute(
            "INSERT INTO users (id, email, password_hash, token_version, created_at)
             VALUES (?, ?, ?, 0, ?)",
            (
                id.to_string(),
                &input.email,
                &input.password_hash,
                now.to_rfc3339(),
            ),
        );
        match inserted {
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(DuplicateEmail.into());
            }
            other => other?,
        };

        Ok(User {
            id,
            email: input.email,
            password_hash: input.password_hash,
            token_version: 0,
            created_at: now,
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
                [id.to_string()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"),
                [email],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_all_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY email"))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Fetch every user whose id is in `ids`. Unknown ids are simply absent.
    pub fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, User>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut users = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(ID_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id IN ({placeholders})"
            ))?;
            let rows = stmt.query_map(
                params_from_iter(chunk.iter().map(|id| id.to_string())),
                user_from_row,
            )?;
            for user in rows {
                let user = user?;
                users.insert(user.id, user);
            }
        }

        Ok(users)
    }

    /// Increment the user's session-invalidation counter.
    /// Returns the new value, or `None` if the user does not exist.
    pub fn bump_token_version(&self, user_id: Uuid) -> Result<Option<i64>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let version = conn
            .query_row(
                "UPDATE users SET token_version = token_version + 1 WHERE id = ?
                 RETURNING token_version",
                [user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    // ============================================================
    // Organization operations
    // ============================================================

    pub fn create_organization(
        &self,
        creator_id: Uuid,
        input: CreateOrganizationInput,
    ) -> Result<Organization> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();
        let manager_ids = vec![creator_id];

        conn.execute(
            "INSERT INTO organizations (id, name, creator_id, member_ids, manager_ids, created_at)
             VALUES (?, ?, ?, '[]', ?, ?)",
            (
                id.to_string(),
                &input.name,
                creator_id.to_string(),
                serde_json::to_string(&manager_ids)?,
                now.to_rfc3339(),
            ),
        )?;

        Ok(Organization {
            id,
            name: input.name,
            creator_id: Some(creator_id),
            member_ids: Vec::new(),
            manager_ids,
            created_at: now,
        })
    }

    pub fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let org = conn
            .query_row(
                &format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = ?"),
                [id.to_string()],
                organization_from_row,
            )
            .optional()?;
        Ok(org)
    }

    pub fn get_all_organizations(&self) -> Result<Vec<Organization>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations ORDER BY name"
        ))?;
        let orgs = stmt
            .query_map([], organization_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orgs)
    }

    // ============================================================
    // Task operations
    // ============================================================

    /// Create a task in `organization_id` on behalf of `creator_id`.
    ///
    /// Fails if the organization does not exist, or if `parent_id` names a task
    /// that is missing or lives in a different organization.
    pub fn create_task(
        &self,
        organization_id: Uuid,
        creator_id: Uuid,
        input: CreateTaskInput,
    ) -> Result<Task> {
        self.get_organization(organization_id)?
            .ok_or_else(|| anyhow::anyhow!("Organization not found"))?;

        if let Some(parent_id) = input.parent_id {
            let parent = self
                .get_task(parent_id)?
                .ok_or_else(|| anyhow::anyhow!("Parent task not found"))?;
            if parent.organization_id != organization_id {
                anyhow::bail!("Parent task belongs to a different organization");
            }
        }

        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();
        let properties = TaskProperties {
            name: input.name,
            description: input.description,
            is_private: input.is_private.unwrap_or(false),
        };

        conn.execute(
            "INSERT INTO tasks (id, organization_id, parent_id, creator_id, watcher_ids, assignee_ids,
                                name, description, is_private, created_at, updated_at)
             VALUES (?, ?, ?, ?, '[]', '[]', ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                organization_id.to_string(),
                input.parent_id.map(|u| u.to_string()),
                creator_id.to_string(),
                &properties.name,
                &properties.description,
                properties.is_private,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(Task {
            id,
            organization_id,
            parent_id: input.parent_id,
            creator_id,
            watcher_ids: Vec::new(),
            assignee_ids: Vec::new(),
            properties,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"),
                [id.to_string()],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn get_all_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at, rowid"
        ))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn get_tasks_by_organization(&self, organization_id: Uuid) -> Result<Vec<Task>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE organization_id = ? ORDER BY created_at, rowid"
        ))?;
        let tasks = stmt
            .query_map([organization_id.to_string()], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn get_root_tasks(&self, organization_id: Uuid) -> Result<Vec<Task>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE organization_id = ? AND parent_id IS NULL ORDER BY created_at, rowid"
        ))?;
        let tasks = stmt
            .query_map([organization_id.to_string()], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn get_children(&self, parent_id: Uuid) -> Result<Vec<Task>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE parent_id = ? ORDER BY created_at, rowid"
        ))?;
        let tasks = stmt
            .query_map([parent_id.to_string()], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Merge `input` into the task's properties. Returns `None` for an unknown task.
    pub fn update_task_properties(
        &self,
        id: Uuid,
        input: UpdateTaskPropertiesInput,
    ) -> Result<Option<Task>> {
        let Some(existing) = self.get_task(id)? else {
            return Ok(None);
        };

        let conn = self.conn.lock().expect("database lock poisoned");
        let now = Utc::now();
        let properties = TaskProperties {
            name: input.name.unwrap_or(existing.properties.name),
            description: input.description.unwrap_or(existing.properties.description),
            is_private: input.is_private.unwrap_or(existing.properties.is_private),
        };

        conn.execute(
            "UPDATE tasks SET name = ?, description = ?, is_private = ?, updated_at = ? WHERE id = ?",
            (
                &properties.name,
                &properties.description,
                properties.is_private,
                now.to_rfc3339(),
                id.to_string(),
            ),
        )?;

        Ok(Some(Task {
            properties,
            updated_at: now,
            ..existing
        }))
    }

    /// Append `user_id` to the task's watchers. Duplicates are kept.
    pub fn add_task_watcher(&self, task_id: Uuid, user_id: Uuid) -> Result<TaskUpdateResponse> {
        self.modify_user_list(task_id, TaskUserList::Watchers, |ids| {
            ids.push(user_id);
            true
        })
    }

    /// Remove every occurrence of `user_id` from the task's watchers.
    pub fn remove_task_watcher(&self, task_id: Uuid, user_id: Uuid) -> Result<TaskUpdateResponse> {
        self.modify_user_list(task_id, TaskUserList::Watchers, |ids| {
            remove_all(ids, user_id)
        })
    }

    /// Append `user_id` to the task's assignees. Duplicates are kept.
    pub fn add_task_assignee(&self, task_id: Uuid, user_id: Uuid) -> Result<TaskUpdateResponse> {
        self.modify_user_list(task_id, TaskUserList::Assignees, |ids| {
            ids.push(user_id);
            true
        })
    }

    /// Remove every occurrence of `user_id` from the task's assignees.
    pub fn remove_task_assignee(
        &self,
        task_id: Uuid,
        user_id: Uuid,
    ) -> Result<TaskUpdateResponse> {
        self.modify_user_list(task_id, TaskUserList::Assignees, |ids| {
            remove_all(ids, user_id)
        })
    }

    fn modify_user_list(
        &self,
        task_id: Uuid,
        list: TaskUserList,
        modify: impl FnOnce(&mut Vec<Uuid>) -> bool,
    ) -> Result<TaskUpdateResponse> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let column = list.column();

        let current: Option<String> = conn
            .query_row(
                &format!("SELECT {column} FROM tasks WHERE id = ?"),
                [task_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Ok(TaskUpdateResponse {
                num_matched: 0,
                num_modified: 0,
            });
        };

        let mut ids = parse_uuid_list(&current);
        if !modify(&mut ids) {
            return Ok(TaskUpdateResponse {
                num_matched: 1,
                num_modified: 0,
            });
        }

        conn.execute(
            &format!("UPDATE tasks SET {column} = ?, updated_at = ? WHERE id = ?"),
            (
                serde_json::to_string(&ids)?,
                Utc::now().to_rfc3339(),
                task_id.to_string(),
            ),
        )?;

        Ok(TaskUpdateResponse {
            num_matched: 1,
            num_modified: 1,
        })
    }

    // ============================================================
    // Auth token operations
    // ============================================================

    pub fn insert_auth_token(&self, token: &AuthToken) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO auth_tokens (token_hash, user_id, kind, token_version, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                &token.token_hash,
                token.user_id.to_string(),
                token.kind.as_str(),
                token.token_version,
                token.expires_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    pub fn get_auth_token(&self, token_hash: &str) -> Result<Option<AuthToken>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let token = conn
            .query_row(
                "SELECT token_hash, user_id, kind, token_version, expires_at
                 FROM auth_tokens WHERE token_hash = ?",
                [token_hash],
                |row| {
                    Ok(AuthToken {
                        token_hash: row.get(0)?,
                        user_id: parse_uuid(row.get::<_, String>(1)?),
                        kind: TokenKind::from_str(&row.get::<_, String>(2)?)
                            .unwrap_or(TokenKind::Access),
                        token_version: row.get(3)?,
                        expires_at: parse_datetime(row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    pub fn delete_auth_token(&self, token_hash: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute("DELETE FROM auth_tokens WHERE token_hash = ?", [token_hash])?;
        Ok(rows > 0)
    }

    /// Drop every stored token of a user. Returns the number removed.
    pub fn delete_user_tokens(&self, user_id: Uuid) -> Result<usize> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "DELETE FROM auth_tokens WHERE user_id = ?",
            [user_id.to_string()],
        )?;
        Ok(rows)
    }

    pub fn delete_expired_tokens(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "DELETE FROM auth_tokens WHERE expires_at < ?",
            [Utc::now().to_rfc3339()],
        )?;
        Ok(rows)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl TaskStore for Database {
    fn find_roots_by_org(&self, organization_id: Uuid) -> Result<Vec<Task>> {
        self.get_root_tasks(organization_id)
    }

    fn find_children_by_parent(&self, parent_id: Uuid) -> Result<Vec<Task>> {
        self.get_children(parent_id)
    }
}

impl UserStore for Database {
    fn find_users_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, User>> {
        self.get_users_by_ids(ids)
    }
}

/// The platform data directory location used when no path is configured.
pub fn default_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "taskforest")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("taskforest.db"))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: parse_uuid(row.get::<_, String>(0)?),
        organization_id: parse_uuid(row.get::<_, String>(1)?),
        parent_id: row.get::<_, Option<String>>(2)?.map(parse_uuid),
        creator_id: parse_uuid(row.get::<_, String>(3)?),
        watcher_ids: parse_uuid_list(&row.get::<_, String>(4)?),
        assignee_ids: parse_uuid_list(&row.get::<_, String>(5)?),
        properties: TaskProperties {
            name: row.get(6)?,
            description: row.get(7)?,
            is_private: row.get(8)?,
        },
        created_at: parse_datetime(row.get::<_, String>(9)?),
        updated_at: parse_datetime(row.get::<_, String>(10)?),
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(row.get::<_, String>(0)?),
        email: row.get(1)?,
        password_hash: row.get(2)?,
        token_version: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn organization_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: parse_uuid(row.get::<_, String>(0)?),
        name: row.get(1)?,
        creator_id: row.get::<_, Option<String>>(2)?.map(parse_uuid),
        member_ids: parse_uuid_list(&row.get::<_, String>(3)?),
        manager_ids: parse_uuid_list(&row.get::<_, String>(4)?),
        created_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

fn remove_all(ids: &mut Vec<Uuid>, user_id: Uuid) -> bool {
    let before = ids.len();
    ids.retain(|id| *id != user_id);
    ids.len() != before
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_uuid_list(json: &str) -> Vec<Uuid> {
    serde_json::from_str(json).unwrap_or_default()
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
