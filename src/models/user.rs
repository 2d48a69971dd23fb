use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An account that can own organizations and take part in tasks.
///
/// `token_version` only ever grows. Every issued session token records the
/// version current at issue time; bumping the counter invalidates all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub token_version: i64,
    pub created_at: DateTime<Utc>,
}

/// The public face of a [`User`], embedded wherever a user id is resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedUser {
    pub id: Uuid,
    pub email: String,
}

impl From<&User> for ResolvedUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
        }
    }
}

/// Input for creating a user. The password is hashed before it reaches the store.
#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub email: String,
    pub password_hash: String,
}
