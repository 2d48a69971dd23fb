use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ResolvedUser;

/// The two kinds of session token.
///
/// - `Access`: Short-lived, presented on every request as a bearer token
/// - `Refresh`: Longer-lived, exchanged once for a fresh token pair
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "access" => Some(Self::Access),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }
}

/// A stored session token. Only the digest of the token is persisted.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub kind: TokenKind,
    /// The user's `token_version` when the token was issued.
    pub token_version: i64,
    pub expires_at: DateTime<Utc>,
}

/// Tokens handed to a client after signup, login or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Response body of signup and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: ResolvedUser,
    pub tokens: TokenPair,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupInput {
    pub email: String,
    pub password: String,
    /// Confirmation; must equal `password`.
    pub password2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshInput {
    pub refresh_token: String,
}

/// The authenticated identity attached to a request by the auth middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
}
