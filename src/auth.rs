//! Password credentials and the dual-token session scheme.
//!
//! Signup and login hand out a [`TokenPair`]: a short-lived access token sent
//! as `Authorization: Bearer ...` on every request, and a longer-lived refresh
//! token that can be exchanged exactly once for a new pair.
//!
//! Tokens are random strings. The store only keeps their SHA-256 digest,
//! together with the user's `token_version` at issue time. Bumping that
//! counter (see [`SessionManager::invalidate`]) revokes every outstanding
//! token of the user at once.

use std::fmt::Write;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::db::{Database, DuplicateEmail};
use crate::models::*;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Email and password are required")]
    MissingCredentials,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("An account with that email already exists")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Issues, validates and revokes session tokens.
#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionManager {
    pub fn new(db: Database, config: SessionConfig) -> Self {
        Self {
            db,
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
        }
    }

    /// Register a new account and open its first session.
    pub fn signup(&self, input: SignupInput) -> Result<(User, TokenPair), AuthError> {
        let email = normalize_email(&input.email);
        if email.is_empty() || input.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if input.password != input.password2 {
            return Err(AuthError::PasswordMismatch);
        }

        // The unique index decides; a concurrent signup may win the insert.
        let user = self
            .db
            .create_user(CreateUserInput {
                email,
                password_hash: hash_password(&input.password)?,
            })
            .map_err(|e| match e.downcast::<DuplicateEmail>() {
                Ok(DuplicateEmail) => AuthError::EmailTaken,
                Err(e) => AuthError::Internal(e),
            })?;
        tracing::info!(user_id = %user.id, "User signed up");

        let tokens = self.issue(&user)?;
        Ok((user, tokens))
    }

    pub fn login(&self, input: LoginInput) -> Result<(User, TokenPair), AuthError> {
        let email = normalize_email(&input.email);
        let Some(user) = self.db.get_user_by_email(&email)? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(&input.password, &user.password_hash) {
            tracing::warn!(user_id = %user.id, "Incorrect password");
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.issue(&user)?;
        Ok((user, tokens))
    }

    /// Exchange a refresh token for a new pair. The presented token is consumed.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let (token, user) = self.validate(refresh_token, TokenKind::Refresh)?;
        if !self.db.delete_auth_token(&token.token_hash)? {
            // Lost a race with another refresh of the same token.
            return Err(AuthError::InvalidToken);
        }
        Ok(self.issue(&user)?)
    }

    /// Resolve an access token to the identity it was issued for.
    pub fn authenticate(&self, access_token: &str) -> Result<Caller, AuthError> {
        let (_, user) = self.validate(access_token, TokenKind::Access)?;
        Ok(Caller { user_id: user.id })
    }

    /// Revoke every access and refresh token of `user_id`.
    pub fn invalidate(&self, user_id: Uuid) -> Result<(), AuthError> {
        let version = self
            .db
            .bump_token_version(user_id)?
            .ok_or(AuthError::InvalidToken)?;
        let removed = self.db.delete_user_tokens(user_id)?;
        tracing::info!(%user_id, version, removed, "Invalidated user sessions");
        Ok(())
    }

    fn issue(&self, user: &User) -> anyhow::Result<TokenPair> {
        let now = Utc::now();
        let access_token = generate_token();
        let refresh_token = generate_token();
        let access_expires_at = now + self.access_ttl;
        let refresh_expires_at = now + self.refresh_ttl;

        for (token, kind, expires_at) in [
            (&access_token, TokenKind::Access, access_expires_at),
            (&refresh_token, TokenKind::Refresh, refresh_expires_at),
        ] {
            self.db.insert_auth_token(&AuthToken {
                token_hash: token_digest(token),
                user_id: user.id,
                kind,
                token_version: user.token_version,
                expires_at,
            })?;
        }

        Ok(TokenPair {
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at,
        })
    }

    fn validate(&self, raw: &str, kind: TokenKind) -> Result<(AuthToken, User), AuthError> {
        let token = self
            .db
            .get_auth_token(&token_digest(raw))?
            .filter(|t| t.kind == kind && t.expires_at > Utc::now())
            .ok_or(AuthError::InvalidToken)?;

        let user = self
            .db
            .get_user(token.user_id)?
            .filter(|u| u.token_version == token.token_version)
            .ok_or(AuthError::InvalidToken)?;

        Ok((token, user))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| anyhow::anyhow!("Failed to encode salt: {e}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
