use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::auth::AuthError;
use crate::forest::ForestError;

/// Errors returned by HTTP handlers.
///
/// Client errors carry their message through to the response body. Server
/// errors are logged in full and answered with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("You are not authenticated.")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    /// A store failed mid-operation; the request can be retried as a whole.
    #[error("Storage temporarily unavailable, please retry")]
    Unavailable(#[source] ForestError),
    #[error("Internal server error")]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Store-layer failures. Known validation messages from the store are safe to
/// show to the client; anything else is an internal error.
impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        let msg = e.to_string();
        if msg.ends_with("not found") {
            return Self::NotFound(msg);
        }
        if msg.contains("different organization") {
            return Self::BadRequest(msg);
        }
        Self::Internal(e)
    }
}

impl From<ForestError> for ApiError {
    fn from(e: ForestError) -> Self {
        Self::Unavailable(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredentials | AuthError::PasswordMismatch => {
                Self::BadRequest(e.to_string())
            }
            AuthError::EmailTaken => Self::Conflict(e.to_string()),
            AuthError::InvalidCredentials | AuthError::InvalidToken => Self::Unauthorized,
            AuthError::Internal(e) => Self::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(e) => tracing::error!("Internal error: {e:#}"),
            Self::Unavailable(e) => tracing::error!("Store unavailable: {e}"),
            Self::BadRequest(msg) | Self::Conflict(msg) => {
                tracing::warn!("Validation error: {msg}")
            }
            Self::Unauthorized | Self::NotFound(_) => {}
        }

        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
