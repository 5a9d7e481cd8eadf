use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("message already deleted")]
    AlreadyDeleted,

    #[error("edit window expired (max_edit_minutes: {max_edit_minutes})")]
    EditWindowExpired { max_edit_minutes: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    /// Whether a caller may usefully retry (transient store failures).
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            AppError::Internal => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::EditWindowExpired { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::AlreadyDeleted => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable category string surfaced in websocket `error` events.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid",
            AppError::Unauthorized => "authentication",
            AppError::Forbidden(_) | AppError::EditWindowExpired { .. } => "authorization",
            AppError::NotFound => "not_found",
            AppError::AlreadyDeleted => "conflict",
            AppError::Database(_) => "transient",
            _ => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Store-level detail stays in the logs, not in the response body
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error=%e, "database error");
                "storage unavailable".to_string()
            }
            AppError::Internal => "internal server error".to_string(),
            other => other.to_string(),
        };
        let body = Json(json!({
            "error": self.category(),
            "message": message,
            "retryable": self.is_retryable(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Forbidden("not a participant".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::EditWindowExpired { max_edit_minutes: 15 }.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::AlreadyDeleted.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn transient_store_errors_are_retryable() {
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!AppError::NotFound.is_retryable());
        assert!(!AppError::AlreadyDeleted.is_retryable());
    }

    #[test]
    fn categories_are_stable() {
        assert_eq!(AppError::Unauthorized.category(), "authentication");
        assert_eq!(
            AppError::EditWindowExpired { max_edit_minutes: 15 }.category(),
            "authorization"
        );
        assert_eq!(
            AppError::Database(sqlx::Error::PoolTimedOut).category(),
            "transient"
        );
    }
}
