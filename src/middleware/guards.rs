//! Authorization guards that enforce permission checks at the type level,
//! so a route handler cannot accidentally skip them.

use axum::{async_trait, extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// An authenticated user, resolved from the bearer identity proof by the
/// external identity collaborator.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for User {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let proof = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let user_id = state
            .identity
            .resolve_identity(proof)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if state.identity.is_banned(user_id).await? {
            return Err(AppError::Unauthorized);
        }
        Ok(User { id: user_id })
    }
}
