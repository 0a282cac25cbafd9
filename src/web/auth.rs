use std::sync::Arc;

use axum::{extract::FromRequestParts, http::header, http::request::Parts};

use crate::db::models::{USER_STATUS_ENABLED, User};
use crate::db::services::user_service;
use crate::web::{AppState, error::AppError};

/// Extractor resolving the bearer token to the owning user row.
pub struct AuthenticatedUser(pub User);

impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
        let user = user_service::get_user_by_token(&state.pool, token)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?
            .ok_or_else(|| AppError::Unauthorized("invalid token".to_string()))?;
        if user.status != USER_STATUS_ENABLED {
            return Err(AppError::Unauthorized("user is disabled".to_string()));
        }
        Ok(AuthenticatedUser(user))
    }
}
