//! JWT-based authentication extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use dispatch_core::error::CoreError;
use dispatch_core::roles::{ROLE_ADMIN, ROLE_PROVIDER, ROLE_REQUESTER};
use dispatch_core::types::DbId;

use crate::auth::jwt::validate_token;
use crate::error::AppError;
use crate::state::AppState;

/// Caller extracted from a JWT Bearer token in the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The caller's id (`claims.sub`). Providers authenticate as their
    /// provider id.
    pub user_id: DbId,
    /// Role name (`requester`, `provider` or `admin`).
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// True when the caller authenticated as requester `id`.
    ///
    /// Requester and provider ids share the `sub` claim, so the id alone
    /// does not identify a party.
    pub fn is_requester(&self, id: DbId) -> bool {
        self.role == ROLE_REQUESTER && self.user_id == id
    }

    /// True when the caller authenticated as provider `id`.
    pub fn is_provider(&self, id: DbId) -> bool {
        self.role == ROLE_PROVIDER && self.user_id == id
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing Authorization header".into(),
                ))
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Invalid Authorization format. Expected: Bearer <token>".into(),
            ))
        })?;

        let claims = validate_token(token, &state.config.jwt).map_err(|_| {
            AppError::Core(CoreError::Unauthorized("Invalid or expired token".into()))
        })?;

        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}
