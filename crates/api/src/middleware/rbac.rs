//! Role-based access control extractors.
//!
//! Each extractor wraps [`AuthUser`] and rejects callers whose role does
//! not match with 403. Ownership of a specific job or attempt is checked in
//! the handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use dispatch_core::error::CoreError;
use dispatch_core::roles::{ROLE_ADMIN, ROLE_PROVIDER, ROLE_REQUESTER};

use super::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

async fn require_role(
    parts: &mut Parts,
    state: &AppState,
    role: &str,
    message: &str,
) -> Result<AuthUser, AppError> {
    let user = AuthUser::from_request_parts(parts, state).await?;
    if user.role != role && user.role != ROLE_ADMIN {
        return Err(AppError::Core(CoreError::Forbidden(message.into())));
    }
    Ok(user)
}

/// Requires `requester` or `admin`.
pub struct RequireRequester(pub AuthUser);

impl FromRequestParts<AppState> for RequireRequester {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        require_role(parts, state, ROLE_REQUESTER, "Requester role required")
            .await
            .map(RequireRequester)
    }
}

/// Requires `provider` or `admin`.
pub struct RequireProvider(pub AuthUser);

impl FromRequestParts<AppState> for RequireProvider {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        require_role(parts, state, ROLE_PROVIDER, "Provider role required")
            .await
            .map(RequireProvider)
    }
}

/// Requires `admin`. Payment confirmation arrives through this role.
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        require_role(parts, state, ROLE_ADMIN, "Admin role required")
            .await
            .map(RequireAdmin)
    }
}
