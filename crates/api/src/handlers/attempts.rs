//! Handlers for the `/attempts` resource.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use dispatch_core::attempt::ProviderResponse;
use dispatch_core::error::CoreError;
use dispatch_core::types::DbId;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireProvider;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /attempts/{id}/respond`.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    /// `ACCEPTED` or `REJECTED`.
    pub outcome: ProviderResponse,
}

/// POST /api/v1/attempts/{id}/respond
///
/// A provider's answer to an offer made to them. 409 `STALE_ATTEMPT` when
/// the offer was already resolved, expired or withdrawn.
pub async fn respond_to_offer(
    RequireProvider(auth): RequireProvider,
    State(state): State<AppState>,
    Path(attempt_id): Path<DbId>,
    Json(input): Json<RespondRequest>,
) -> AppResult<impl IntoResponse> {
    let attempt = state.engine.get_attempt(attempt_id).await?;
    if attempt.provider_id != auth.user_id && !auth.is_admin() {
        return Err(AppError::Core(CoreError::Forbidden(
            "Cannot respond to an offer made to another provider".into(),
        )));
    }

    let resolution = state
        .engine
        .respond_to_offer(attempt_id, input.outcome.into(), Some(auth.user_id))
        .await?;

    tracing::info!(
        attempt_id,
        job_id = resolution.job.id,
        user_id = auth.user_id,
        outcome = %resolution.attempt.outcome,
        "Offer response recorded",
    );
    Ok(Json(DataResponse { data: resolution }))
}
