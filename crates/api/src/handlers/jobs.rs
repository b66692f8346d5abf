//! Handlers for the `/jobs` resource.
//!
//! Requesters act on their own jobs, the assigned provider reports service
//! execution, admins may do anything.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use dispatch_core::error::CoreError;
use dispatch_core::geo::Location;
use dispatch_core::job_status::JobStatus;
use dispatch_core::models::{Job, NewJob, TimeWindow};
use dispatch_core::types::{DbId, Timestamp};
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::{RequireAdmin, RequireProvider, RequireRequester};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[validate(length(min = 1, max = 64))]
    pub category: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
}

impl CreateJobRequest {
    fn into_new_job(self, requester_id: DbId) -> Result<NewJob, CoreError> {
        Ok(NewJob {
            requester_id,
            category: self.category,
            title: self.title,
            description: self.description,
            location: Location::new(self.latitude, self.longitude)?,
            window: TimeWindow::new(self.window_start, self.window_end)?,
        })
    }
}

/// Request body for `POST /jobs/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct AdvanceJobRequest {
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_requester(job: &Job, auth: &AuthUser) -> bool {
    auth.is_requester(job.requester_id)
}

fn is_assigned_provider(job: &Job, auth: &AuthUser) -> bool {
    job.provider_id.is_some_and(|id| auth.is_provider(id))
}

/// Fetch a job and check the caller may `action` it.
///
/// `allowed` decides for non-admin callers.
async fn find_and_authorize(
    state: &AppState,
    job_id: DbId,
    auth: &AuthUser,
    action: &str,
    allowed: fn(&Job, &AuthUser) -> bool,
) -> AppResult<Job> {
    let job = state.engine.get_job(job_id).await?;
    if !auth.is_admin() && !allowed(&job, auth) {
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "Cannot {action} job {job_id}"
        ))));
    }
    Ok(job)
}

fn can_view(job: &Job, auth: &AuthUser) -> bool {
    is_requester(job, auth) || is_assigned_provider(job, auth)
}

// ---------------------------------------------------------------------------
// Create / read
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Create a job in `DRAFT` owned by the caller. Returns 201.
pub async fn create_job(
    RequireRequester(auth): RequireRequester,
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let new_job = input.into_new_job(auth.user_id)?;
    let job = state.engine.create_job(new_job, Some(auth.user_id)).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state, job_id, &auth, "view", can_view).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/dispatch
///
/// Job status plus its attempts in ascending rank order.
pub async fn get_dispatch_status(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state, job_id, &auth, "view", can_view).await?;
    let status = state.engine.get_dispatch_status(job_id).await?;
    Ok(Json(DataResponse { data: status }))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/dispatch
///
/// Confirm the job and send the first offer. 422 when no provider is
/// eligible; the job then stays in `DRAFT`.
pub async fn confirm_dispatch(
    RequireRequester(auth): RequireRequester,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state, job_id, &auth, "dispatch", is_requester).await?;
    let status = state
        .engine
        .confirm_dispatch(job_id, Some(auth.user_id))
        .await?;
    Ok(Json(DataResponse { data: status }))
}

/// POST /api/v1/jobs/{id}/withdraw
pub async fn withdraw_dispatch(
    RequireRequester(auth): RequireRequester,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state, job_id, &auth, "withdraw", is_requester).await?;
    let job = state
        .engine
        .withdraw_dispatch(job_id, Some(auth.user_id))
        .await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// 409 `TERMINAL_STATE` if the job is already paid or canceled.
pub async fn cancel_job(
    RequireRequester(auth): RequireRequester,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state, job_id, &auth, "cancel", is_requester).await?;
    let job = state.engine.cancel_job(job_id, Some(auth.user_id)).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/status
///
/// Service-execution events reported by the assigned provider.
pub async fn advance_job(
    RequireProvider(auth): RequireProvider,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Json(input): Json<AdvanceJobRequest>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state, job_id, &auth, "update", is_assigned_provider).await?;
    let job = state
        .engine
        .advance_job(job_id, input.status, Some(auth.user_id))
        .await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/payment-confirmed
///
/// The payment system's confirmation signal, `COMPLETED -> PAID`.
pub async fn confirm_payment(
    RequireAdmin(auth): RequireAdmin,
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .engine
        .confirm_payment(job_id, Some(auth.user_id))
        .await?;
    Ok(Json(DataResponse { data: job }))
}
