//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST   /                          -> create_job
/// GET    /{id}                      -> get_job
/// POST   /{id}/dispatch             -> confirm_dispatch
/// GET    /{id}/dispatch             -> get_dispatch_status
/// POST   /{id}/withdraw             -> withdraw_dispatch
/// POST   /{id}/cancel               -> cancel_job
/// POST   /{id}/status               -> advance_job
/// POST   /{id}/payment-confirmed    -> confirm_payment
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route(
            "/{id}/dispatch",
            get(jobs::get_dispatch_status).post(jobs::confirm_dispatch),
        )
        .route("/{id}/withdraw", post(jobs::withdraw_dispatch))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/status", post(jobs::advance_job))
        .route("/{id}/payment-confirmed", post(jobs::confirm_payment))
}
