//! HTTP surface of the dispatch service.
//!
//! [`build_app_router`] mounts the job and attempt routes under `/api/v1`,
//! `/health` at the root, and wraps everything in the request middleware.
//! The binary and the integration tests both go through it.

use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::{Json, Router};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::routes::{attempts, health, jobs};
use crate::state::AppState;

/// Header carrying the per-request id, set on the way in and echoed back.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the service router.
///
/// ```text
/// GET  /health
///
/// /api/v1/jobs                        create, read, dispatch, lifecycle
/// /api/v1/attempts/{id}/respond       provider answer to an offer
/// ```
///
/// Unknown paths get the same `{ "error", "code" }` body as handler errors.
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let api = Router::new()
        .nest("/jobs", jobs::router())
        .nest("/attempts", attempts::router());

    let routes = Router::new()
        .merge(health::router())
        .nest("/api/v1", api)
        .fallback(unknown_route);

    with_middleware(routes, config).with_state(state)
}

/// Request middleware, outermost last: CORS, request id, tracing, request
/// id echo, timeout, panic recovery.
fn with_middleware(routes: Router<AppState>, config: &ServerConfig) -> Router<AppState> {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    routes
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(cors_layer(config))
}

async fn unknown_route(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": format!("No route for {}", uri.path()),
            "code": "NOT_FOUND",
        })),
    )
}

/// Browser clients only read and POST commands; the request id is exposed
/// so they can quote it.
///
/// Panics at startup if any configured origin is invalid.
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
