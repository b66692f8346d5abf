use axum::routing::post;
use axum::Router;

use crate::handlers::attempts;
use crate::state::AppState;

/// Routes mounted at `/attempts`.
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}/respond", post(attempts::respond_to_offer))
}
