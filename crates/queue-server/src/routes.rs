//! Binds §6's endpoints onto the handlers, with a tower-http tracing span
//! per request.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/projects", post(handlers::submit_project))
        .route("/projects/:job_id", get(handlers::get_project))
        .route("/projects/:job_id/cancel", post(handlers::cancel_project))
        .route("/queue/stats", get(handlers::queue_stats))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
