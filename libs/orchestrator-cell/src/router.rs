use axum::{middleware, routing::get, Router};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{get_scheduler_stats, SchedulerState};

/// Mounted under `/scheduler`.
pub fn scheduler_routes(state: SchedulerState) -> Router {
    Router::new()
        .route("/stats", get(get_scheduler_stats))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
