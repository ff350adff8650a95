// libs/appointment-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppointmentState};

/// Routes mounted under `/appointments`.
pub fn appointment_routes(state: AppointmentState) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment).get(handlers::list_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/approve", post(handlers::approve_appointment))
        .route("/{appointment_id}/reject", post(handlers::reject_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/complete", post(handlers::complete_appointment))
        .route("/{appointment_id}/cancel-request", post(handlers::resolve_cancel_request))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    // Reached from the emailed link, no session.
    let public_routes = Router::new()
        .route("/{appointment_id}/cancel-public", post(handlers::cancel_appointment_public));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(state)
}

/// Routes mounted under `/gps`.
pub fn gps_routes(state: AppointmentState) -> Router {
    Router::new()
        .route("/verify/{appointment_id}", post(handlers::verify_location))
        .route("/status/{appointment_id}", get(handlers::get_geo_status))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
