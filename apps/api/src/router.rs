use axum::{routing::get, Router};

use appointment_cell::{appointment_routes, gps_routes, AppointmentState};
use orchestrator_cell::{scheduler_routes, SchedulerState};

pub fn create_router(appointments: AppointmentState, scheduler: SchedulerState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic appointment API is running!" }))
        .nest("/appointments", appointment_routes(appointments.clone()))
        .nest("/gps", gps_routes(appointments))
        .nest("/scheduler", scheduler_routes(scheduler))
}
