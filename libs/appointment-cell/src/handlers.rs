// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Actor, ActorRole, AppointmentError, AppointmentListQuery, BookAppointmentRequest,
    CancelAppointmentRequest, DoctorDecisionRequest, GeoCheckInRequest, PublicCancelRequest,
    ResolveCancelRequest,
};
use crate::services::engine::AppointmentLifecycleEngine;

/// Router state for every appointment and GPS route.
#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<AppointmentLifecycleEngine>,
}

impl AppointmentState {
    pub fn new(config: Arc<AppConfig>, engine: Arc<AppointmentLifecycleEngine>) -> Self {
        Self { config, engine }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let message = err.to_string();
        match err {
            AppointmentError::Validation(_) => AppError::ValidationError(message),
            AppointmentError::IllegalTransition { .. }
            | AppointmentError::TooLateToCancel { .. }
            | AppointmentError::InvalidCoordinate(_) => AppError::BadRequest(message),
            AppointmentError::SlotConflict | AppointmentError::ConcurrentModification => {
                AppError::Conflict(message)
            }
            AppointmentError::NotAuthorizedForAppointment => AppError::Forbidden(message),
            AppointmentError::NotFound(_) => AppError::NotFound(message),
            AppointmentError::StoreUnavailable(_) => AppError::Unavailable(message),
        }
    }
}

/// Map the authenticated user onto an engine actor.
pub fn actor_from_user(user: &User) -> Result<Actor, AppError> {
    let user_id = Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Token subject is not a valid user id".to_string()))?;

    let role = match user.role.as_deref() {
        Some("patient") => ActorRole::Patient,
        Some("doctor") => ActorRole::Doctor,
        Some("admin") => ActorRole::Admin,
        other => {
            debug!("Rejecting caller with role {:?}", other);
            return Err(AppError::Forbidden("Unsupported role".to_string()));
        }
    };

    Ok(Actor { user_id, role })
}

// ==============================================================================
// BOOKING & QUERIES
// ==============================================================================

pub async fn book_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let appointment = state.engine.book(&actor, request, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment requested; awaiting doctor review"
    })))
}

pub async fn list_appointments(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let appointments = state.engine.list_appointments(&actor, query.status).await?;

    Ok(Json(json!({
        "success": true,
        "total": appointments.len(),
        "appointments": appointments
    })))
}

pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let appointment = state.engine.get_appointment(&actor, appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

// ==============================================================================
// DOCTOR DECISIONS
// ==============================================================================

pub async fn approve_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<DoctorDecisionRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let appointment = state
        .engine
        .approve(&actor, appointment_id, request.doctor_notes, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment approved"
    })))
}

pub async fn reject_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<DoctorDecisionRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let appointment = state
        .engine
        .reject(&actor, appointment_id, request.doctor_notes, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rejected"
    })))
}

pub async fn complete_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let appointment = state.engine.complete(&actor, appointment_id, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment completed"
    })))
}

pub async fn resolve_cancel_request(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ResolveCancelRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let appointment = state
        .engine
        .resolve_cancel_request(&actor, appointment_id, request.confirm, request.doctor_notes, Utc::now())
        .await?;

    let message = if request.confirm {
        "Cancellation confirmed"
    } else {
        "Appointment reinstated"
    };

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": message
    })))
}

// ==============================================================================
// CANCELLATION
// ==============================================================================

pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let appointment = state
        .engine
        .cancel_by_party(&actor, appointment_id, request.reason, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}

/// Unauthenticated: the emailed token is the credential.
pub async fn cancel_appointment_public(
    State(state): State<AppointmentState>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<PublicCancelRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .engine
        .cancel_with_token(appointment_id, &request.token, request.reason, Utc::now())
        .await?;
    let summary = state.engine.public_summary(&appointment).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": summary,
        "message": "Appointment cancelled"
    })))
}

// ==============================================================================
// GPS CHECK-IN
// ==============================================================================

pub async fn verify_location(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<GeoCheckInRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let (appointment, outcome) = state
        .engine
        .check_in(&actor, appointment_id, request.latitude, request.longitude, Utc::now())
        .await?;

    let message = if outcome.is_verified() {
        "Location verified"
    } else {
        "Too far from the hospital; the doctor has been asked to confirm cancellation"
    };

    Ok(Json(json!({
        "success": true,
        "verified": outcome.is_verified(),
        "outcome": outcome,
        "appointment": appointment,
        "message": message
    })))
}

pub async fn get_geo_status(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let status = state.engine.geo_status(&actor, appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "status": status
    })))
}
