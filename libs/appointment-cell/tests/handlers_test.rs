use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use assert_matches::assert_matches;
use uuid::Uuid;

use appointment_cell::handlers::*;
use appointment_cell::models::*;
use appointment_cell::test_support::{offset_north, EngineFixture, HOSPITAL_LAT, HOSPITAL_LON};
use shared_models::{auth::User, error::AppError};
use shared_utils::test_utils::TestUser;

fn user_extension(actor: &Actor, role: &str) -> Extension<User> {
    Extension(TestUser::with_id(actor.user_id, &format!("{}@example.com", role), role).to_user())
}

fn state(fx: &EngineFixture) -> State<AppointmentState> {
    State(AppointmentState::new(fx.config.clone(), fx.engine.clone()))
}

/// Handlers stamp commands with the wall clock, so book for a weekday well ahead.
fn upcoming_request(fx: &EngineFixture, time: &str) -> BookAppointmentRequest {
    let mut day = chrono::Utc::now().date_naive() + chrono::Duration::days(3);
    while fx.config.lifecycle.closed_weekdays.contains(&chrono::Datelike::weekday(&day)) {
        day += chrono::Duration::days(1);
    }
    BookAppointmentRequest {
        doctor_id: fx.doctor_id,
        hospital_id: fx.hospital_id,
        appointment_date: day.format("%Y-%m-%d").to_string(),
        appointment_time: time.to_string(),
        reason: "Persistent lower back pain".to_string(),
        notes: Some("Prefer morning".to_string()),
    }
}

async fn book(fx: &EngineFixture, time: &str) -> Uuid {
    let Json(body) = book_appointment(
        state(fx),
        user_extension(&fx.patient, "patient"),
        Json(upcoming_request(fx, time)),
    )
    .await
    .unwrap();
    Uuid::parse_str(body["appointment"]["id"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn book_then_approve_through_handlers() {
    let fx = EngineFixture::new().await;
    let id = book(&fx, "10:00").await;

    let Json(body) = approve_appointment(
        state(&fx),
        user_extension(&fx.doctor, "doctor"),
        Path(id),
        Json(DoctorDecisionRequest { doctor_notes: Some("Fasting required".to_string()) }),
    )
    .await
    .unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["appointment"]["status"], "approved");
    assert_eq!(body["appointment"]["doctor_notes"], "Fasting required");
    assert_eq!(body["appointment"]["patient_notes"], "Prefer morning");
}

#[tokio::test]
async fn invalid_booking_is_a_bad_request() {
    let fx = EngineFixture::new().await;
    let mut request = upcoming_request(&fx, "10:00");
    request.reason = "pain".to_string();

    let err = book_appointment(state(&fx), user_extension(&fx.patient, "patient"), Json(request))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    assert!(err.to_string().contains("reason"));
}

#[tokio::test]
async fn double_booking_is_a_conflict() {
    let fx = EngineFixture::new().await;
    book(&fx, "11:30").await;

    let err = book_appointment(
        state(&fx),
        user_extension(&fx.other_patient, "patient"),
        Json(upcoming_request(&fx, "11:30")),
    )
    .await
    .unwrap_err();

    assert_matches!(err, AppError::Conflict(_));
    assert_eq!(err.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn foreign_doctor_is_forbidden() {
    let fx = EngineFixture::new().await;
    let id = book(&fx, "12:00").await;

    let err = reject_appointment(
        state(&fx),
        user_extension(&fx.other_doctor, "doctor"),
        Path(id),
        Json(DoctorDecisionRequest::default()),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_appointment_is_not_found() {
    let fx = EngineFixture::new().await;

    let err = get_appointment(state(&fx), user_extension(&fx.patient, "patient"), Path(Uuid::new_v4()))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_role_and_bad_subject_are_rejected() {
    let bad_role = TestUser::new("nurse@example.com", "nurse").to_user();
    assert_matches!(actor_from_user(&bad_role), Err(AppError::Forbidden(_)));

    let mut bad_subject = TestUser::patient("p@example.com").to_user();
    bad_subject.id = "not-a-uuid".to_string();
    assert_matches!(actor_from_user(&bad_subject), Err(AppError::Auth(_)));
}

#[tokio::test]
async fn list_filters_by_status() {
    let fx = EngineFixture::new().await;
    let first = book(&fx, "09:00").await;
    book(&fx, "09:30").await;
    approve_appointment(
        state(&fx),
        user_extension(&fx.doctor, "doctor"),
        Path(first),
        Json(DoctorDecisionRequest::default()),
    )
    .await
    .unwrap();

    let Json(all) = list_appointments(
        state(&fx),
        user_extension(&fx.patient, "patient"),
        Query(AppointmentListQuery::default()),
    )
    .await
    .unwrap();
    assert_eq!(all["total"], 2);

    let Json(approved) = list_appointments(
        state(&fx),
        user_extension(&fx.doctor, "doctor"),
        Query(AppointmentListQuery { status: Some(AppointmentStatus::Approved) }),
    )
    .await
    .unwrap();
    assert_eq!(approved["total"], 1);
    assert_eq!(approved["appointments"][0]["id"], first.to_string());
}

#[tokio::test]
async fn public_cancel_with_token() {
    let fx = EngineFixture::new().await;
    let id = book(&fx, "15:00").await;
    let token = fx.reload(id).await.cancellation_token.unwrap();

    let err = cancel_appointment_public(
        state(&fx),
        Path(id),
        Json(PublicCancelRequest { token: "apt_wrong".to_string(), reason: None }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

    let Json(body) = cancel_appointment_public(
        state(&fx),
        Path(id),
        Json(PublicCancelRequest { token, reason: Some("Travelling".to_string()) }),
    )
    .await
    .unwrap();
    assert_eq!(body["appointment"]["status"], "cancelled");
    assert_eq!(body["appointment"]["doctor_name"], "Dr. Hana Bekele");
    assert!(body["appointment"].get("cancellation_token").is_none());
}

#[tokio::test]
async fn patient_cancel_through_handler() {
    let fx = EngineFixture::new().await;
    let id = book(&fx, "16:00").await;

    let Json(body) = cancel_appointment(
        state(&fx),
        user_extension(&fx.patient, "patient"),
        Path(id),
        Json(CancelAppointmentRequest { reason: Some("Schedule clash".to_string()) }),
    )
    .await
    .unwrap();

    assert_eq!(body["appointment"]["status"], "cancelled");
    assert_eq!(body["appointment"]["cancelled_by"], "patient");
    assert_eq!(body["appointment"]["cancellation_reason"], "Schedule clash");
}

#[tokio::test]
async fn gps_verify_on_the_wrong_day_is_a_bad_request() {
    let fx = EngineFixture::new().await;
    let id = book(&fx, "10:00").await;
    approve_appointment(
        state(&fx),
        user_extension(&fx.doctor, "doctor"),
        Path(id),
        Json(DoctorDecisionRequest::default()),
    )
    .await
    .unwrap();

    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 5);
    let err = verify_location(
        state(&fx),
        user_extension(&fx.patient, "patient"),
        Path(id),
        Json(GeoCheckInRequest { latitude: lat, longitude: lon }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

    let Json(status) = get_geo_status(state(&fx), user_extension(&fx.patient, "patient"), Path(id))
        .await
        .unwrap();
    assert_eq!(status["status"]["geo_verified"], false);
    assert_eq!(status["status"]["max_distance_meters"], 500);
}

#[tokio::test]
async fn complete_before_verification_is_a_bad_request() {
    let fx = EngineFixture::new().await;
    let id = book(&fx, "13:00").await;
    approve_appointment(
        state(&fx),
        user_extension(&fx.doctor, "doctor"),
        Path(id),
        Json(DoctorDecisionRequest::default()),
    )
    .await
    .unwrap();

    let err = complete_appointment(state(&fx), user_extension(&fx.doctor, "doctor"), Path(id))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

    let err = resolve_cancel_request(
        state(&fx),
        user_extension(&fx.doctor, "doctor"),
        Path(id),
        Json(ResolveCancelRequest { confirm: true, doctor_notes: None }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[test]
fn error_mapping_covers_every_kind() {
    let cases = [
        (AppointmentError::validation("reason", "too short"), StatusCode::BAD_REQUEST),
        (AppointmentError::SlotConflict, StatusCode::CONFLICT),
        (AppointmentError::ConcurrentModification, StatusCode::CONFLICT),
        (AppointmentError::NotAuthorizedForAppointment, StatusCode::FORBIDDEN),
        (
            AppointmentError::TooLateToCancel { minutes_remaining: 5, required_minutes: 15 },
            StatusCode::BAD_REQUEST,
        ),
        (AppointmentError::InvalidCoordinate("latitude".to_string()), StatusCode::BAD_REQUEST),
        (AppointmentError::NotFound(EntityKind::Hospital), StatusCode::NOT_FOUND),
        (AppointmentError::StoreUnavailable("down".to_string()), StatusCode::SERVICE_UNAVAILABLE),
    ];

    for (err, expected) in cases {
        let app: AppError = err.into();
        assert_eq!(app.status_code(), expected, "{app}");
    }
}
