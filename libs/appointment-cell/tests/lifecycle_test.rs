use assert_matches::assert_matches;
use chrono::{Duration, NaiveDate, NaiveTime};

use appointment_cell::models::*;
use appointment_cell::services::engine::NO_SHOW_NOTE;
use appointment_cell::services::notifications::NotificationKind;
use appointment_cell::test_support::{offset_north, utc, EngineFixture, HOSPITAL_LAT, HOSPITAL_LON};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

// ==============================================================================
// END-TO-END SCENARIOS
// ==============================================================================

#[tokio::test]
async fn happy_path_book_approve_check_in_complete() {
    let fx = EngineFixture::new().await;

    let mut request = fx.booking_request(date(2025, 3, 10), time(10, 0));
    request.reason = "chronic headache follow-up".to_string();
    let booked = fx
        .engine
        .book(&fx.patient, request, utc(2025, 3, 8, 12, 0))
        .await
        .unwrap();

    assert_eq!(booked.status, AppointmentStatus::PendingReview);
    assert_eq!(booked.reason, "chronic headache follow-up");
    assert_eq!(booked.scheduled_at, utc(2025, 3, 10, 10, 0));
    assert_eq!(fx.sink.kinds(), vec![NotificationKind::AppointmentRequested]);
    assert!(fx.sink.sent()[0].recipient.email.ends_with("@clinic.test"));

    let approved = fx
        .engine
        .approve(&fx.doctor, booked.id, Some("Bring previous scans".to_string()), utc(2025, 3, 8, 15, 0))
        .await
        .unwrap();
    assert_eq!(approved.status, AppointmentStatus::Approved);
    let token = approved.cancellation_token.clone().expect("token issued");
    assert_eq!(approved.doctor_notes.as_deref(), Some("Bring previous scans"));

    let approval_mail = fx.sink.sent().pop().unwrap();
    assert_eq!(approval_mail.kind, NotificationKind::AppointmentApproved);
    assert_eq!(approval_mail.params.cancellation_token.as_deref(), Some(token.as_str()));
    assert_eq!(
        approval_mail.params.cancel_url.as_deref(),
        Some(format!("http://localhost:3000/cancel-appointment/{}?token={}", booked.id, token).as_str())
    );

    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 20);
    let (checked_in, outcome) = fx
        .engine
        .check_in(&fx.patient, booked.id, lat, lon, utc(2025, 3, 10, 9, 55))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        GeoCheckInOutcome::Verified { distance_meters: 20, max_distance_meters: 500 }
    );
    assert!(checked_in.geo_verified);
    assert_eq!(checked_in.distance_meters, Some(20));
    assert_eq!(checked_in.geo_check_at, Some(utc(2025, 3, 10, 9, 55)));

    let completed = fx
        .engine
        .complete(&fx.doctor, booked.id, utc(2025, 3, 10, 10, 40))
        .await
        .unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);
    assert!(completed.geo_verified);
    assert_eq!(fx.sink.sent().len(), 2);
}

#[tokio::test]
async fn late_cancel_is_refused() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let err = fx
        .engine
        .cancel_by_party(&fx.patient, appt.id, None, utc(2025, 3, 10, 9, 50))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        AppointmentError::TooLateToCancel { minutes_remaining: 10, required_minutes: 15 }
    );
    let stored = fx.reload(appt.id).await;
    assert_eq!(stored.status, AppointmentStatus::Approved);
    assert_eq!(stored.revision, appt.revision);
}

#[tokio::test]
async fn failed_geo_check_requests_cancellation() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    fx.sink.clear();

    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 1800);
    let (updated, outcome) = fx
        .engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 10, 10, 2))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        GeoCheckInOutcome::Rejected { distance_meters: 1800, max_distance_meters: 500 }
    );
    assert_eq!(updated.status, AppointmentStatus::CancelRequested);
    assert_eq!(updated.distance_meters, Some(1800));
    assert!(!updated.geo_verified);
    assert_eq!(
        fx.sink.kinds(),
        vec![NotificationKind::GeoCancellationPatient, NotificationKind::GeoCancellationDoctor]
    );
    for mail in fx.sink.sent() {
        assert_eq!(mail.params.distance_meters, Some(1800));
        assert_eq!(mail.params.max_distance_meters, Some(500));
    }
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn booking_issues_a_token_up_front() {
    let fx = EngineFixture::new().await;
    let booked = fx.book_at(utc(2025, 3, 10, 10, 0)).await;

    assert!(booked.cancellation_token.is_some());
    assert_eq!(booked.revision, 1);
    assert!(!booked.reminder_one_hour_sent && !booked.reminder_fifteen_min_sent);
}

#[tokio::test]
async fn booking_rejects_doctor_at_wrong_hospital_and_unknown_doctor() {
    let fx = EngineFixture::new().await;

    let mut request = fx.booking_request(date(2025, 3, 10), time(10, 0));
    request.hospital_id = uuid::Uuid::new_v4();
    let err = fx.engine.book(&fx.patient, request, utc(2025, 3, 8, 9, 0)).await.unwrap_err();
    assert_matches!(err, AppointmentError::Validation(ref v) if v[0].field == "hospital_id");

    let mut request = fx.booking_request(date(2025, 3, 10), time(10, 0));
    request.doctor_id = uuid::Uuid::new_v4();
    let err = fx.engine.book(&fx.patient, request, utc(2025, 3, 8, 9, 0)).await.unwrap_err();
    assert_matches!(err, AppointmentError::NotFound(EntityKind::Doctor));

    assert!(fx.store.is_empty().await);
    assert!(fx.sink.sent().is_empty());
}

#[tokio::test]
async fn only_patients_book() {
    let fx = EngineFixture::new().await;
    let request = fx.booking_request(date(2025, 3, 10), time(10, 0));

    let err = fx.engine.book(&fx.doctor, request, utc(2025, 3, 8, 9, 0)).await.unwrap_err();
    assert_matches!(err, AppointmentError::NotAuthorizedForAppointment);
}

#[tokio::test]
async fn sequential_double_booking_conflicts_but_freed_slot_can_be_rebooked() {
    let fx = EngineFixture::new().await;
    let first = fx.book_at(utc(2025, 3, 10, 10, 0)).await;

    let request = fx.booking_request(date(2025, 3, 10), time(10, 0));
    let err = fx
        .engine
        .book(&fx.other_patient, request.clone(), utc(2025, 3, 8, 9, 0))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::SlotConflict);

    fx.engine
        .reject(&fx.doctor, first.id, Some("Fully booked".to_string()), utc(2025, 3, 8, 10, 0))
        .await
        .unwrap();

    let second = fx
        .engine
        .book(&fx.other_patient, request, utc(2025, 3, 8, 11, 0))
        .await
        .unwrap();
    assert_eq!(second.status, AppointmentStatus::PendingReview);
}

// ==============================================================================
// DOCTOR DECISIONS
// ==============================================================================

#[tokio::test]
async fn approve_is_idempotent_and_keeps_the_token() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    let sent_before = fx.sink.sent().len();

    let again = fx
        .engine
        .approve(&fx.doctor, appt.id, None, utc(2025, 3, 9, 9, 0))
        .await
        .unwrap();

    assert_eq!(again, appt);
    assert_eq!(fx.sink.sent().len(), sent_before);
}

#[tokio::test]
async fn only_the_owning_doctor_decides() {
    let fx = EngineFixture::new().await;
    let appt = fx.book_at(utc(2025, 3, 10, 10, 0)).await;

    for actor in [fx.other_doctor, fx.patient] {
        let err = fx
            .engine
            .approve(&actor, appt.id, None, utc(2025, 3, 9, 9, 0))
            .await
            .unwrap_err();
        assert_matches!(err, AppointmentError::NotAuthorizedForAppointment);
    }
    assert_eq!(fx.reload(appt.id).await.status, AppointmentStatus::PendingReview);
}

#[tokio::test]
async fn reject_notifies_patient_and_blocks_approval() {
    let fx = EngineFixture::new().await;
    let appt = fx.book_at(utc(2025, 3, 10, 10, 0)).await;

    let rejected = fx
        .engine
        .reject(&fx.doctor, appt.id, Some("Please see a specialist".to_string()), utc(2025, 3, 9, 9, 0))
        .await
        .unwrap();
    assert_eq!(rejected.status, AppointmentStatus::Rejected);
    assert_eq!(fx.sink.count(NotificationKind::AppointmentRejected), 1);

    let err = fx
        .engine
        .approve(&fx.doctor, appt.id, None, utc(2025, 3, 9, 9, 5))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        AppointmentError::IllegalTransition { from: AppointmentStatus::Rejected, event: LifecycleEvent::Approve, .. }
    );
}

#[tokio::test]
async fn complete_requires_geo_verification() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let err = fx
        .engine
        .complete(&fx.doctor, appt.id, utc(2025, 3, 10, 10, 30))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::IllegalTransition { event: LifecycleEvent::Complete, .. });
    assert_eq!(fx.reload(appt.id).await.status, AppointmentStatus::Approved);
}

// ==============================================================================
// CANCELLATION
// ==============================================================================

#[tokio::test]
async fn patient_cancels_with_enough_lead_time() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    fx.sink.clear();

    let cancelled = fx
        .engine
        .cancel_by_party(&fx.patient, appt.id, Some("  Feeling better ".to_string()), utc(2025, 3, 10, 9, 45))
        .await
        .unwrap();

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Patient));
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Feeling better"));
    assert_eq!(cancelled.patient_notes, appt.patient_notes);
    assert_eq!(
        fx.sink.kinds(),
        vec![
            NotificationKind::CancellationConfirmationPatient,
            NotificationKind::CancellationNoticeDoctor
        ]
    );
}

#[tokio::test]
async fn pending_appointments_cancel_without_lead_time_check() {
    let fx = EngineFixture::new().await;
    let appt = fx.book_at(utc(2025, 3, 10, 10, 0)).await;

    let cancelled = fx
        .engine
        .cancel_by_party(&fx.doctor, appt.id, None, utc(2025, 3, 10, 9, 58))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Doctor));
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Cancelled by doctor"));
}

#[tokio::test]
async fn strangers_cannot_cancel() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    for actor in [fx.other_patient, fx.other_doctor] {
        let err = fx
            .engine
            .cancel_by_party(&actor, appt.id, None, utc(2025, 3, 9, 9, 0))
            .await
            .unwrap_err();
        assert_matches!(err, AppointmentError::NotAuthorizedForAppointment);
    }
}

#[tokio::test]
async fn public_link_cancels_with_matching_token_only() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    let token = appt.cancellation_token.clone().unwrap();

    let mut tampered = token.clone();
    tampered.pop();
    tampered.push(if token.ends_with('a') { 'b' } else { 'a' });

    let err = fx
        .engine
        .cancel_with_token(appt.id, &tampered, None, utc(2025, 3, 9, 9, 0))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::NotAuthorizedForAppointment);

    let err = fx
        .engine
        .cancel_with_token(appt.id, &token, None, utc(2025, 3, 10, 9, 46))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::TooLateToCancel { .. });

    let cancelled = fx
        .engine
        .cancel_with_token(appt.id, &token, None, utc(2025, 3, 10, 9, 45))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::PublicLink));
    assert_eq!(fx.sink.count(NotificationKind::CancellationNoticeDoctor), 1);

    let summary = fx.engine.public_summary(&cancelled).await.unwrap();
    assert_eq!(summary.patient_name, "Selam Girma");
    assert_eq!(summary.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn token_of_another_appointment_is_rejected() {
    let fx = EngineFixture::new().await;
    let mine = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    let other = fx.approved_at(utc(2025, 3, 10, 11, 0)).await;

    let err = fx
        .engine
        .cancel_with_token(mine.id, other.cancellation_token.as_deref().unwrap(), None, utc(2025, 3, 9, 9, 0))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::NotAuthorizedForAppointment);
}

// ==============================================================================
// GEO CHECK-IN
// ==============================================================================

#[tokio::test]
async fn check_in_boundary_is_inclusive() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 500);
    let (_, outcome) = fx
        .engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 10, 9, 40))
        .await
        .unwrap();
    assert!(outcome.is_verified());
    assert_eq!(outcome.distance_meters(), 500);
}

#[tokio::test]
async fn check_in_one_meter_outside_fails() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 501);
    let (updated, outcome) = fx
        .engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 10, 9, 40))
        .await
        .unwrap();
    assert!(!outcome.is_verified());
    assert_eq!(updated.status, AppointmentStatus::CancelRequested);
}

#[tokio::test]
async fn check_in_guards() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 10);

    let err = fx
        .engine
        .check_in(&fx.patient, appt.id, 91.0, lon, utc(2025, 3, 10, 9, 40))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::InvalidCoordinate(_));

    let err = fx
        .engine
        .check_in(&fx.other_patient, appt.id, lat, lon, utc(2025, 3, 10, 9, 40))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::NotAuthorizedForAppointment);

    let err = fx
        .engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 9, 9, 40))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::Validation(_));

    fx.engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 10, 9, 40))
        .await
        .unwrap();
    let verified = fx.reload(appt.id).await;

    let err = fx
        .engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 10, 9, 41))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::IllegalTransition { event: LifecycleEvent::CheckIn, .. });
    assert_eq!(fx.reload(appt.id).await, verified);
}

#[tokio::test]
async fn pending_appointments_cannot_check_in() {
    let fx = EngineFixture::new().await;
    let appt = fx.book_at(utc(2025, 3, 10, 10, 0)).await;

    let err = fx
        .engine
        .check_in(&fx.patient, appt.id, HOSPITAL_LAT, HOSPITAL_LON, utc(2025, 3, 10, 9, 40))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        AppointmentError::IllegalTransition { from: AppointmentStatus::PendingReview, .. }
    );
}

// ==============================================================================
// CANCEL REQUEST RESOLUTION
// ==============================================================================

#[tokio::test]
async fn doctor_confirms_cancel_request() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 2500);
    fx.engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 10, 9, 50))
        .await
        .unwrap();
    fx.sink.clear();

    let cancelled = fx
        .engine
        .resolve_cancel_request(&fx.doctor, appt.id, true, None, utc(2025, 3, 10, 9, 55))
        .await
        .unwrap();

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Doctor));
    assert_eq!(
        fx.sink.kinds(),
        vec![
            NotificationKind::CancellationConfirmationPatient,
            NotificationKind::CancellationNoticeDoctor
        ]
    );
    let notice = &fx.sink.sent()[1];
    assert_eq!(notice.params.cancelled_by, Some(CancelledBy::Doctor));
    assert_eq!(notice.kind.subject(), "Appointment Cancelled");
}

#[tokio::test]
async fn doctor_reinstates_after_failed_check_in() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 700);
    fx.engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 10, 9, 50))
        .await
        .unwrap();
    fx.sink.clear();

    let reinstated = fx
        .engine
        .resolve_cancel_request(&fx.doctor, appt.id, false, Some("GPS drift, patient is here".to_string()), utc(2025, 3, 10, 9, 52))
        .await
        .unwrap();

    assert_eq!(reinstated.status, AppointmentStatus::Approved);
    assert!(!reinstated.geo_verified);
    assert_eq!(reinstated.cancellation_token, appt.cancellation_token);
    assert_eq!(fx.sink.kinds(), vec![NotificationKind::AppointmentApproved]);
}

#[tokio::test]
async fn reinstating_into_a_taken_slot_conflicts() {
    let fx = EngineFixture::new().await;
    let at = utc(2025, 3, 10, 10, 0);
    let appt = fx.approved_at(at).await;
    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 900);
    fx.engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 10, 9, 0))
        .await
        .unwrap();

    // CancelRequested frees the slot.
    fx.engine
        .book(&fx.other_patient, fx.booking_request(at.date_naive(), at.time()), at - Duration::days(1))
        .await
        .unwrap();

    let err = fx
        .engine
        .resolve_cancel_request(&fx.doctor, appt.id, false, None, utc(2025, 3, 10, 9, 5))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::SlotConflict);
    assert_eq!(fx.reload(appt.id).await.status, AppointmentStatus::CancelRequested);
}

// ==============================================================================
// REMINDERS & NO-SHOWS (engine level)
// ==============================================================================

#[tokio::test]
async fn reminder_outcomes() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let outcome = fx
        .engine
        .send_reminder(appt.id, ReminderKind::FifteenMinutes, utc(2025, 3, 10, 9, 30))
        .await
        .unwrap();
    assert_eq!(outcome, ReminderOutcome::NotDue);

    let outcome = fx
        .engine
        .send_reminder(appt.id, ReminderKind::OneHour, utc(2025, 3, 10, 9, 30))
        .await
        .unwrap();
    assert_eq!(outcome, ReminderOutcome::Sent);

    let outcome = fx
        .engine
        .send_reminder(appt.id, ReminderKind::OneHour, utc(2025, 3, 10, 9, 31))
        .await
        .unwrap();
    assert_eq!(outcome, ReminderOutcome::AlreadySent);

    let reminder = fx.sink.sent().pop().unwrap();
    assert_eq!(reminder.kind, NotificationKind::ReminderOneHour);
    assert_eq!(reminder.params.minutes_before, Some(30));
    assert!(reminder.params.cancel_url.is_some());
}

#[tokio::test]
async fn expire_no_show_waits_for_grace() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let err = fx
        .engine
        .expire_no_show(appt.id, utc(2025, 3, 10, 10, 14))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::IllegalTransition { event: LifecycleEvent::ExpireNoShow, .. });

    let expired = fx.engine.expire_no_show(appt.id, utc(2025, 3, 10, 10, 15)).await.unwrap();
    assert_eq!(expired.status, AppointmentStatus::Cancelled);
    assert_eq!(expired.cancelled_by, Some(CancelledBy::System));
    assert_eq!(expired.cancellation_reason.as_deref(), Some(NO_SHOW_NOTE));
    assert!(fx
        .sink
        .sent()
        .iter()
        .filter(|m| m.kind == NotificationKind::GeoCancellationDoctor)
        .all(|m| m.params.distance_meters.is_none()));
}

// ==============================================================================
// QUERIES & TAGGED COMMANDS
// ==============================================================================

#[tokio::test]
async fn listing_is_scoped_by_role() {
    let fx = EngineFixture::new().await;
    let a = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    let b = fx
        .engine
        .book(&fx.other_patient, fx.booking_request(date(2025, 3, 10), time(11, 0)), utc(2025, 3, 8, 9, 0))
        .await
        .unwrap();

    let mine = fx.engine.list_appointments(&fx.patient, None).await.unwrap();
    assert_eq!(mine.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id]);

    let doctors = fx.engine.list_appointments(&fx.doctor, None).await.unwrap();
    assert_eq!(doctors.len(), 2);

    let pending = fx
        .engine
        .list_appointments(&fx.doctor, Some(AppointmentStatus::PendingReview))
        .await
        .unwrap();
    assert_eq!(pending.iter().map(|x| x.id).collect::<Vec<_>>(), vec![b.id]);

    assert!(fx.engine.list_appointments(&fx.other_doctor, None).await.unwrap().is_empty());

    let err = fx.engine.get_appointment(&fx.other_patient, a.id).await.unwrap_err();
    assert_matches!(err, AppointmentError::NotAuthorizedForAppointment);
}

#[tokio::test]
async fn geo_status_reports_hospital_and_evidence() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let before = fx.engine.geo_status(&fx.patient, appt.id).await.unwrap();
    assert!(!before.geo_verified);
    assert!(before.patient_location.is_none());
    assert_eq!(before.hospital_location.latitude, HOSPITAL_LAT);
    assert_eq!(before.max_distance_meters, 500);

    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 50);
    fx.engine
        .check_in(&fx.patient, appt.id, lat, lon, utc(2025, 3, 10, 9, 30))
        .await
        .unwrap();

    let after = fx.engine.geo_status(&fx.doctor, appt.id).await.unwrap();
    assert!(after.geo_verified);
    assert_eq!(after.distance_meters, Some(50));
    assert_eq!(after.patient_location.map(|c| c.latitude), Some(lat));
}

#[tokio::test]
async fn execute_dispatches_tagged_commands() {
    let fx = EngineFixture::new().await;
    let appt = fx.book_at(utc(2025, 3, 10, 10, 0)).await;

    let outcome = fx
        .engine
        .execute(
            AppointmentCommand::Approve { actor: fx.doctor, appointment_id: appt.id, doctor_notes: None },
            utc(2025, 3, 9, 9, 0),
        )
        .await
        .unwrap();
    assert_matches!(outcome, CommandOutcome::Appointment(ref a) if a.status == AppointmentStatus::Approved);

    let outcome = fx
        .engine
        .execute(
            AppointmentCommand::CancelByParty {
                authority: CancelAuthority::Party(fx.patient),
                appointment_id: appt.id,
                reason: None,
            },
            utc(2025, 3, 9, 10, 0),
        )
        .await
        .unwrap();
    assert_matches!(outcome, CommandOutcome::Appointment(ref a) if a.status == AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn store_outage_surfaces_and_sends_nothing() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    fx.sink.clear();
    fx.store.set_unavailable(true);

    let err = fx
        .engine
        .cancel_by_party(&fx.patient, appt.id, None, utc(2025, 3, 9, 9, 0))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::StoreUnavailable(_));
    assert!(fx.sink.sent().is_empty());

    fx.store.set_unavailable(false);
    assert_eq!(fx.reload(appt.id).await.status, AppointmentStatus::Approved);
}
