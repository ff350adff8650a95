use std::sync::Arc;

use assert_matches::assert_matches;
use futures::future::join_all;
use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::services::directory::InMemoryDirectory;
use appointment_cell::services::notifications::NotificationKind;
use appointment_cell::services::store::{AppointmentFilter, AppointmentStore};
use appointment_cell::test_support::{offset_north, utc, EngineFixture, HOSPITAL_LAT, HOSPITAL_LON};

async fn add_patients(directory: &InMemoryDirectory, count: usize) -> Vec<Actor> {
    let mut actors = Vec::with_capacity(count);
    for i in 0..count {
        let actor = Actor::patient(Uuid::new_v4());
        directory
            .insert_patient(PatientContact {
                id: actor.user_id,
                name: format!("Patient {}", i),
                email: format!("patient{}@patients.test", i),
            })
            .await;
        actors.push(actor);
    }
    actors
}

#[tokio::test]
async fn simultaneous_bookings_for_one_slot_yield_one_winner() {
    let fx = EngineFixture::new().await;
    let at = utc(2025, 3, 10, 10, 0);
    let now = utc(2025, 3, 9, 8, 0);

    let first = fx.patient;
    let second = fx.other_patient;
    let (a, b) = tokio::join!(
        fx.engine.book(&first, fx.booking_request(at.date_naive(), at.time()), now),
        fx.engine.book(&second, fx.booking_request(at.date_naive(), at.time()), now),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_matches!(loser, AppointmentError::SlotConflict);

    let rows = fx.store.list(&AppointmentFilter::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, AppointmentStatus::PendingReview);
    assert_eq!(fx.sink.count(NotificationKind::AppointmentRequested), 1);
}

#[tokio::test]
async fn many_spawned_bookings_race_for_one_slot() {
    let fx = EngineFixture::new().await;
    let patients = add_patients(&fx.directory, 16).await;
    let at = utc(2025, 3, 11, 14, 30);
    let now = utc(2025, 3, 10, 8, 0);

    let handles = patients.into_iter().map(|patient| {
        let engine = fx.engine.clone();
        let request = fx.booking_request(at.date_naive(), at.time());
        tokio::spawn(async move { engine.book(&patient, request, now).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppointmentError::SlotConflict)));
    assert_eq!(fx.store.len().await, 1);
}

#[tokio::test]
async fn racing_cancel_and_check_in_commit_at_most_one() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    let (lat, lon) = offset_north(HOSPITAL_LAT, HOSPITAL_LON, 30);
    let now = utc(2025, 3, 10, 9, 30);

    let (cancel, check_in) = tokio::join!(
        fx.engine.cancel_by_party(&fx.patient, appt.id, None, now),
        fx.engine.check_in(&fx.patient, appt.id, lat, lon, now),
    );

    let stored = fx.reload(appt.id).await;
    match (cancel, check_in) {
        (Ok(cancelled), Err(e)) => {
            assert_eq!(stored, cancelled);
            assert_matches!(
                e,
                AppointmentError::ConcurrentModification | AppointmentError::IllegalTransition { .. }
            );
        }
        (Err(e), Ok((verified, _))) => {
            assert_eq!(stored, verified);
            assert!(stored.geo_verified);
            assert_matches!(e, AppointmentError::ConcurrentModification);
        }
        (Ok(_), Ok(_)) => {
            // Sequential interleaving: check-in first, then a valid cancel.
            assert_eq!(stored.status, AppointmentStatus::Cancelled);
            assert!(stored.geo_verified);
            assert_eq!(stored.revision, appt.revision + 2);
        }
        (Err(a), Err(b)) => panic!("both commands failed: {a:?} / {b:?}"),
    }
}

#[tokio::test]
async fn stale_revision_is_rejected_by_the_store() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let mut first = appt.clone();
    first.doctor_notes = Some("first".to_string());
    let saved = fx.store.update(first, appt.revision).await.unwrap();
    assert_eq!(saved.revision, appt.revision + 1);

    let mut second = appt.clone();
    second.doctor_notes = Some("second".to_string());
    let err = fx.store.update(second, appt.revision).await.unwrap_err();
    assert_eq!(
        err,
        appointment_cell::services::store::StoreError::ConcurrentModification {
            expected: appt.revision,
            actual: appt.revision + 1
        }
    );
    assert_eq!(fx.reload(appt.id).await.doctor_notes.as_deref(), Some("first"));
}

#[tokio::test]
async fn concurrent_reminders_emit_once() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;
    fx.sink.clear();
    let now = utc(2025, 3, 10, 9, 10);

    let engine = Arc::clone(&fx.engine);
    let results = join_all((0..8).map(|_| engine.send_reminder(appt.id, ReminderKind::OneHour, now))).await;

    let sent = results
        .iter()
        .filter(|r| matches!(r, Ok(ReminderOutcome::Sent)))
        .count();
    assert_eq!(sent, 1);
    assert_eq!(fx.sink.count(NotificationKind::ReminderOneHour), 1);
    assert!(fx.reload(appt.id).await.reminder_one_hour_sent);
}
