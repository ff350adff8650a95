use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use mockall::mock;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::*;
use appointment_cell::services::email::HttpEmailSink;
use appointment_cell::services::engine::AppointmentLifecycleEngine;
use appointment_cell::services::notifications::*;
use appointment_cell::services::store::AppointmentStore;
use appointment_cell::test_support::{utc, EngineFixture, RecordingEmailSink};

mock! {
    pub Sink {}

    #[async_trait]
    impl EmailSink for Sink {
        async fn dispatch(
            &self,
            kind: NotificationKind,
            recipient: &Recipient,
            params: &NotificationParams,
        ) -> Result<(), NotificationError>;
    }
}

fn sample_params() -> NotificationParams {
    NotificationParams {
        appointment_id: Uuid::new_v4(),
        patient_name: "Selam Girma".to_string(),
        doctor_name: "Dr. Hana Bekele".to_string(),
        cancellation_token: Some("apt_abcdefghijkmnpqrstuvwx".to_string()),
        ..NotificationParams::default()
    }
}

fn patient() -> Recipient {
    Recipient {
        name: "Selam Girma".to_string(),
        email: "selam@patients.test".to_string(),
    }
}

#[tokio::test]
async fn http_sink_posts_json_to_the_relay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .and(body_partial_json(json!({
            "kind": "appointment_approved",
            "subject": "Appointment Confirmed",
            "to": { "email": "selam@patients.test" },
            "params": { "cancellation_token": "apt_abcdefghijkmnpqrstuvwx" }
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let sink = HttpEmailSink::new(format!("{}/send", server.uri()));
    sink.dispatch(NotificationKind::AppointmentApproved, &patient(), &sample_params())
        .await
        .unwrap();
}

#[tokio::test]
async fn http_sink_reports_relay_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let sink = HttpEmailSink::new(format!("{}/send", server.uri()));
    let err = sink
        .dispatch(NotificationKind::ReminderOneHour, &patient(), &sample_params())
        .await
        .unwrap_err();

    assert_matches!(err, NotificationError::Transport(ref msg) if msg.contains("503"));
}

#[tokio::test]
async fn sink_failures_do_not_fail_the_command() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let mut sink = MockSink::new();
    sink.expect_dispatch()
        .times(2)
        .returning(|_, _, _| Err(NotificationError::Transport("smtp down".to_string())));

    let engine = AppointmentLifecycleEngine::new(
        fx.store.clone() as Arc<dyn AppointmentStore>,
        fx.directory.clone(),
        NotificationDispatcher::inline(Arc::new(sink)),
        fx.config.clone(),
    );

    let cancelled = engine
        .cancel_by_party(&fx.patient, appt.id, None, utc(2025, 3, 9, 12, 0))
        .await
        .unwrap();

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(fx.reload(appt.id).await.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn rejected_commands_never_reach_the_sink() {
    let fx = EngineFixture::new().await;
    let appt = fx.approved_at(utc(2025, 3, 10, 10, 0)).await;

    let mut sink = MockSink::new();
    sink.expect_dispatch().never();

    let engine = AppointmentLifecycleEngine::new(
        fx.store.clone() as Arc<dyn AppointmentStore>,
        fx.directory.clone(),
        NotificationDispatcher::inline(Arc::new(sink)),
        fx.config.clone(),
    );

    let err = engine
        .cancel_by_party(&fx.patient, appt.id, None, utc(2025, 3, 10, 9, 55))
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::TooLateToCancel { .. });
}

#[tokio::test]
async fn recording_sink_can_be_switched_off() {
    let fx = EngineFixture::new().await;
    fx.sink.set_failing(true);

    let booked = fx.book_at(utc(2025, 3, 10, 10, 0)).await;

    assert_eq!(booked.status, AppointmentStatus::PendingReview);
    assert!(fx.sink.sent().is_empty());
}

#[tokio::test]
async fn detached_dispatch_delivers_in_the_background() {
    let sink = Arc::new(RecordingEmailSink::new());
    let dispatcher = NotificationDispatcher::detached(sink.clone());
    assert_eq!(dispatcher.mode(), DispatchMode::Detached);

    dispatcher
        .dispatch_all(vec![
            NotificationIntent {
                kind: NotificationKind::GeoCancellationPatient,
                recipient: patient(),
                params: sample_params(),
            },
            NotificationIntent {
                kind: NotificationKind::GeoCancellationDoctor,
                recipient: Recipient {
                    name: "Dr. Hana Bekele".to_string(),
                    email: "hana@clinic.test".to_string(),
                },
                params: sample_params(),
            },
        ])
        .await;

    for _ in 0..100 {
        if sink.sent().len() == 2 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(
        sink.kinds(),
        vec![NotificationKind::GeoCancellationPatient, NotificationKind::GeoCancellationDoctor]
    );
}
