// libs/appointment-cell/src/test_support.rs
//! Fixtures shared by this cell's tests and by downstream cells' tests.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_utils::test_utils::TestConfig;

use crate::models::{
    Actor, Appointment, AppointmentStatus, BookAppointmentRequest, DoctorProfile, Hospital,
    PatientContact,
};
use crate::services::directory::InMemoryDirectory;
use crate::services::engine::AppointmentLifecycleEngine;
use crate::services::geo::EARTH_RADIUS_METERS;
use crate::services::notifications::{
    EmailSink, NotificationDispatcher, NotificationError, NotificationKind, NotificationParams,
    Recipient,
};
use crate::services::store::{AppointmentStore, InMemoryAppointmentStore};

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub kind: NotificationKind,
    pub recipient: Recipient,
    pub params: NotificationParams,
}

/// Email sink that keeps everything it is given. Can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingEmailSink {
    sent: Mutex<Vec<SentEmail>>,
    failing: AtomicBool,
}

impl RecordingEmailSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent().into_iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent().iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl EmailSink for RecordingEmailSink {
    async fn dispatch(
        &self,
        kind: NotificationKind,
        recipient: &Recipient,
        params: &NotificationParams,
    ) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("relay offline".to_string()));
        }
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(SentEmail {
            kind,
            recipient: recipient.clone(),
            params: params.clone(),
        });
        Ok(())
    }
}

/// Hospital used by every fixture: Addis Ababa city centre.
pub const HOSPITAL_LAT: f64 = 9.0301;
pub const HOSPITAL_LON: f64 = 38.7402;

/// A point `meters` (plus half a meter, so flooring lands on `meters`) due north.
pub fn offset_north(lat: f64, lon: f64, meters: u64) -> (f64, f64) {
    let delta = (meters as f64 + 0.5) / EARTH_RADIUS_METERS;
    (lat + delta.to_degrees(), lon)
}

pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or_default()
}

/// Engine wired to in-memory collaborators, a seeded directory, UTC rules
/// and inline notification delivery.
pub struct EngineFixture {
    pub config: Arc<AppConfig>,
    pub store: Arc<InMemoryAppointmentStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub sink: Arc<RecordingEmailSink>,
    pub engine: Arc<AppointmentLifecycleEngine>,
    pub patient: Actor,
    pub doctor: Actor,
    pub other_patient: Actor,
    pub other_doctor: Actor,
    pub doctor_id: Uuid,
    pub other_doctor_id: Uuid,
    pub hospital_id: Uuid,
}

impl EngineFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default().to_app_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(InMemoryAppointmentStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let sink = Arc::new(RecordingEmailSink::new());

        let hospital_id = Uuid::new_v4();
        let doctor_id = Uuid::new_v4();
        let other_doctor_id = Uuid::new_v4();
        let patient = Actor::patient(Uuid::new_v4());
        let other_patient = Actor::patient(Uuid::new_v4());
        let doctor = Actor::doctor(Uuid::new_v4());
        let other_doctor = Actor::doctor(Uuid::new_v4());

        directory
            .insert_hospital(Hospital {
                id: hospital_id,
                name: "Tikur Anbessa Clinic".to_string(),
                latitude: HOSPITAL_LAT,
                longitude: HOSPITAL_LON,
                address: None,
            })
            .await;
        for (id, user, name) in [
            (doctor_id, doctor, "Dr. Hana Bekele"),
            (other_doctor_id, other_doctor, "Dr. Yonas Tesfaye"),
        ] {
            directory
                .insert_doctor(DoctorProfile {
                    id,
                    user_id: user.user_id,
                    hospital_id,
                    name: name.to_string(),
                    email: format!("{}@clinic.test", user.user_id),
                    is_active: true,
                })
                .await;
        }
        for (actor, name) in [(patient, "Selam Girma"), (other_patient, "Dawit Alemu")] {
            directory
                .insert_patient(PatientContact {
                    id: actor.user_id,
                    name: name.to_string(),
                    email: format!("{}@patients.test", actor.user_id),
                })
                .await;
        }

        let engine = Arc::new(AppointmentLifecycleEngine::new(
            store.clone() as Arc<dyn AppointmentStore>,
            directory.clone(),
            NotificationDispatcher::inline(sink.clone()),
            config.clone(),
        ));

        Self {
            config,
            store,
            directory,
            sink,
            engine,
            patient,
            doctor,
            other_patient,
            other_doctor,
            doctor_id,
            other_doctor_id,
            hospital_id,
        }
    }

    pub fn booking_request(&self, date: NaiveDate, time: NaiveTime) -> BookAppointmentRequest {
        BookAppointmentRequest {
            doctor_id: self.doctor_id,
            hospital_id: self.hospital_id,
            appointment_date: date.format("%Y-%m-%d").to_string(),
            appointment_time: time.format("%H:%M").to_string(),
            reason: "Follow-up on blood pressure".to_string(),
            notes: None,
        }
    }

    /// Books for `at` (UTC rules), the day before, and returns the new appointment.
    pub async fn book_at(&self, at: DateTime<Utc>) -> Appointment {
        let booked_on = at - Duration::days(1);
        self.engine
            .book(&self.patient, self.booking_request(at.date_naive(), at.time()), booked_on)
            .await
            .unwrap_or_else(|e| panic!("booking fixture failed: {e}"))
    }

    /// Books and approves an appointment at `at`.
    pub async fn approved_at(&self, at: DateTime<Utc>) -> Appointment {
        let booked = self.book_at(at).await;
        let approved = self
            .engine
            .approve(&self.doctor, booked.id, None, at - Duration::days(1))
            .await
            .unwrap_or_else(|e| panic!("approval fixture failed: {e}"));
        assert_eq!(approved.status, AppointmentStatus::Approved);
        approved
    }

    pub async fn reload(&self, appointment_id: Uuid) -> Appointment {
        self.store
            .find_by_id(appointment_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| panic!("appointment {appointment_id} missing"))
    }
}
