// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::geo::{Coordinates, GeoError};
use crate::services::store::StoreError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub hospital_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    /// `appointment_date` + `appointment_time` resolved in the booking timezone.
    pub scheduled_at: DateTime<Utc>,
    pub reason: String,
    pub patient_notes: Option<String>,
    pub doctor_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub status: AppointmentStatus,
    pub cancellation_token: Option<String>,
    pub patient_lat: Option<f64>,
    pub patient_lon: Option<f64>,
    pub geo_check_at: Option<DateTime<Utc>>,
    pub distance_meters: Option<u64>,
    pub geo_verified: bool,
    pub reminder_one_hour_sent: bool,
    pub reminder_fifteen_min_sent: bool,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn slot(&self) -> SlotKey {
        SlotKey {
            doctor_id: self.doctor_id,
            date: self.appointment_date,
            time: self.appointment_time,
        }
    }

    /// Whole minutes between `now` and the appointment instant (negative once it has passed).
    pub fn minutes_until(&self, now: DateTime<Utc>) -> i64 {
        (self.scheduled_at - now).num_minutes()
    }

    pub fn reminder_sent(&self, kind: ReminderKind) -> bool {
        match kind {
            ReminderKind::OneHour => self.reminder_one_hour_sent,
            ReminderKind::FifteenMinutes => self.reminder_fifteen_min_sent,
        }
    }

    pub fn mark_reminder_sent(&mut self, kind: ReminderKind) {
        match kind {
            ReminderKind::OneHour => self.reminder_one_hour_sent = true,
            ReminderKind::FifteenMinutes => self.reminder_fifteen_min_sent = true,
        }
    }

    pub fn patient_location(&self) -> Option<Coordinates> {
        match (self.patient_lat, self.patient_lon) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        }
    }
}

/// The (doctor, date, time) tuple that at most one active appointment may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingReview,
    Approved,
    Rejected,
    CancelRequested,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub const ACTIVE: [AppointmentStatus; 2] =
        [AppointmentStatus::PendingReview, AppointmentStatus::Approved];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Rejected | AppointmentStatus::Cancelled | AppointmentStatus::Completed
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::PendingReview => write!(f, "pending_review"),
            AppointmentStatus::Approved => write!(f, "approved"),
            AppointmentStatus::Rejected => write!(f, "rejected"),
            AppointmentStatus::CancelRequested => write!(f, "cancel_requested"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Patient,
    Doctor,
    PublicLink,
    System,
}

impl fmt::Display for CancelledBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelledBy::Patient => write!(f, "Patient"),
            CancelledBy::Doctor => write!(f, "Doctor"),
            CancelledBy::PublicLink => write!(f, "Patient (via email)"),
            CancelledBy::System => write!(f, "System"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    OneHour,
    FifteenMinutes,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 2] = [ReminderKind::OneHour, ReminderKind::FifteenMinutes];
}

// ==============================================================================
// ACTORS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Patient,
    Doctor,
    Admin,
}

/// Pre-authenticated caller of an engine command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn patient(user_id: Uuid) -> Self {
        Self { user_id, role: ActorRole::Patient }
    }

    pub fn doctor(user_id: Uuid) -> Self {
        Self { user_id, role: ActorRole::Doctor }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self { user_id, role: ActorRole::Admin }
    }
}

// ==============================================================================
// DIRECTORY MODELS (read-only catalog)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorProfile {
    pub id: Uuid,
    /// Account that signs in as this doctor.
    pub user_id: Uuid,
    pub hospital_id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hospital {
    pub id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

impl Hospital {
    pub fn coordinates(&self) -> Result<Coordinates, GeoError> {
        Coordinates::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientContact {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

fn default_true() -> bool {
    true
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub hospital_id: Uuid,
    /// `YYYY-MM-DD`
    pub appointment_date: String,
    /// `HH:MM`
    pub appointment_time: String,
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorDecisionRequest {
    pub doctor_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicCancelRequest {
    pub token: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoCheckInRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveCancelRequest {
    pub confirm: bool,
    pub doctor_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentListQuery {
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GeoCheckInOutcome {
    Verified {
        distance_meters: u64,
        max_distance_meters: u32,
    },
    Rejected {
        distance_meters: u64,
        max_distance_meters: u32,
    },
}

impl GeoCheckInOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, GeoCheckInOutcome::Verified { .. })
    }

    pub fn distance_meters(&self) -> u64 {
        match self {
            GeoCheckInOutcome::Verified { distance_meters, .. }
            | GeoCheckInOutcome::Rejected { distance_meters, .. } => *distance_meters,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderOutcome {
    Sent,
    AlreadySent,
    NotDue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HospitalLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoStatus {
    pub appointment_id: Uuid,
    pub geo_verified: bool,
    pub geo_check_at: Option<DateTime<Utc>>,
    pub distance_meters: Option<u64>,
    pub patient_location: Option<Coordinates>,
    pub hospital_location: HospitalLocation,
    pub max_distance_meters: u32,
}

/// What an unauthenticated public-link caller gets back after cancelling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicCancellationSummary {
    pub id: Uuid,
    pub status: AppointmentStatus,
    pub patient_name: String,
    pub doctor_name: String,
    pub hospital_name: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
}

// ==============================================================================
// COMMANDS
// ==============================================================================

/// How a cancellation request proves it may act on the appointment.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelAuthority {
    Party(Actor),
    Token(String),
}

/// Every mutation the engine accepts, one variant per transition.
#[derive(Debug, Clone)]
pub enum AppointmentCommand {
    Book {
        actor: Actor,
        request: BookAppointmentRequest,
    },
    Approve {
        actor: Actor,
        appointment_id: Uuid,
        doctor_notes: Option<String>,
    },
    Reject {
        actor: Actor,
        appointment_id: Uuid,
        doctor_notes: Option<String>,
    },
    CancelByParty {
        authority: CancelAuthority,
        appointment_id: Uuid,
        reason: Option<String>,
    },
    CheckIn {
        actor: Actor,
        appointment_id: Uuid,
        latitude: f64,
        longitude: f64,
    },
    Complete {
        actor: Actor,
        appointment_id: Uuid,
    },
    ResolveCancelRequest {
        actor: Actor,
        appointment_id: Uuid,
        confirm: bool,
        doctor_notes: Option<String>,
    },
    SendReminder {
        appointment_id: Uuid,
        kind: ReminderKind,
    },
    ExpireNoShow {
        appointment_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Appointment(Appointment),
    CheckIn {
        appointment: Appointment,
        outcome: GeoCheckInOutcome,
    },
    Reminder(ReminderOutcome),
}

/// Named edges of the appointment state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Approve,
    Reject,
    CancelByParty,
    CheckIn,
    GeoCheckFailed,
    ExpireNoShow,
    Complete,
    ConfirmCancelRequest,
    DismissCancelRequest,
    SendReminder,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 10] = [
        LifecycleEvent::Approve,
        LifecycleEvent::Reject,
        LifecycleEvent::CancelByParty,
        LifecycleEvent::CheckIn,
        LifecycleEvent::GeoCheckFailed,
        LifecycleEvent::ExpireNoShow,
        LifecycleEvent::Complete,
        LifecycleEvent::ConfirmCancelRequest,
        LifecycleEvent::DismissCancelRequest,
        LifecycleEvent::SendReminder,
    ];
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Approve => "approve",
            LifecycleEvent::Reject => "reject",
            LifecycleEvent::CancelByParty => "cancel",
            LifecycleEvent::CheckIn => "check in",
            LifecycleEvent::GeoCheckFailed => "fail geo check-in for",
            LifecycleEvent::ExpireNoShow => "expire",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::ConfirmCancelRequest => "confirm cancellation of",
            LifecycleEvent::DismissCancelRequest => "reinstate",
            LifecycleEvent::SendReminder => "remind about",
        };
        write!(f, "{}", name)
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Appointment,
    Doctor,
    Hospital,
    Patient,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Appointment => write!(f, "Appointment"),
            EntityKind::Doctor => write!(f, "Doctor"),
            EntityKind::Hospital => write!(f, "Hospital"),
            EntityKind::Patient => write!(f, "Patient"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Validation error: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("Appointment slot is already booked")]
    SlotConflict,

    #[error("Cannot {event} an appointment that is {from}: {detail}")]
    IllegalTransition {
        from: AppointmentStatus,
        event: LifecycleEvent,
        detail: String,
    },

    #[error("Not authorized for this appointment")]
    NotAuthorizedForAppointment,

    #[error("Cannot cancel {minutes_remaining} minutes before the appointment (minimum {required_minutes})")]
    TooLateToCancel {
        minutes_remaining: i64,
        required_minutes: i64,
    },

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Appointment was modified concurrently")]
    ConcurrentModification,

    #[error("{0} not found")]
    NotFound(EntityKind),

    #[error("Appointment store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AppointmentError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppointmentError::Validation(vec![FieldViolation::new(field, message)])
    }

    pub fn illegal(from: AppointmentStatus, event: LifecycleEvent, detail: impl Into<String>) -> Self {
        AppointmentError::IllegalTransition {
            from,
            event,
            detail: detail.into(),
        }
    }
}

impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SlotConflict => AppointmentError::SlotConflict,
            StoreError::ConcurrentModification { .. } | StoreError::DuplicateToken => {
                AppointmentError::ConcurrentModification
            }
            StoreError::NotFound(_) => AppointmentError::NotFound(EntityKind::Appointment),
            StoreError::Unavailable(msg) => AppointmentError::StoreUnavailable(msg),
        }
    }
}

impl From<GeoError> for AppointmentError {
    fn from(err: GeoError) -> Self {
        AppointmentError::InvalidCoordinate(err.to_string())
    }
}
