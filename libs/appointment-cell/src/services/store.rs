// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentStatus, ReminderKind};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Another active appointment holds this slot")]
    SlotConflict,

    #[error("Cancellation token already in use")]
    DuplicateToken,

    #[error("Revision mismatch: expected {expected}, found {actual}")]
    ConcurrentModification { expected: u64, actual: u64 },

    #[error("Appointment {0} not found")]
    NotFound(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentFilter {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.status.map_or(true, |status| appointment.status == status)
    }
}

/// Where a sweep stopped reading. Scans return rows ordered by instant, then id,
/// strictly after this position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScanPosition {
    pub scheduled_at: DateTime<Utc>,
    pub id: Uuid,
}

impl ScanPosition {
    pub fn of(appointment: &Appointment) -> Self {
        Self {
            scheduled_at: appointment.scheduled_at,
            id: appointment.id,
        }
    }
}

/// Durable home of appointments.
///
/// `create` and `update` must be atomic with respect to the active-slot
/// uniqueness rule, and `update` only succeeds when the caller saw the
/// latest revision.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn find_conflicting(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Insert a new appointment at revision 1.
    async fn create(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    /// Replace the stored row when its revision equals `expected_revision`; bumps the revision.
    async fn update(&self, appointment: Appointment, expected_revision: u64) -> Result<Appointment, StoreError>;

    /// Approved future rows with at least one reminder kind unsent and inside
    /// that kind's window, after `after`.
    async fn scan_due_reminders(
        &self,
        now: DateTime<Utc>,
        windows: &[(ReminderKind, Duration)],
        after: Option<ScanPosition>,
        batch_size: usize,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Approved, unverified rows dated `today` whose instant plus `grace` has passed, after `after`.
    async fn scan_due_no_shows(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
        today: NaiveDate,
        after: Option<ScanPosition>,
        batch_size: usize,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError>;
}

/// Process-local store. One write lock serialises every mutation, which makes
/// the slot check and the revision check atomic.
#[derive(Debug, Default)]
pub struct InMemoryAppointmentStore {
    rows: RwLock<HashMap<Uuid, Appointment>>,
    unavailable: AtomicBool,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            warn!("In-memory appointment store is marked unavailable");
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

fn holds_slot_of(other: &Appointment, candidate: &Appointment) -> bool {
    other.id != candidate.id && other.is_active() && other.slot() == candidate.slot()
}

fn token_taken(rows: &HashMap<Uuid, Appointment>, candidate: &Appointment) -> bool {
    match candidate.cancellation_token.as_deref() {
        Some(token) => rows
            .values()
            .any(|other| other.id != candidate.id && other.cancellation_token.as_deref() == Some(token)),
        None => false,
    }
}

fn reminder_due(appointment: &Appointment, now: DateTime<Utc>, windows: &[(ReminderKind, Duration)]) -> bool {
    appointment.scheduled_at > now
        && windows
            .iter()
            .any(|(kind, window)| !appointment.reminder_sent(*kind) && appointment.scheduled_at <= now + *window)
}

fn page(mut rows: Vec<Appointment>, after: Option<ScanPosition>, batch_size: usize) -> Vec<Appointment> {
    if let Some(after) = after {
        rows.retain(|a| ScanPosition::of(a) > after);
    }
    rows.sort_by_key(ScanPosition::of);
    rows.truncate(batch_size);
    rows
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.ensure_available()?;
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_conflicting(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Option<Appointment>, StoreError> {
        self.ensure_available()?;
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|a| {
                a.is_active()
                    && a.doctor_id == doctor_id
                    && a.appointment_date == date
                    && a.appointment_time == time
            })
            .cloned())
    }

    async fn create(&self, mut appointment: Appointment) -> Result<Appointment, StoreError> {
        self.ensure_available()?;
        let mut rows = self.rows.write().await;

        if appointment.is_active() && rows.values().any(|other| holds_slot_of(other, &appointment)) {
            debug!("Slot conflict on create for doctor {}", appointment.doctor_id);
            return Err(StoreError::SlotConflict);
        }
        if token_taken(&rows, &appointment) {
            return Err(StoreError::DuplicateToken);
        }

        appointment.revision = 1;
        rows.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn update(&self, mut appointment: Appointment, expected_revision: u64) -> Result<Appointment, StoreError> {
        self.ensure_available()?;
        let mut rows = self.rows.write().await;

        let actual = rows
            .get(&appointment.id)
            .map(|current| current.revision)
            .ok_or(StoreError::NotFound(appointment.id))?;
        if actual != expected_revision {
            debug!(
                "Stale write to appointment {}: expected revision {}, found {}",
                appointment.id, expected_revision, actual
            );
            return Err(StoreError::ConcurrentModification {
                expected: expected_revision,
                actual,
            });
        }

        if appointment.is_active() && rows.values().any(|other| holds_slot_of(other, &appointment)) {
            return Err(StoreError::SlotConflict);
        }
        if token_taken(&rows, &appointment) {
            return Err(StoreError::DuplicateToken);
        }

        appointment.revision = actual + 1;
        rows.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn scan_due_reminders(
        &self,
        now: DateTime<Utc>,
        windows: &[(ReminderKind, Duration)],
        after: Option<ScanPosition>,
        batch_size: usize,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.ensure_available()?;
        let rows = self.rows.read().await;
        let due = rows
            .values()
            .filter(|a| a.status == AppointmentStatus::Approved && reminder_due(a, now, windows))
            .cloned()
            .collect();
        Ok(page(due, after, batch_size))
    }

    async fn scan_due_no_shows(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
        today: NaiveDate,
        after: Option<ScanPosition>,
        batch_size: usize,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.ensure_available()?;
        let rows = self.rows.read().await;
        let due = rows
            .values()
            .filter(|a| {
                a.status == AppointmentStatus::Approved
                    && !a.geo_verified
                    && a.appointment_date == today
                    && now >= a.scheduled_at + grace
            })
            .cloned()
            .collect();
        Ok(page(due, after, batch_size))
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, StoreError> {
        self.ensure_available()?;
        let rows = self.rows.read().await;
        let mut matching: Vec<Appointment> = rows.values().filter(|a| filter.matches(a)).cloned().collect();
        matching.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}
