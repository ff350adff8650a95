// libs/appointment-cell/src/services/engine.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    Actor, ActorRole, Appointment, AppointmentCommand, AppointmentError, AppointmentStatus,
    BookAppointmentRequest, CancelAuthority, CancelledBy, CommandOutcome, DoctorProfile,
    EntityKind, GeoCheckInOutcome, GeoStatus, Hospital, HospitalLocation, LifecycleEvent,
    PatientContact, PublicCancellationSummary, ReminderKind, ReminderOutcome,
};
use crate::services::directory::Directory;
use crate::services::geo::{haversine_meters, Coordinates};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notifications::{
    NotificationDispatcher, NotificationIntent, NotificationKind, NotificationParams, Recipient,
};
use crate::services::store::{AppointmentFilter, AppointmentStore, ScanPosition, StoreError};
use crate::services::token::{tokens_match, TokenIssuer};
use crate::services::validation::BookingValidator;

pub const NO_SHOW_NOTE: &str = "Automatically cancelled — geo verification not completed within time limit";
const MAX_TOKEN_ATTEMPTS: usize = 3;

/// The people and place an appointment refers to, resolved for messaging.
#[derive(Debug, Clone)]
struct Parties {
    patient: PatientContact,
    doctor: DoctorProfile,
    hospital: Hospital,
}

impl Parties {
    fn patient_recipient(&self) -> Recipient {
        Recipient {
            name: self.patient.name.clone(),
            email: self.patient.email.clone(),
        }
    }

    fn doctor_recipient(&self) -> Recipient {
        Recipient {
            name: self.doctor.name.clone(),
            email: self.doctor.email.clone(),
        }
    }

    fn params(&self, appointment: &Appointment) -> NotificationParams {
        NotificationParams {
            appointment_id: appointment.id,
            patient_name: self.patient.name.clone(),
            doctor_name: self.doctor.name.clone(),
            hospital_name: Some(self.hospital.name.clone()),
            appointment_date: Some(appointment.appointment_date),
            appointment_time: Some(appointment.appointment_time),
            reason: Some(appointment.reason.clone()),
            doctor_notes: appointment.doctor_notes.clone(),
            cancelled_by: appointment.cancelled_by,
            cancellation_reason: appointment.cancellation_reason.clone(),
            ..NotificationParams::default()
        }
    }
}

/// Owns every appointment state transition.
///
/// Each command loads the row, checks authority and guards, writes the new
/// row against the revision it read, and only then hands notifications to
/// the dispatcher. A command that fails leaves nothing behind.
pub struct AppointmentLifecycleEngine {
    store: Arc<dyn AppointmentStore>,
    directory: Arc<dyn Directory>,
    notifier: NotificationDispatcher,
    lifecycle: AppointmentLifecycleService,
    validator: BookingValidator,
    tokens: TokenIssuer,
    config: Arc<AppConfig>,
}

impl AppointmentLifecycleEngine {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        directory: Arc<dyn Directory>,
        notifier: NotificationDispatcher,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            lifecycle: AppointmentLifecycleService::new(config.lifecycle.clone()),
            validator: BookingValidator::new(config.lifecycle.clone()),
            tokens: TokenIssuer::new(),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &AppointmentLifecycleService {
        &self.lifecycle
    }

    /// Today's date in the booking timezone.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.lifecycle.local_date(now)
    }

    pub async fn execute(
        &self,
        command: AppointmentCommand,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, AppointmentError> {
        let outcome = match command {
            AppointmentCommand::Book { actor, request } => {
                CommandOutcome::Appointment(self.book(&actor, request, now).await?)
            }
            AppointmentCommand::Approve { actor, appointment_id, doctor_notes } => {
                CommandOutcome::Appointment(self.approve(&actor, appointment_id, doctor_notes, now).await?)
            }
            AppointmentCommand::Reject { actor, appointment_id, doctor_notes } => {
                CommandOutcome::Appointment(self.reject(&actor, appointment_id, doctor_notes, now).await?)
            }
            AppointmentCommand::CancelByParty { authority, appointment_id, reason } => {
                let cancelled = match authority {
                    CancelAuthority::Party(actor) => self.cancel_by_party(&actor, appointment_id, reason, now).await?,
                    CancelAuthority::Token(token) => self.cancel_with_token(appointment_id, &token, reason, now).await?,
                };
                CommandOutcome::Appointment(cancelled)
            }
            AppointmentCommand::CheckIn { actor, appointment_id, latitude, longitude } => {
                let (appointment, outcome) = self.check_in(&actor, appointment_id, latitude, longitude, now).await?;
                CommandOutcome::CheckIn { appointment, outcome }
            }
            AppointmentCommand::Complete { actor, appointment_id } => {
                CommandOutcome::Appointment(self.complete(&actor, appointment_id, now).await?)
            }
            AppointmentCommand::ResolveCancelRequest { actor, appointment_id, confirm, doctor_notes } => {
                CommandOutcome::Appointment(
                    self.resolve_cancel_request(&actor, appointment_id, confirm, doctor_notes, now)
                        .await?,
                )
            }
            AppointmentCommand::SendReminder { appointment_id, kind } => {
                CommandOutcome::Reminder(self.send_reminder(appointment_id, kind, now).await?)
            }
            AppointmentCommand::ExpireNoShow { appointment_id } => {
                CommandOutcome::Appointment(self.expire_no_show(appointment_id, now).await?)
            }
        };
        Ok(outcome)
    }

    // ==========================================================================
    // COMMANDS
    // ==========================================================================

    #[instrument(skip(self, request), fields(patient_id = %actor.user_id))]
    pub async fn book(
        &self,
        actor: &Actor,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        if actor.role != ActorRole::Patient {
            return Err(AppointmentError::NotAuthorizedForAppointment);
        }

        let booking = self.validator.validate(&request, now)?;

        let doctor = self
            .directory
            .doctor(request.doctor_id)
            .await?
            .filter(|d| d.is_active)
            .ok_or(AppointmentError::NotFound(EntityKind::Doctor))?;
        if doctor.hospital_id != request.hospital_id {
            return Err(AppointmentError::validation(
                "hospital_id",
                "doctor does not practise at this hospital",
            ));
        }
        let hospital = self
            .directory
            .hospital(request.hospital_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Hospital))?;
        let patient = self
            .directory
            .patient(actor.user_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Patient))?;

        if self
            .store
            .find_conflicting(doctor.id, booking.date, booking.time)
            .await?
            .is_some()
        {
            debug!("Slot {} {} already taken for doctor {}", booking.date, booking.time, doctor.id);
            return Err(AppointmentError::SlotConflict);
        }

        let mut attempt = 1;
        let created = loop {
            let appointment = Appointment {
                id: Uuid::new_v4(),
                patient_id: actor.user_id,
                doctor_id: doctor.id,
                hospital_id: hospital.id,
                appointment_date: booking.date,
                appointment_time: booking.time,
                scheduled_at: booking.scheduled_at,
                reason: booking.reason.clone(),
                patient_notes: booking.notes.clone(),
                doctor_notes: None,
                cancellation_reason: None,
                cancelled_by: None,
                status: AppointmentStatus::PendingReview,
                cancellation_token: Some(self.tokens.issue()),
                patient_lat: None,
                patient_lon: None,
                geo_check_at: None,
                distance_meters: None,
                geo_verified: false,
                reminder_one_hour_sent: false,
                reminder_fifteen_min_sent: false,
                revision: 0,
                created_at: now,
                updated_at: now,
            };

            match self.store.create(appointment).await {
                Ok(created) => break created,
                Err(StoreError::DuplicateToken) if attempt < MAX_TOKEN_ATTEMPTS => {
                    warn!("Cancellation token collision, reissuing (attempt {})", attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let parties = Parties { patient, doctor, hospital };
        let intents = vec![NotificationIntent {
            kind: NotificationKind::AppointmentRequested,
            recipient: parties.doctor_recipient(),
            params: parties.params(&created),
        }];
        self.notifier.dispatch_all(intents).await;

        info!(
            "Appointment {} booked for {} {} with doctor {}",
            created.id, created.appointment_date, created.appointment_time, created.doctor_id
        );
        Ok(created)
    }

    #[instrument(skip(self, doctor_notes))]
    pub async fn approve(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        doctor_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;
        self.require_owning_doctor(actor, &current).await?;

        if current.status == AppointmentStatus::Approved {
            debug!("Appointment {} already approved", appointment_id);
            return Ok(current);
        }

        let mut next = current.clone();
        next.status = self.lifecycle.next_status(current.status, LifecycleEvent::Approve)?;
        if doctor_notes.is_some() {
            next.doctor_notes = doctor_notes;
        }
        if next.cancellation_token.is_none() {
            next.cancellation_token = Some(self.tokens.issue());
        }
        next.updated_at = now;

        let parties = self.parties(&next).await?;
        let intents = vec![self.approval_intent(&parties, &next)];

        let saved = self.commit(&current, next, intents).await?;
        info!("Appointment {} approved", saved.id);
        Ok(saved)
    }

    #[instrument(skip(self, doctor_notes))]
    pub async fn reject(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        doctor_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;
        self.require_owning_doctor(actor, &current).await?;

        let mut next = current.clone();
        next.status = self.lifecycle.next_status(current.status, LifecycleEvent::Reject)?;
        if doctor_notes.is_some() {
            next.doctor_notes = doctor_notes;
        }
        next.updated_at = now;

        let parties = self.parties(&next).await?;
        let intents = vec![NotificationIntent {
            kind: NotificationKind::AppointmentRejected,
            recipient: parties.patient_recipient(),
            params: parties.params(&next),
        }];

        let saved = self.commit(&current, next, intents).await?;
        info!("Appointment {} rejected", saved.id);
        Ok(saved)
    }

    /// Cancellation by the owning patient or doctor.
    #[instrument(skip(self, reason))]
    pub async fn cancel_by_party(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;

        let cancelled_by = match actor.role {
            ActorRole::Patient if current.patient_id == actor.user_id => CancelledBy::Patient,
            ActorRole::Doctor => {
                self.require_owning_doctor(actor, &current).await?;
                CancelledBy::Doctor
            }
            _ => return Err(AppointmentError::NotAuthorizedForAppointment),
        };

        let status = self.lifecycle.next_status(current.status, LifecycleEvent::CancelByParty)?;
        if current.status == AppointmentStatus::Approved {
            self.lifecycle.check_cancel_lead_time(&current, now)?;
        }

        let default_reason = match cancelled_by {
            CancelledBy::Doctor => "Cancelled by doctor",
            _ => "Cancelled by patient",
        };
        let next = current.clone();
        self.finish_cancellation(&current, next, status, cancelled_by, reason, default_reason, now)
            .await
    }

    /// Cancellation through the emailed public link; the token is the only credential.
    #[instrument(skip(self, token, reason))]
    pub async fn cancel_with_token(
        &self,
        appointment_id: Uuid,
        token: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;

        let authorized = current
            .cancellation_token
            .as_deref()
            .is_some_and(|expected| tokens_match(expected, token));
        if !authorized {
            warn!("Public cancel for appointment {} presented a bad token", appointment_id);
            return Err(AppointmentError::NotAuthorizedForAppointment);
        }

        let status = self.lifecycle.next_status(current.status, LifecycleEvent::CancelByParty)?;
        self.lifecycle.check_cancel_lead_time(&current, now)?;

        let next = current.clone();
        self.finish_cancellation(
            &current,
            next,
            status,
            CancelledBy::PublicLink,
            reason,
            "Cancelled via email link",
            now,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn check_in(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        latitude: f64,
        longitude: f64,
        now: DateTime<Utc>,
    ) -> Result<(Appointment, GeoCheckInOutcome), AppointmentError> {
        let patient_position = Coordinates::new(latitude, longitude)?;

        let current = self.load(appointment_id).await?;
        if actor.role != ActorRole::Patient || current.patient_id != actor.user_id {
            return Err(AppointmentError::NotAuthorizedForAppointment);
        }

        self.lifecycle.next_status(current.status, LifecycleEvent::CheckIn)?;
        if current.geo_verified {
            return Err(AppointmentError::illegal(
                current.status,
                LifecycleEvent::CheckIn,
                "location already verified",
            ));
        }
        if current.appointment_date != self.today(now) {
            return Err(AppointmentError::validation(
                "appointment_date",
                "check-in is only possible on the day of the appointment",
            ));
        }

        let parties = self.parties(&current).await?;
        let distance = haversine_meters(patient_position, parties.hospital.coordinates()?);
        let max_distance = self.config.lifecycle.max_distance_meters;

        let mut next = current.clone();
        next.patient_lat = Some(latitude);
        next.patient_lon = Some(longitude);
        next.geo_check_at = Some(now);
        next.distance_meters = Some(distance);
        next.updated_at = now;

        if distance <= u64::from(max_distance) {
            next.geo_verified = true;
            let saved = self.commit(&current, next, Vec::new()).await?;
            info!("Appointment {} geo-verified at {}m", saved.id, distance);
            return Ok((
                saved,
                GeoCheckInOutcome::Verified {
                    distance_meters: distance,
                    max_distance_meters: max_distance,
                },
            ));
        }

        next.status = self.lifecycle.next_status(current.status, LifecycleEvent::GeoCheckFailed)?;
        let intents = self.geo_cancellation_intents(&parties, &next, Some(distance));
        let saved = self.commit(&current, next, intents).await?;

        warn!(
            "Appointment {} check-in {}m from hospital (max {}m), cancellation requested",
            saved.id, distance, max_distance
        );
        Ok((
            saved,
            GeoCheckInOutcome::Rejected {
                distance_meters: distance,
                max_distance_meters: max_distance,
            },
        ))
    }

    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;
        self.require_owning_doctor(actor, &current).await?;

        let status = self.lifecycle.next_status(current.status, LifecycleEvent::Complete)?;
        if !current.geo_verified {
            return Err(AppointmentError::illegal(
                current.status,
                LifecycleEvent::Complete,
                "patient location has not been verified",
            ));
        }

        let mut next = current.clone();
        next.status = status;
        next.updated_at = now;

        let saved = self.commit(&current, next, Vec::new()).await?;
        info!("Appointment {} completed", saved.id);
        Ok(saved)
    }

    /// Doctor's answer to a failed check-in: confirm the cancellation or reinstate.
    #[instrument(skip(self, doctor_notes))]
    pub async fn resolve_cancel_request(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        confirm: bool,
        doctor_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;
        self.require_owning_doctor(actor, &current).await?;

        let event = if confirm {
            LifecycleEvent::ConfirmCancelRequest
        } else {
            LifecycleEvent::DismissCancelRequest
        };
        let status = self.lifecycle.next_status(current.status, event)?;

        if confirm {
            let reason = doctor_notes.clone();
            let mut next = current.clone();
            if doctor_notes.is_some() {
                next.doctor_notes = doctor_notes;
            }
            return self
                .finish_cancellation(
                    &current,
                    next,
                    status,
                    CancelledBy::Doctor,
                    reason,
                    "Cancellation confirmed after failed location check",
                    now,
                )
                .await;
        }

        let mut next = current.clone();
        next.status = status;
        if doctor_notes.is_some() {
            next.doctor_notes = doctor_notes;
        }
        next.updated_at = now;

        let parties = self.parties(&next).await?;
        let intents = vec![self.approval_intent(&parties, &next)];
        let saved = self.commit(&current, next, intents).await?;
        info!("Appointment {} reinstated after cancellation request", saved.id);
        Ok(saved)
    }

    /// Sends one reminder and records it; at most once per kind per appointment.
    #[instrument(skip(self))]
    pub async fn send_reminder(
        &self,
        appointment_id: Uuid,
        kind: ReminderKind,
        now: DateTime<Utc>,
    ) -> Result<ReminderOutcome, AppointmentError> {
        let current = self.load(appointment_id).await?;

        if current.reminder_sent(kind) {
            return Ok(ReminderOutcome::AlreadySent);
        }
        if !self.lifecycle.is_reminder_due(&current, kind, now) {
            return Ok(ReminderOutcome::NotDue);
        }

        let mut next = current.clone();
        next.mark_reminder_sent(kind);
        next.updated_at = now;

        let parties = self.parties(&next).await?;
        let mut params = parties.params(&next);
        params.minutes_before = Some(next.minutes_until(now));
        self.attach_cancel_link(&next, &mut params);

        let notification_kind = match kind {
            ReminderKind::OneHour => NotificationKind::ReminderOneHour,
            ReminderKind::FifteenMinutes => NotificationKind::ReminderFifteenMinutes,
        };
        let intents = vec![NotificationIntent {
            kind: notification_kind,
            recipient: parties.patient_recipient(),
            params,
        }];

        self.commit(&current, next, intents).await?;
        info!("Sent {:?} reminder for appointment {}", kind, appointment_id);
        Ok(ReminderOutcome::Sent)
    }

    /// Cancels an approved appointment whose patient never verified their location.
    #[instrument(skip(self))]
    pub async fn expire_no_show(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.load(appointment_id).await?;

        let status = self.lifecycle.next_status(current.status, LifecycleEvent::ExpireNoShow)?;
        if !self.lifecycle.is_no_show_due(&current, now) {
            return Err(AppointmentError::illegal(
                current.status,
                LifecycleEvent::ExpireNoShow,
                "grace period has not elapsed or location is verified",
            ));
        }

        let mut next = current.clone();
        next.status = status;
        next.cancelled_by = Some(CancelledBy::System);
        next.cancellation_reason = Some(NO_SHOW_NOTE.to_string());
        next.updated_at = now;

        let parties = self.parties(&next).await?;
        let intents = self.geo_cancellation_intents(&parties, &next, None);
        let saved = self.commit(&current, next, intents).await?;

        info!("Appointment {} expired as a no-show", saved.id);
        Ok(saved)
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn get_appointment(&self, actor: &Actor, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self.load(appointment_id).await?;
        self.require_viewer(actor, &appointment).await?;
        Ok(appointment)
    }

    pub async fn list_appointments(
        &self,
        actor: &Actor,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut filter = AppointmentFilter {
            status,
            ..AppointmentFilter::default()
        };
        match actor.role {
            ActorRole::Patient => filter.patient_id = Some(actor.user_id),
            ActorRole::Doctor => {
                let doctor = self
                    .directory
                    .doctor_for_user(actor.user_id)
                    .await?
                    .ok_or(AppointmentError::NotFound(EntityKind::Doctor))?;
                filter.doctor_id = Some(doctor.id);
            }
            ActorRole::Admin => {}
        }
        Ok(self.store.list(&filter).await?)
    }

    pub async fn geo_status(&self, actor: &Actor, appointment_id: Uuid) -> Result<GeoStatus, AppointmentError> {
        let appointment = self.load(appointment_id).await?;
        self.require_viewer(actor, &appointment).await?;

        let hospital = self
            .directory
            .hospital(appointment.hospital_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Hospital))?;

        Ok(GeoStatus {
            appointment_id: appointment.id,
            geo_verified: appointment.geo_verified,
            geo_check_at: appointment.geo_check_at,
            distance_meters: appointment.distance_meters,
            patient_location: appointment.patient_location(),
            hospital_location: HospitalLocation {
                name: hospital.name,
                latitude: hospital.latitude,
                longitude: hospital.longitude,
            },
            max_distance_meters: self.config.lifecycle.max_distance_meters,
        })
    }

    pub async fn public_summary(&self, appointment: &Appointment) -> Result<PublicCancellationSummary, AppointmentError> {
        let parties = self.parties(appointment).await?;
        Ok(PublicCancellationSummary {
            id: appointment.id,
            status: appointment.status,
            patient_name: parties.patient.name,
            doctor_name: parties.doctor.name,
            hospital_name: parties.hospital.name,
            appointment_date: appointment.appointment_date,
            appointment_time: appointment.appointment_time,
        })
    }

    /// Approved appointments with a reminder due at `now`, after `after`.
    pub async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        after: Option<ScanPosition>,
        batch_size: usize,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .store
            .scan_due_reminders(now, &self.lifecycle.reminder_windows(), after, batch_size)
            .await?)
    }

    /// Approved, unverified appointments for today that are past their grace period.
    pub async fn due_no_shows(
        &self,
        now: DateTime<Utc>,
        after: Option<ScanPosition>,
        batch_size: usize,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .store
            .scan_due_no_shows(now, self.lifecycle.no_show_grace(), self.today(now), after, batch_size)
            .await?)
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn load(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .find_by_id(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Appointment))
    }

    async fn commit(
        &self,
        current: &Appointment,
        next: Appointment,
        intents: Vec<NotificationIntent>,
    ) -> Result<Appointment, AppointmentError> {
        let saved = self.store.update(next, current.revision).await?;
        debug!(
            "Appointment {} committed: {} -> {} (revision {})",
            saved.id, current.status, saved.status, saved.revision
        );
        self.notifier.dispatch_all(intents).await;
        Ok(saved)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_cancellation(
        &self,
        current: &Appointment,
        mut next: Appointment,
        status: AppointmentStatus,
        cancelled_by: CancelledBy,
        reason: Option<String>,
        default_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        next.status = status;
        next.cancelled_by = Some(cancelled_by);
        next.cancellation_reason = Some(
            reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| default_reason.to_string()),
        );
        next.updated_at = now;

        let parties = self.parties(&next).await?;
        let intents = vec![
            NotificationIntent {
                kind: NotificationKind::CancellationConfirmationPatient,
                recipient: parties.patient_recipient(),
                params: parties.params(&next),
            },
            NotificationIntent {
                kind: NotificationKind::CancellationNoticeDoctor,
                recipient: parties.doctor_recipient(),
                params: parties.params(&next),
            },
        ];

        let saved = self.commit(current, next, intents).await?;
        info!("Appointment {} cancelled by {}", saved.id, cancelled_by);
        Ok(saved)
    }

    async fn parties(&self, appointment: &Appointment) -> Result<Parties, AppointmentError> {
        let patient = self
            .directory
            .patient(appointment.patient_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Patient))?;
        let doctor = self
            .directory
            .doctor(appointment.doctor_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Doctor))?;
        let hospital = self
            .directory
            .hospital(appointment.hospital_id)
            .await?
            .ok_or(AppointmentError::NotFound(EntityKind::Hospital))?;
        Ok(Parties { patient, doctor, hospital })
    }

    async fn require_owning_doctor(&self, actor: &Actor, appointment: &Appointment) -> Result<(), AppointmentError> {
        if actor.role != ActorRole::Doctor {
            return Err(AppointmentError::NotAuthorizedForAppointment);
        }
        let owns = self
            .directory
            .doctor(appointment.doctor_id)
            .await?
            .is_some_and(|d| d.user_id == actor.user_id);
        if !owns {
            return Err(AppointmentError::NotAuthorizedForAppointment);
        }
        Ok(())
    }

    async fn require_viewer(&self, actor: &Actor, appointment: &Appointment) -> Result<(), AppointmentError> {
        match actor.role {
            ActorRole::Admin => Ok(()),
            ActorRole::Patient if appointment.patient_id == actor.user_id => Ok(()),
            ActorRole::Doctor => self.require_owning_doctor(actor, appointment).await,
            _ => Err(AppointmentError::NotAuthorizedForAppointment),
        }
    }

    fn attach_cancel_link(&self, appointment: &Appointment, params: &mut NotificationParams) {
        if let Some(token) = appointment.cancellation_token.as_deref() {
            params.cancellation_token = Some(token.to_string());
            params.cancel_url = Some(self.config.cancel_url(appointment.id, token));
        }
    }

    fn approval_intent(&self, parties: &Parties, appointment: &Appointment) -> NotificationIntent {
        let mut params = parties.params(appointment);
        self.attach_cancel_link(appointment, &mut params);
        NotificationIntent {
            kind: NotificationKind::AppointmentApproved,
            recipient: parties.patient_recipient(),
            params,
        }
    }

    fn geo_cancellation_intents(
        &self,
        parties: &Parties,
        appointment: &Appointment,
        distance_meters: Option<u64>,
    ) -> Vec<NotificationIntent> {
        let mut params = parties.params(appointment);
        params.distance_meters = distance_meters;
        params.max_distance_meters = Some(self.config.lifecycle.max_distance_meters);

        vec![
            NotificationIntent {
                kind: NotificationKind::GeoCancellationPatient,
                recipient: parties.patient_recipient(),
                params: params.clone(),
            },
            NotificationIntent {
                kind: NotificationKind::GeoCancellationDoctor,
                recipient: parties.doctor_recipient(),
                params,
            },
        ]
    }
}
