// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{debug, warn};

use shared_config::LifecycleConfig;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, LifecycleEvent, ReminderKind};

/// Pure transition rules and time guards. Holds no I/O.
#[derive(Debug, Clone)]
pub struct AppointmentLifecycleService {
    rules: LifecycleConfig,
}

impl AppointmentLifecycleService {
    pub fn new(rules: LifecycleConfig) -> Self {
        Self { rules: rules.clamped() }
    }

    pub fn rules(&self) -> &LifecycleConfig {
        &self.rules
    }

    /// Resolve the status an event leads to, or reject it for the current status.
    pub fn next_status(
        &self,
        current_status: AppointmentStatus,
        event: LifecycleEvent,
    ) -> Result<AppointmentStatus, AppointmentError> {
        match transition(current_status, event) {
            Some(status) => {
                debug!("Transition {:?} --{:?}--> {:?}", current_status, event, status);
                Ok(status)
            }
            None => {
                warn!("Rejected transition: {:?} on {:?}", event, current_status);
                Err(AppointmentError::illegal(
                    current_status,
                    event,
                    "not allowed from this status",
                ))
            }
        }
    }

    /// Get all statuses reachable in one step from `current_status`.
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        let mut targets = Vec::new();
        for event in LifecycleEvent::ALL {
            if let Some(next) = transition(current_status, event) {
                if next != current_status && !targets.contains(&next) {
                    targets.push(next);
                }
            }
        }
        targets
    }

    /// The instant a local date and time refer to in the booking timezone.
    pub fn appointment_instant(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        resolve_instant(self.rules.booking_timezone, date, time)
    }

    /// Today's calendar date in the booking timezone.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.rules.booking_timezone).date_naive()
    }

    /// Party cancellations need at least the configured lead time left.
    pub fn check_cancel_lead_time(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        let required = self.rules.min_cancel_lead_minutes;
        if appointment.scheduled_at < now + Duration::minutes(required) {
            return Err(AppointmentError::TooLateToCancel {
                minutes_remaining: appointment.minutes_until(now),
                required_minutes: required,
            });
        }
        Ok(())
    }

    pub fn is_no_show_due(&self, appointment: &Appointment, now: DateTime<Utc>) -> bool {
        appointment.status == AppointmentStatus::Approved
            && !appointment.geo_verified
            && now >= appointment.scheduled_at + Duration::minutes(self.rules.no_show_grace_minutes)
    }

    /// Reminder window for `kind`: `(now, now + window]`.
    pub fn is_reminder_due(&self, appointment: &Appointment, kind: ReminderKind, now: DateTime<Utc>) -> bool {
        let window = Duration::minutes(self.reminder_window_minutes(kind));
        appointment.status == AppointmentStatus::Approved
            && !appointment.reminder_sent(kind)
            && appointment.scheduled_at > now
            && appointment.scheduled_at <= now + window
    }

    pub fn reminder_window_minutes(&self, kind: ReminderKind) -> i64 {
        match kind {
            ReminderKind::OneHour => self.rules.reminder_one_hour_window_minutes,
            ReminderKind::FifteenMinutes => self.rules.reminder_fifteen_min_window_minutes,
        }
    }

    /// Each reminder kind paired with how far ahead of the appointment it opens.
    pub fn reminder_windows(&self) -> Vec<(ReminderKind, Duration)> {
        ReminderKind::ALL
            .iter()
            .map(|kind| (*kind, Duration::minutes(self.reminder_window_minutes(*kind))))
            .collect()
    }

    pub fn no_show_grace(&self) -> Duration {
        Duration::minutes(self.rules.no_show_grace_minutes)
    }
}

fn transition(current_status: AppointmentStatus, event: LifecycleEvent) -> Option<AppointmentStatus> {
    use AppointmentStatus::*;
    use LifecycleEvent as E;

    match (current_status, event) {
        (PendingReview, E::Approve) => Some(Approved),
        (PendingReview, E::Reject) => Some(Rejected),
        (PendingReview | Approved, E::CancelByParty) => Some(Cancelled),
        // Self-loops: allowed on Approved, no status change.
        (Approved, E::CheckIn | E::SendReminder) => Some(Approved),
        (Approved, E::GeoCheckFailed) => Some(CancelRequested),
        (Approved, E::ExpireNoShow) => Some(Cancelled),
        (Approved, E::Complete) => Some(Completed),
        (CancelRequested, E::ConfirmCancelRequest) => Some(Cancelled),
        (CancelRequested, E::DismissCancelRequest) => Some(Approved),
        _ => None,
    }
}

pub fn resolve_instant(tz: FixedOffset, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .single()
        .map(|local| local.with_timezone(&Utc))
}
