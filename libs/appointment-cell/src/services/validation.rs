// libs/appointment-cell/src/services/validation.rs
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use tracing::{debug, instrument};

use shared_config::LifecycleConfig;

use crate::models::{AppointmentError, BookAppointmentRequest, FieldViolation};
use crate::services::lifecycle::resolve_instant;

const DATE_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}$";
const TIME_PATTERN: &str = r"^([0-1]?[0-9]|2[0-3]):[0-5][0-9]$";

pub const REASON_MIN_CHARS: usize = 10;
pub const REASON_MAX_CHARS: usize = 500;
pub const NOTES_MAX_CHARS: usize = 1000;

/// A booking request that passed every field and calendar rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBooking {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub scheduled_at: DateTime<Utc>,
    pub reason: String,
    pub notes: Option<String>,
}

pub struct BookingValidator {
    rules: LifecycleConfig,
    date_pattern: Option<Regex>,
    time_pattern: Option<Regex>,
}

impl BookingValidator {
    pub fn new(rules: LifecycleConfig) -> Self {
        Self {
            rules: rules.clamped(),
            date_pattern: Regex::new(DATE_PATTERN).ok(),
            time_pattern: Regex::new(TIME_PATTERN).ok(),
        }
    }

    /// Collects every violation instead of stopping at the first one.
    #[instrument(skip(self, request))]
    pub fn validate(
        &self,
        request: &BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<ValidatedBooking, AppointmentError> {
        let mut violations = Vec::new();

        let date = self.parse_date(&request.appointment_date, &mut violations);
        let time = self.parse_time(&request.appointment_time, &mut violations);

        let reason = request.reason.trim().to_string();
        let reason_chars = reason.chars().count();
        if !(REASON_MIN_CHARS..=REASON_MAX_CHARS).contains(&reason_chars) {
            violations.push(FieldViolation::new(
                "reason",
                format!(
                    "must be between {} and {} characters",
                    REASON_MIN_CHARS, REASON_MAX_CHARS
                ),
            ));
        }

        let notes = request
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if notes.as_ref().is_some_and(|n| n.chars().count() > NOTES_MAX_CHARS) {
            violations.push(FieldViolation::new(
                "notes",
                format!("must be at most {} characters", NOTES_MAX_CHARS),
            ));
        }

        if let Some(date) = date {
            self.check_calendar(date, now, &mut violations);
        }
        if let Some(time) = time {
            self.check_hours(time, &mut violations);
        }

        let scheduled_at = match (date, time) {
            (Some(date), Some(time)) => {
                let instant = resolve_instant(self.rules.booking_timezone, date, time);
                match instant {
                    Some(instant) if instant > now => Some(instant),
                    _ => {
                        violations.push(FieldViolation::new("appointment_time", "must be in the future"));
                        None
                    }
                }
            }
            _ => None,
        };

        match (date, time, scheduled_at) {
            (Some(date), Some(time), Some(scheduled_at)) if violations.is_empty() => {
                debug!("Booking request valid for {} {}", date, time);
                Ok(ValidatedBooking {
                    date,
                    time,
                    scheduled_at,
                    reason,
                    notes,
                })
            }
            _ => Err(AppointmentError::Validation(violations)),
        }
    }

    fn parse_date(&self, raw: &str, violations: &mut Vec<FieldViolation>) -> Option<NaiveDate> {
        let shaped = self.date_pattern.as_ref().map_or(true, |re| re.is_match(raw));
        match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) if shaped => Some(date),
            _ => {
                violations.push(FieldViolation::new("appointment_date", "must be a valid YYYY-MM-DD date"));
                None
            }
        }
    }

    fn parse_time(&self, raw: &str, violations: &mut Vec<FieldViolation>) -> Option<NaiveTime> {
        let shaped = self.time_pattern.as_ref().map_or(true, |re| re.is_match(raw));
        match NaiveTime::parse_from_str(raw, "%H:%M") {
            Ok(time) if shaped => Some(time),
            _ => {
                violations.push(FieldViolation::new("appointment_time", "must be a valid HH:MM time"));
                None
            }
        }
    }

    fn check_calendar(&self, date: NaiveDate, now: DateTime<Utc>, violations: &mut Vec<FieldViolation>) {
        let today = now.with_timezone(&self.rules.booking_timezone).date_naive();
        let earliest = today + Duration::days(self.rules.booking_lead_days_min);
        let latest = today + Duration::days(self.rules.booking_lead_days_max);

        if date < earliest {
            violations.push(FieldViolation::new(
                "appointment_date",
                format!("must be on or after {}", earliest),
            ));
        } else if date > latest {
            violations.push(FieldViolation::new(
                "appointment_date",
                format!("must be on or before {}", latest),
            ));
        }

        if self.rules.closed_weekdays.contains(&date.weekday()) {
            violations.push(FieldViolation::new(
                "appointment_date",
                format!("the clinic is closed on {}", date.weekday()),
            ));
        }
    }

    fn check_hours(&self, time: NaiveTime, violations: &mut Vec<FieldViolation>) {
        if time < self.rules.booking_window_start || time >= self.rules.booking_window_end {
            violations.push(FieldViolation::new(
                "appointment_time",
                format!(
                    "must be between {} and {}",
                    self.rules.booking_window_start.format("%H:%M"),
                    self.rules.booking_window_end.format("%H:%M")
                ),
            ));
        }
    }
}
