// libs/appointment-cell/src/services/notifications.rs
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::CancelledBy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AppointmentRequested,
    AppointmentApproved,
    AppointmentRejected,
    ReminderOneHour,
    ReminderFifteenMinutes,
    GeoCancellationPatient,
    GeoCancellationDoctor,
    CancellationConfirmationPatient,
    CancellationNoticeDoctor,
}

impl NotificationKind {
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationKind::AppointmentRequested => "New Appointment Request",
            NotificationKind::AppointmentApproved => "Appointment Confirmed",
            NotificationKind::AppointmentRejected => "Appointment Request Update",
            NotificationKind::ReminderOneHour => "Reminder: Your Appointment is in 1 Hour",
            NotificationKind::ReminderFifteenMinutes => "Reminder: Your Appointment is in 15 Minutes",
            NotificationKind::GeoCancellationPatient => "Appointment Cancelled: Location Check Failed",
            NotificationKind::GeoCancellationDoctor => "Patient Appointment Cancelled: Location Check Failed",
            NotificationKind::CancellationConfirmationPatient => "Appointment Cancellation Confirmed",
            NotificationKind::CancellationNoticeDoctor => "Appointment Cancelled",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

/// Template parameters. Every kind uses a subset; unused fields stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotificationParams {
    pub appointment_id: Uuid,
    pub patient_name: String,
    pub doctor_name: String,
    pub hospital_name: Option<String>,
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<NaiveTime>,
    pub reason: Option<String>,
    pub doctor_notes: Option<String>,
    pub cancellation_token: Option<String>,
    pub cancel_url: Option<String>,
    pub distance_meters: Option<u64>,
    pub max_distance_meters: Option<u32>,
    pub minutes_before: Option<i64>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationIntent {
    pub kind: NotificationKind,
    pub recipient: Recipient,
    pub params: NotificationParams,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotificationError {
    #[error("Email transport failed: {0}")]
    Transport(String),
}

/// Outbound email channel. Failures are reported, never retried here.
#[async_trait]
pub trait EmailSink: Send + Sync {
    async fn dispatch(
        &self,
        kind: NotificationKind,
        recipient: &Recipient,
        params: &NotificationParams,
    ) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Deliver before the command returns.
    Inline,
    /// Hand delivery to a spawned task.
    Detached,
}

/// Fans committed intents out to the sink. A failed send is logged and
/// dropped; it never reaches the caller of the command.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Arc<dyn EmailSink>,
    mode: DispatchMode,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn EmailSink>, mode: DispatchMode) -> Self {
        Self { sink, mode }
    }

    pub fn inline(sink: Arc<dyn EmailSink>) -> Self {
        Self::new(sink, DispatchMode::Inline)
    }

    pub fn detached(sink: Arc<dyn EmailSink>) -> Self {
        Self::new(sink, DispatchMode::Detached)
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub async fn dispatch_all(&self, intents: Vec<NotificationIntent>) {
        if intents.is_empty() {
            return;
        }
        match self.mode {
            DispatchMode::Inline => deliver(self.sink.clone(), intents).await,
            DispatchMode::Detached => {
                let sink = self.sink.clone();
                tokio::spawn(deliver(sink, intents));
            }
        }
    }
}

async fn deliver(sink: Arc<dyn EmailSink>, intents: Vec<NotificationIntent>) {
    for intent in intents {
        match sink.dispatch(intent.kind, &intent.recipient, &intent.params).await {
            Ok(()) => debug!(
                "Sent {} for appointment {} to {}",
                intent.kind, intent.params.appointment_id, intent.recipient.email
            ),
            Err(e) => warn!(
                "Failed to send {} for appointment {}: {}",
                intent.kind, intent.params.appointment_id, e
            ),
        }
    }
}
