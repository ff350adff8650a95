// libs/appointment-cell/src/services/email.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::services::notifications::{
    EmailSink, NotificationError, NotificationKind, NotificationParams, Recipient,
};

/// Writes every notification to the log instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LoggingEmailSink;

#[async_trait]
impl EmailSink for LoggingEmailSink {
    async fn dispatch(
        &self,
        kind: NotificationKind,
        recipient: &Recipient,
        params: &NotificationParams,
    ) -> Result<(), NotificationError> {
        info!(
            "[email] {} -> {} <{}> (appointment {}): {}",
            kind,
            recipient.name,
            recipient.email,
            params.appointment_id,
            kind.subject()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    kind: NotificationKind,
    subject: &'static str,
    to: &'a Recipient,
    params: &'a NotificationParams,
}

/// Posts notifications as JSON to an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct HttpEmailSink {
    client: Client,
    relay_url: String,
}

impl HttpEmailSink {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            relay_url: relay_url.into(),
        }
    }
}

#[async_trait]
impl EmailSink for HttpEmailSink {
    async fn dispatch(
        &self,
        kind: NotificationKind,
        recipient: &Recipient,
        params: &NotificationParams,
    ) -> Result<(), NotificationError> {
        let message = RelayMessage {
            kind,
            subject: kind.subject(),
            to: recipient,
            params,
        };

        debug!("Posting {} to mail relay {}", kind, self.relay_url);

        let response = self
            .client
            .post(&self.relay_url)
            .header("Content-Type", "application/json")
            .json(&message)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Mail relay rejected {}: {} - {}", kind, status, body);
            return Err(NotificationError::Transport(format!("HTTP {}: {}", status, body)));
        }

        Ok(())
    }
}
