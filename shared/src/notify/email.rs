//! Email via the external send endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BookingDetails, Channel, NotificationJob, NotificationSender};
use crate::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailRequest<'a> {
    to: &'a str,
    subject: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    booking_details: &'a BookingDetails,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts `{to, subject, type, bookingDetails}` and expects `{success: true}`.
pub struct EmailEndpointSender {
    client: reqwest::Client,
    endpoint: String,
}

impl EmailEndpointSender {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl NotificationSender for EmailEndpointSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, to: &str, job: &NotificationJob) -> Result<()> {
        let payload = SendEmailRequest {
            to,
            subject: &job.subject,
            kind: job.role.wire_type(),
            booking_details: &job.details,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Failed to reach email endpoint: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Notification(format!(
                "Email endpoint returned {}",
                status
            )));
        }

        let body: SendEmailResponse = response
            .json()
            .await
            .map_err(|e| Error::Notification(format!("Unreadable email endpoint reply: {}", e)))?;

        if !body.success {
            return Err(Error::Notification(
                body.error
                    .unwrap_or_else(|| "Email endpoint reported failure".to_string()),
            ));
        }

        debug!(subject = %job.subject, "Email accepted by endpoint");
        Ok(())
    }
}
