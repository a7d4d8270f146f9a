//! Notification Dispatcher: best-effort fan-out of booking confirmations.
//!
//! Every (recipient, channel) pair is an independent job running on its own
//! task under its own timeout. The dispatcher waits for all of them and
//! aggregates outcomes into a [`DeliverySummary`]; nothing here ever fails
//! the booking.

pub mod email;
pub mod sms;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::DispatchSettings;
use crate::models::BookingConfirmation;
use crate::Result;

pub use email::EmailEndpointSender;
pub use sms::SnsSmsSender;
pub use templates::BookingDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Client,
    Provider,
}

impl RecipientRole {
    /// `type` value on the email endpoint.
    pub fn wire_type(&self) -> &'static str {
        match self {
            RecipientRole::Client => "client",
            RecipientRole::Provider => "pilot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

/// One message to one recipient over one channel. Never persisted.
#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub role: RecipientRole,
    pub channel: Channel,
    /// Email address or phone number. `None` means nothing on file.
    pub to: Option<String>,
    pub subject: String,
    /// Plain-text body, used as is for SMS.
    pub text: String,
    pub details: BookingDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub role: RecipientRole,
    pub channel: Channel,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

/// Per-job outcomes for one booking, in job order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliverySummary {
    pub reports: Vec<DeliveryReport>,
}

impl DeliverySummary {
    pub fn emails_sent(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.channel == Channel::Email && r.outcome == DeliveryOutcome::Sent)
            .count()
    }

    pub fn email_sent_to(&self, role: RecipientRole) -> bool {
        self.sent(role, Channel::Email)
    }

    pub fn sent(&self, role: RecipientRole, channel: Channel) -> bool {
        self.reports.iter().any(|r| {
            r.role == role && r.channel == channel && r.outcome == DeliveryOutcome::Sent
        })
    }

    pub fn failures(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, DeliveryOutcome::Failed(_)))
            .count()
    }
}

/// Transport for one channel.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Deliver `job` to `to`. Errors are reported, never retried here.
    async fn send(&self, to: &str, job: &NotificationJob) -> Result<()>;
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    senders: Vec<Arc<dyn NotificationSender>>,
    send_timeout: Duration,
    public_base_url: String,
}

impl NotificationDispatcher {
    pub fn new(send_timeout: Duration, public_base_url: impl Into<String>) -> Self {
        Self {
            senders: Vec::new(),
            send_timeout,
            public_base_url: public_base_url.into(),
        }
    }

    pub fn with_sender(mut self, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.push(sender);
        self
    }

    /// Email when an endpoint is configured, SMS when enabled.
    pub fn from_settings(settings: &DispatchSettings, aws: &aws_config::SdkConfig) -> Self {
        let mut dispatcher =
            Self::new(settings.send_timeout, settings.public_base_url.clone());

        match &settings.notify_endpoint_url {
            Some(url) => {
                dispatcher = dispatcher.with_sender(Arc::new(EmailEndpointSender::new(url.clone())));
            }
            None => warn!("NOTIFY_ENDPOINT_URL not set, email notifications disabled"),
        }
        if settings.sms_enabled {
            dispatcher = dispatcher.with_sender(Arc::new(SnsSmsSender::new(
                aws_sdk_sns::Client::new(aws),
            )));
        }

        dispatcher
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.senders.iter().map(|s| s.channel()).collect()
    }

    /// One job per recipient for every configured channel.
    pub fn jobs_for(&self, confirmation: &BookingConfirmation) -> Vec<NotificationJob> {
        let mut jobs = Vec::new();
        for role in [RecipientRole::Client, RecipientRole::Provider] {
            let details = BookingDetails::for_role(role, confirmation, &self.public_base_url);
            let (email, phone, text) = match role {
                RecipientRole::Client => (
                    confirmation.client.email.clone(),
                    confirmation.client.phone.clone(),
                    confirmation.client_message.clone(),
                ),
                RecipientRole::Provider => (
                    confirmation.provider.email.clone(),
                    Some(confirmation.provider.phone.clone()),
                    confirmation.provider_message.clone(),
                ),
            };

            for channel in self.channels() {
                let to = match channel {
                    Channel::Email => email.clone(),
                    Channel::Sms => phone.clone(),
                };
                jobs.push(NotificationJob {
                    role,
                    channel,
                    to: to.filter(|t| !t.trim().is_empty()),
                    subject: templates::subject(role, &confirmation.booking),
                    text: text.clone(),
                    details: details.clone(),
                });
            }
        }
        jobs
    }

    /// Send every job concurrently and wait for all outcomes.
    ///
    /// Each send is bounded by the send timeout, so the whole call is bounded
    /// by it as well.
    pub async fn dispatch(&self, confirmation: &BookingConfirmation) -> DeliverySummary {
        let jobs = self.jobs_for(confirmation);
        let reference = confirmation.booking.booking_reference;

        let mut reports: Vec<DeliveryReport> = jobs
            .iter()
            .map(|job| DeliveryReport {
                role: job.role,
                channel: job.channel,
                outcome: DeliveryOutcome::Failed("send task aborted".to_string()),
            })
            .collect();

        let mut tasks = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let Some(to) = job.to.clone() else {
                info!(
                    booking_reference = %reference,
                    role = job.role.wire_type(),
                    channel = ?job.channel,
                    "No address on file, skipping"
                );
                reports[index].outcome = DeliveryOutcome::Skipped("no address on file".to_string());
                continue;
            };
            let Some(sender) = self.sender_for(job.channel) else {
                continue;
            };
            let send_timeout = self.send_timeout;

            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(send_timeout, sender.send(&to, &job)).await {
                    Ok(Ok(())) => DeliveryOutcome::Sent,
                    Ok(Err(e)) => DeliveryOutcome::Failed(e.to_string()),
                    Err(_) => DeliveryOutcome::Failed(format!(
                        "timed out after {}s",
                        send_timeout.as_secs_f64()
                    )),
                };
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => reports[index].outcome = outcome,
                Err(e) => error!(booking_reference = %reference, error = %e, "Notification task panicked"),
            }
        }

        for report in &reports {
            match &report.outcome {
                DeliveryOutcome::Sent => info!(
                    booking_reference = %reference,
                    role = report.role.wire_type(),
                    channel = ?report.channel,
                    "Notification sent"
                ),
                DeliveryOutcome::Failed(reason) => warn!(
                    booking_reference = %reference,
                    role = report.role.wire_type(),
                    channel = ?report.channel,
                    reason = %reason,
                    "Notification failed"
                ),
                DeliveryOutcome::Skipped(_) => {}
            }
        }

        DeliverySummary { reports }
    }

    fn sender_for(&self, channel: Channel) -> Option<Arc<dyn NotificationSender>> {
        self.senders.iter().find(|s| s.channel() == channel).cloned()
    }
}
