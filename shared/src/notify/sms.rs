//! SMS through SNS direct publish.

use async_trait::async_trait;
use aws_sdk_sns::types::MessageAttributeValue;
use aws_sdk_sns::Client as SnsClient;
use tracing::debug;

use super::{Channel, NotificationJob, NotificationSender};
use crate::{Error, Result};

const DEFAULT_COUNTRY_CODE: &str = "+91";

pub struct SnsSmsSender {
    client: SnsClient,
}

impl SnsSmsSender {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }
}

/// Normalise a stored phone number to E.164. Bare 10-digit numbers are
/// treated as Indian mobiles.
pub fn to_e164(raw: &str) -> Option<String> {
    let has_plus = raw.trim_start().starts_with('+');
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    match (has_plus, digits.len()) {
        (true, 8..=15) => Some(format!("+{}", digits)),
        (false, 10) => Some(format!("{}{}", DEFAULT_COUNTRY_CODE, digits)),
        (false, 12) if digits.starts_with("91") => Some(format!("+{}", digits)),
        _ => None,
    }
}

#[async_trait]
impl NotificationSender for SnsSmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, to: &str, job: &NotificationJob) -> Result<()> {
        let phone = to_e164(to)
            .ok_or_else(|| Error::Notification(format!("Unusable phone number for {}", job.role.wire_type())))?;

        let transactional = MessageAttributeValue::builder()
            .data_type("String")
            .string_value("Transactional")
            .build()
            .map_err(|e| Error::Aws(format!("Failed to build SMS attributes: {}", e)))?;

        let result = self
            .client
            .publish()
            .phone_number(&phone)
            .message(&job.text)
            .message_attributes("AWS.SNS.SMS.SMSType", transactional)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Failed to publish SMS: {}", e)))?;

        debug!(message_id = ?result.message_id(), "SMS published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_normalisation() {
        assert_eq!(to_e164("9876543210").as_deref(), Some("+919876543210"));
        assert_eq!(to_e164("+91-98765 43210").as_deref(), Some("+919876543210"));
        assert_eq!(to_e164("919876543210").as_deref(), Some("+919876543210"));
        assert_eq!(to_e164("+1 415 555 0100").as_deref(), Some("+14155550100"));
        assert_eq!(to_e164("12345"), None);
        assert_eq!(to_e164(""), None);
    }
}
