use serde::Serialize;
use uuid::Uuid;

use crate::geo::{format_distance, Candidate};
use crate::models::BookingConfirmation;
use crate::notify::{DeliverySummary, RecipientRole};

use super::state::ChatState;

/// Frames the session sends back to the chat client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    State {
        state: &'static str,
        input_enabled: bool,
    },
    Prompt {
        text: String,
    },
    Candidates {
        radius_km: f64,
        providers: Vec<CandidateView>,
    },
    AuthRequired {
        text: String,
    },
    Booked {
        booking_id: String,
        otp: String,
        pilot_name: String,
        pilot_phone: String,
        pilot_rating: f64,
        total_amount: f64,
        client_message: String,
    },
    Delivery {
        emails_sent: usize,
        client_email_sent: bool,
        pilot_email_sent: bool,
    },
    Error {
        kind: &'static str,
        text: String,
        can_expand_radius: bool,
        can_retry_location: bool,
    },
}

impl Reply {
    pub fn state(state: ChatState) -> Self {
        Reply::State {
            state: state.as_str(),
            input_enabled: state.input_enabled(),
        }
    }

    pub fn prompt(text: impl Into<String>) -> Self {
        Reply::Prompt { text: text.into() }
    }

    pub fn booked(confirmation: &BookingConfirmation) -> Self {
        Reply::Booked {
            booking_id: confirmation.booking.booking_reference.to_string(),
            otp: confirmation.booking.otp_code.to_string(),
            pilot_name: confirmation.provider.name.clone(),
            pilot_phone: confirmation.provider.phone.clone(),
            pilot_rating: confirmation.provider.rating,
            total_amount: confirmation.booking.total_amount,
            client_message: confirmation.client_message.clone(),
        }
    }

    pub fn delivery(summary: &DeliverySummary) -> Self {
        Reply::Delivery {
            emails_sent: summary.emails_sent(),
            client_email_sent: summary.email_sent_to(RecipientRole::Client),
            pilot_email_sent: summary.email_sent_to(RecipientRole::Provider),
        }
    }
}

/// What the client sees of a candidate before booking. No contact details.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateView {
    pub id: Uuid,
    pub name: String,
    pub distance_km: f64,
    pub distance: String,
    pub rating: f64,
    pub hourly_rate: f64,
    pub specializations: Vec<String>,
}

impl From<&Candidate> for CandidateView {
    fn from(candidate: &Candidate) -> Self {
        Self {
            id: candidate.provider.id,
            name: candidate.provider.full_name.clone(),
            distance_km: (candidate.distance_km * 100.0).round() / 100.0,
            distance: format_distance(candidate.distance_km),
            rating: candidate.provider.rating,
            hourly_rate: candidate.provider.hourly_rate,
            specializations: candidate.provider.specializations.clone(),
        }
    }
}
