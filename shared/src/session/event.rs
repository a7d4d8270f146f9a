use serde::Deserialize;
use uuid::Uuid;

use crate::auth::validate_token;
use crate::geo::Candidate;
use crate::models::{BookingConfirmation, ClientIdentity, GeoPoint};
use crate::notify::DeliverySummary;
use crate::Result;

/// Everything that can move a session: client actions and call results.
#[derive(Debug, Clone)]
pub enum Event {
    Open,
    UserText(String),
    /// Explicit location-share trigger.
    ShareLocation,
    LocationResolved {
        point: GeoPoint,
        label: Option<String>,
    },
    LocationFailed(String),
    SelectProvider(Uuid),
    Confirm,
    Authenticated(ClientIdentity),
    ExpandRadius,
    RetryLocation,
    MatchesReady {
        radius_km: f64,
        candidates: Vec<Candidate>,
    },
    SearchFailed(String),
    Booked(Box<BookingConfirmation>),
    BookingFailed {
        kind: &'static str,
        message: String,
    },
    DeliveryReported(DeliverySummary),
    /// Unrecoverable surface failure, such as a client speaking a broken protocol.
    Abort(String),
}

impl Event {
    /// Sent by the client, as opposed to produced by an effect.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            Event::UserText(_)
                | Event::ShareLocation
                | Event::SelectProvider(_)
                | Event::Confirm
                | Event::Authenticated(_)
                | Event::ExpandRadius
                | Event::RetryLocation
        )
    }
}

/// Frames the chat client sends over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame after connecting. Asks for the greeting.
    Start,
    Message {
        text: String,
    },
    /// The share button. Coordinates may ride along when the browser
    /// already resolved them.
    ShareLocation {
        #[serde(default)]
        lat: Option<f64>,
        #[serde(default)]
        lng: Option<f64>,
        #[serde(default)]
        label: Option<String>,
    },
    Location {
        lat: f64,
        lng: f64,
        #[serde(default)]
        label: Option<String>,
    },
    LocationError {
        reason: String,
    },
    SelectProvider {
        provider_id: Uuid,
    },
    Confirm,
    ExpandRadius,
    RetryLocation,
    Authenticate {
        token: String,
    },
    /// Asks for the notification report of the booking just made. Carries
    /// no session event.
    DeliveryStatus,
}

impl ClientMessage {
    pub fn into_events(self) -> Result<Vec<Event>> {
        let events = match self {
            ClientMessage::Start => vec![Event::Open],
            ClientMessage::Message { text } => vec![Event::UserText(text)],
            ClientMessage::ShareLocation { lat, lng, label } => match (lat, lng) {
                (Some(lat), Some(lng)) => vec![
                    Event::ShareLocation,
                    Event::LocationResolved {
                        point: GeoPoint::new(lat, lng),
                        label,
                    },
                ],
                _ => vec![Event::ShareLocation],
            },
            ClientMessage::Location { lat, lng, label } => vec![Event::LocationResolved {
                point: GeoPoint::new(lat, lng),
                label,
            }],
            ClientMessage::LocationError { reason } => vec![Event::LocationFailed(reason)],
            ClientMessage::SelectProvider { provider_id } => {
                vec![Event::SelectProvider(provider_id)]
            }
            ClientMessage::Confirm => vec![Event::Confirm],
            ClientMessage::ExpandRadius => vec![Event::ExpandRadius],
            ClientMessage::RetryLocation => vec![Event::RetryLocation],
            ClientMessage::Authenticate { token } => {
                vec![Event::Authenticated(validate_token(&token)?)]
            }
            ClientMessage::DeliveryStatus => Vec::new(),
        };
        Ok(events)
    }
}
