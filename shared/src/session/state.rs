use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::geo::Candidate;
use crate::models::{BookingConfirmation, ClientIdentity, GeoPoint, ServiceRequest};
use crate::notify::DeliverySummary;

/// Why a session ended up in `ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Location denied, unsupported or never arrived. Retry goes back to `LOCATION`.
    Geolocation,
    /// Nothing within the radius. A wider radius may still be tried.
    NoMatches,
    /// The provider query itself failed or timed out.
    Search,
    /// The coordinator rejected or failed the booking.
    Booking,
    /// The surface gave up on the conversation.
    Aborted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Geolocation => "geolocation_error",
            ErrorKind::NoMatches => "match_not_found",
            ErrorKind::Search => "search_error",
            ErrorKind::Booking => "booking_error",
            ErrorKind::Aborted => "session_aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    Init,
    Requirements,
    Location,
    Searching,
    Results,
    Confirm,
    Booking,
    Success,
    Error(ErrorKind),
}

impl ChatState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatState::Init => "INIT",
            ChatState::Requirements => "REQUIREMENTS",
            ChatState::Location => "LOCATION",
            ChatState::Searching => "SEARCHING",
            ChatState::Results => "RESULTS",
            ChatState::Confirm => "CONFIRM",
            ChatState::Booking => "BOOKING",
            ChatState::Success => "SUCCESS",
            ChatState::Error(_) => "ERROR",
        }
    }

    /// A call is in flight. User input is dropped.
    pub fn is_busy(&self) -> bool {
        matches!(self, ChatState::Searching | ChatState::Booking)
    }

    pub fn input_enabled(&self) -> bool {
        !self.is_busy()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatState::Success | ChatState::Error(_))
    }
}

/// One client's conversation. Lives exactly as long as its connection.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    pub state: ChatState,
    pub requirements: Option<String>,
    pub origin: Option<GeoPoint>,
    pub location_label: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Radius of the last search, or of the next one.
    pub radius_km: f64,
    pub candidates: Vec<Candidate>,
    pub selected: Option<Candidate>,
    pub identity: Option<ClientIdentity>,
    pub confirmation: Option<BookingConfirmation>,
    pub delivery: Option<DeliverySummary>,
    pub last_error: Option<String>,
    /// In `SEARCHING`, waiting for the client's coordinates rather than for matches.
    pub awaiting_location: bool,
}

impl ChatSession {
    pub fn new(radius_km: f64, identity: Option<ClientIdentity>) -> Self {
        Self {
            radius_km,
            identity,
            ..Self::default()
        }
    }

    pub fn candidate(&self, provider_id: Uuid) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.provider.id == provider_id)
    }

    /// The request as accumulated so far, once requirements and origin exist.
    pub fn service_request(&self) -> Option<ServiceRequest> {
        let requirements = self.requirements.clone()?;
        let origin = self.origin?;
        let mut request = ServiceRequest::new(requirements.clone(), origin);
        request.location_label = self.location_label.clone();
        request.scheduled_at = self.scheduled_at;
        request.service_type = Some(requirements);
        Some(request)
    }
}
