//! Shared data models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reference::{BookingReference, OtpCode};
use crate::Error;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and within the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Drone pilot offering services. Owned by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Missing when the provider never shared coordinates.
    pub location: Option<GeoPoint>,
    pub hourly_rate: f64,
    pub rating: f64,
    pub specializations: Vec<String>,
    pub is_verified: bool,
    pub is_active: bool,
}

impl Provider {
    pub fn is_bookable(&self) -> bool {
        self.is_active && self.is_verified
    }

    /// Case-insensitive substring match against the specialization tags.
    pub fn offers(&self, service: &str) -> bool {
        let needle = service.trim().to_lowercase();
        needle.is_empty()
            || self
                .specializations
                .iter()
                .any(|tag| tag.to_lowercase().contains(&needle))
    }
}

/// A client's request as captured by the chat flow or the booking endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub requirements: String,
    pub origin: GeoPoint,
    pub location_label: Option<String>,
    /// `None` means as soon as possible.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub service_type: Option<String>,
    pub duration_hours: Option<f64>,
    pub payment_method: Option<String>,
}

impl ServiceRequest {
    pub fn new(requirements: impl Into<String>, origin: GeoPoint) -> Self {
        Self {
            requirements: requirements.into(),
            origin,
            location_label: None,
            scheduled_at: None,
            service_type: None,
            duration_hours: None,
            payment_method: None,
        }
    }
}

/// Authenticated client placing the booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub client_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ACTIVE: [BookingStatus; 3] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    fn rank(&self) -> u8 {
        match self {
            BookingStatus::Pending => 0,
            BookingStatus::Confirmed => 1,
            BookingStatus::InProgress => 2,
            BookingStatus::Completed => 3,
            BookingStatus::Cancelled => 4,
        }
    }

    /// Forward by exactly one step, or to `Cancelled` from any active status.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        match next {
            BookingStatus::Cancelled => self.is_active(),
            _ => self.is_active() && next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" | "accepted" => Ok(BookingStatus::Confirmed),
            "in_progress" => Ok(BookingStatus::InProgress),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(Error::Validation(format!("Unknown booking status: {}", other))),
        }
    }
}

/// A booking as written by the coordinator. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub client_id: String,
    pub provider_id: Uuid,
    pub status: BookingStatus,
    pub scheduled_at: DateTime<Utc>,
    pub duration_hours: f64,
    pub origin: GeoPoint,
    pub location_label: Option<String>,
    pub service_type: Option<String>,
    pub payment_method: Option<String>,
    /// Fixed at confirmation time, never recomputed.
    pub total_amount: f64,
    pub booking_reference: BookingReference,
    pub otp_code: OtpCode,
    pub requirements: String,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// Half-open window `[scheduled_at, scheduled_at + duration)`.
    pub fn window(&self) -> TimeWindow {
        TimeWindow::starting_at(self.scheduled_at, self.duration_hours)
    }
}

/// Fields of a booking before the store assigns its id.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub client_id: String,
    pub provider_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_hours: f64,
    pub origin: GeoPoint,
    pub location_label: Option<String>,
    pub service_type: Option<String>,
    pub payment_method: Option<String>,
    pub total_amount: f64,
    pub booking_reference: BookingReference,
    pub otp_code: OtpCode,
    pub requirements: String,
}

impl NewBooking {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::starting_at(self.scheduled_at, self.duration_hours)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn starting_at(start: DateTime<Utc>, hours: f64) -> Self {
        let minutes = (hours * 60.0).round() as i64;
        Self {
            start,
            end: start + Duration::minutes(minutes),
        }
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Provider contact details resolved at booking time.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderContact {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub rating: f64,
}

/// Outcome of a successful booking, before any notification is sent.
#[derive(Debug, Clone, Serialize)]
pub struct BookingConfirmation {
    pub booking: Booking,
    pub provider: ProviderContact,
    pub client: ClientIdentity,
    pub client_message: String,
    pub provider_message: String,
}

/// Active booking count for a client against the configured limit.
#[derive(Debug, Clone, Serialize)]
pub struct BookingAllowance {
    pub can_book: bool,
    pub current_count: usize,
    pub max_bookings: usize,
    pub remaining_slots: usize,
}

impl BookingAllowance {
    pub fn new(current_count: usize, max_bookings: usize) -> Self {
        Self {
            can_book: current_count < max_bookings,
            current_count,
            max_bookings,
            remaining_slots: max_bookings.saturating_sub(current_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_moves_forward_only() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(InProgress));
        assert!(!Confirmed.can_transition_to(Pending));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn test_windows_are_half_open() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let first = TimeWindow::starting_at(start, 2.0);
        let adjacent = TimeWindow::starting_at(start + Duration::hours(2), 1.0);
        let inside = TimeWindow::starting_at(start + Duration::minutes(90), 1.0);

        assert!(!first.overlaps(&adjacent));
        assert!(first.overlaps(&inside));
        assert!(inside.overlaps(&first));
    }

    #[test]
    fn test_geo_point_validity() {
        assert!(GeoPoint::new(12.9716, 77.5946).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_allowance() {
        let allowance = BookingAllowance::new(2, 2);
        assert!(!allowance.can_book);
        assert_eq!(allowance.remaining_slots, 0);
        assert!(BookingAllowance::new(1, 2).can_book);
    }
}
