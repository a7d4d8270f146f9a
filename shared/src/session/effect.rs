use uuid::Uuid;

use crate::models::{BookingConfirmation, ClientIdentity, GeoPoint, ServiceRequest};

/// Work a transition asks the driver to perform. At most one per transition.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Start the geolocation deadline.
    AwaitLocation,
    FindProviders {
        origin: GeoPoint,
        radius_km: f64,
    },
    CreateBooking {
        request: ServiceRequest,
        provider_id: Uuid,
        client: ClientIdentity,
    },
    /// Fan out confirmations. Runs detached from the session.
    Notify(Box<BookingConfirmation>),
}
