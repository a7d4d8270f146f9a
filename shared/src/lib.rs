//! Shared library for the AeroHive dispatch Lambda functions.
//!
//! Provider matching, booking creation, notification fan-out and the
//! conversational session state machine live here. The Lambda binaries in
//! `api-gateway` and `chat-socket` are thin surfaces over these pieces.

pub mod auth;
pub mod booking;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod http;
pub mod models;
pub mod notify;
pub mod reference;
pub mod retry;
pub mod session;
pub mod store;

pub use auth::{extract_identity_from_context, validate_token, CognitoClaims};
pub use booking::BookingCoordinator;
pub use config::{Config, DispatchSettings};
pub use error::{Error, Result};
pub use geo::{find_nearby, haversine_km, Candidate};
pub use models::{
    Booking, BookingAllowance, BookingConfirmation, BookingStatus, ClientIdentity, GeoPoint,
    Provider, ProviderContact, ServiceRequest,
};
pub use notify::{DeliverySummary, NotificationDispatcher};
pub use reference::{BookingReference, OtpCode};
pub use retry::RetryPolicy;
pub use store::{BookingStore, ProviderStore};
