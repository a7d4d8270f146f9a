//! Persistence seams for providers and bookings.
//!
//! The dispatch core only talks to these traits. `PgStore` backs the Lambda
//! deployments and `MemoryStore` backs tests and local runs.

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, NewBooking, Provider};
use crate::reference::BookingReference;
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read-only access to the provider directory.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>>;

    /// Active, verified providers. Location may still be missing.
    async fn list_bookable(&self) -> Result<Vec<Provider>>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Whether an active booking already holds `reference`.
    async fn reference_in_use(&self, reference: BookingReference) -> Result<bool>;

    /// Write a booking with status `pending` as one atomic step.
    ///
    /// Fails with [`Error::BookingLimit`](crate::Error::BookingLimit) when the
    /// client already holds `max_active` active bookings, with
    /// [`Error::Conflict`](crate::Error::Conflict) when the provider
    /// already holds an active booking overlapping the new window, and with
    /// [`Error::DuplicateReference`](crate::Error::DuplicateReference) when
    /// another active booking claimed the reference first.
    async fn insert_booking(&self, booking: NewBooking, max_active: usize) -> Result<Booking>;

    async fn count_active_for_client(&self, client_id: &str) -> Result<usize>;

    /// Most recent booking carrying `reference`, active ones first.
    async fn find_by_reference(&self, reference: BookingReference) -> Result<Option<Booking>>;

    /// Compare-and-swap on status. `None` when the booking is no longer in `from`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<Option<Booking>>;
}
