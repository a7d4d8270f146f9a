use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{BookingStore, ProviderStore};
use crate::models::{Booking, BookingStatus, NewBooking, Provider};
use crate::reference::BookingReference;
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    providers: HashMap<Uuid, Provider>,
    bookings: Vec<Booking>,
}

/// In-process store. Every write happens under one lock, which gives the
/// same check-then-insert atomicity the Postgres store gets from its client
/// and provider locks.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers(providers: impl IntoIterator<Item = Provider>) -> Self {
        let store = Self::new();
        for provider in providers {
            store.upsert_provider(provider);
        }
        store
    }

    pub fn upsert_provider(&self, provider: Provider) {
        self.lock().providers.insert(provider.id, provider);
    }

    /// Snapshot of every booking written so far.
    pub fn bookings(&self) -> Vec<Booking> {
        self.lock().bookings.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>> {
        Ok(self.lock().providers.get(&id).cloned())
    }

    async fn list_bookable(&self) -> Result<Vec<Provider>> {
        Ok(self
            .lock()
            .providers
            .values()
            .filter(|p| p.is_bookable())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn reference_in_use(&self, reference: BookingReference) -> Result<bool> {
        Ok(self
            .lock()
            .bookings
            .iter()
            .any(|b| b.status.is_active() && b.booking_reference == reference))
    }

    async fn insert_booking(&self, booking: NewBooking, max_active: usize) -> Result<Booking> {
        let mut inner = self.lock();

        let active = inner
            .bookings
            .iter()
            .filter(|b| b.client_id == booking.client_id && b.status.is_active())
            .count();
        if active >= max_active {
            return Err(Error::BookingLimit {
                active,
                max: max_active,
            });
        }

        if !inner.providers.contains_key(&booking.provider_id) {
            return Err(Error::NotFound(format!("Provider {}", booking.provider_id)));
        }

        let window = booking.window();
        let overlapping = inner.bookings.iter().any(|b| {
            b.provider_id == booking.provider_id
                && b.status.is_active()
                && b.window().overlaps(&window)
        });
        if overlapping {
            return Err(Error::Conflict(format!(
                "Provider {} is already booked for that time",
                booking.provider_id
            )));
        }

        let reference_taken = inner
            .bookings
            .iter()
            .any(|b| b.status.is_active() && b.booking_reference == booking.booking_reference);
        if reference_taken {
            return Err(Error::DuplicateReference(booking.booking_reference.to_string()));
        }

        let stored = Booking {
            id: Uuid::new_v4(),
            client_id: booking.client_id,
            provider_id: booking.provider_id,
            status: BookingStatus::Pending,
            scheduled_at: booking.scheduled_at,
            duration_hours: booking.duration_hours,
            origin: booking.origin,
            location_label: booking.location_label,
            service_type: booking.service_type,
            payment_method: booking.payment_method,
            total_amount: booking.total_amount,
            booking_reference: booking.booking_reference,
            otp_code: booking.otp_code,
            requirements: booking.requirements,
            created_at: Utc::now(),
        };
        inner.bookings.push(stored.clone());
        Ok(stored)
    }

    async fn count_active_for_client(&self, client_id: &str) -> Result<usize> {
        Ok(self
            .lock()
            .bookings
            .iter()
            .filter(|b| b.client_id == client_id && b.status.is_active())
            .count())
    }

    async fn find_by_reference(&self, reference: BookingReference) -> Result<Option<Booking>> {
        Ok(self
            .lock()
            .bookings
            .iter()
            .filter(|b| b.booking_reference == reference)
            .max_by_key(|b| (b.status.is_active(), b.created_at))
            .cloned())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<Option<Booking>> {
        let mut inner = self.lock();
        let booking = inner
            .bookings
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| Error::NotFound(format!("Booking {}", id)))?;

        if booking.status != from {
            return Ok(None);
        }
        booking.status = to;
        Ok(Some(booking.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeoPoint;
    use crate::reference::OtpCode;
    use chrono::TimeZone;

    const LIMIT: usize = 5;

    fn provider() -> Provider {
        Provider {
            id: Uuid::new_v4(),
            full_name: "Kiran".to_string(),
            phone: Some("9876543210".to_string()),
            email: None,
            location: Some(GeoPoint::new(12.97, 77.59)),
            hourly_rate: 1500.0,
            rating: 4.7,
            specializations: vec![],
            is_verified: true,
            is_active: true,
        }
    }

    fn new_booking(provider_id: Uuid, reference: u16, hour: u32) -> NewBooking {
        NewBooking {
            client_id: "client-1".to_string(),
            provider_id,
            scheduled_at: Utc.with_ymd_and_hms(2026, 5, 4, hour, 0, 0).unwrap(),
            duration_hours: 2.0,
            origin: GeoPoint::new(12.97, 77.59),
            location_label: None,
            service_type: None,
            payment_method: None,
            total_amount: 3000.0,
            booking_reference: format!("#AH-{}", reference).parse().unwrap(),
            otp_code: "1234".parse::<OtpCode>().unwrap(),
            requirements: "Survey".to_string(),
        }
    }

    #[tokio::test]
    async fn test_overlap_is_conflict_and_adjacent_is_not() {
        let p = provider();
        let store = MemoryStore::with_providers([p.clone()]);

        store.insert_booking(new_booking(p.id, 1001, 10), LIMIT).await.unwrap();
        let clash = store.insert_booking(new_booking(p.id, 1002, 11), LIMIT).await;
        assert!(matches!(clash, Err(Error::Conflict(_))));

        store.insert_booking(new_booking(p.id, 1003, 12), LIMIT).await.unwrap();
        assert_eq!(store.count_active_for_client("client-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reference_reusable_once_inactive() {
        let p = provider();
        let store = MemoryStore::with_providers([p.clone()]);

        let first = store.insert_booking(new_booking(p.id, 4242, 8), LIMIT).await.unwrap();
        let dup = store.insert_booking(new_booking(p.id, 4242, 14), LIMIT).await;
        assert!(matches!(dup, Err(Error::DuplicateReference(_))));

        store
            .transition_status(first.id, BookingStatus::Pending, BookingStatus::Cancelled)
            .await
            .unwrap()
            .unwrap();
        let reference = first.booking_reference;
        assert!(!store.reference_in_use(reference).await.unwrap());

        let second = store.insert_booking(new_booking(p.id, 4242, 14), LIMIT).await.unwrap();
        let found = store.find_by_reference(reference).await.unwrap().unwrap();
        assert_eq!(found.id, second.id);
    }

    #[tokio::test]
    async fn test_client_limit_checked_with_the_write() {
        let p = provider();
        let store = MemoryStore::with_providers([p.clone()]);
        store.insert_booking(new_booking(p.id, 2001, 8), 2).await.unwrap();
        store.insert_booking(new_booking(p.id, 2002, 11), 2).await.unwrap();

        let over = store.insert_booking(new_booking(p.id, 2003, 14), 2).await;
        assert!(matches!(over, Err(Error::BookingLimit { active: 2, max: 2 })));
        assert_eq!(store.bookings().len(), 2);

        let mut other = new_booking(p.id, 2004, 17);
        other.client_id = "client-2".to_string();
        store.insert_booking(other, 2).await.unwrap();
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let p = provider();
        let store = MemoryStore::with_providers([p.clone()]);
        let booking = store.insert_booking(new_booking(p.id, 5000, 9), LIMIT).await.unwrap();

        let moved = store
            .transition_status(booking.id, BookingStatus::Pending, BookingStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(moved.unwrap().status, BookingStatus::Confirmed);

        let stale = store
            .transition_status(booking.id, BookingStatus::Pending, BookingStatus::Confirmed)
            .await
            .unwrap();
        assert!(stale.is_none());
    }
}
