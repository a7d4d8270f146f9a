//! Booking Coordinator: turns a confirmed selection into a persisted booking.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::models::{
    Booking, BookingAllowance, BookingConfirmation, BookingStatus, ClientIdentity, NewBooking,
    Provider, ProviderContact, ServiceRequest,
};
use crate::notify::templates;
use crate::reference::{BookingReference, OtpCode};
use crate::retry::RetryPolicy;
use crate::store::{BookingStore, ProviderStore};
use crate::{Error, Result};

/// Creates bookings and moves them through their lifecycle.
///
/// Holds no per-request state, so one coordinator can be shared by every
/// session and request in a process.
#[derive(Clone)]
pub struct BookingCoordinator {
    providers: Arc<dyn ProviderStore>,
    bookings: Arc<dyn BookingStore>,
    settings: DispatchSettings,
    retry: RetryPolicy,
}

impl BookingCoordinator {
    pub fn new(
        providers: Arc<dyn ProviderStore>,
        bookings: Arc<dyn BookingStore>,
        settings: DispatchSettings,
    ) -> Self {
        let retry = RetryPolicy::new().with_max_attempts(settings.persist_max_attempts);
        Self {
            providers,
            bookings,
            settings,
            retry,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Validate, price, reference and persist a booking for `provider_id`.
    ///
    /// Returns only after the booking is durably stored. Nothing here sends
    /// notifications.
    pub async fn create_booking(
        &self,
        request: &ServiceRequest,
        provider_id: Uuid,
        client: &ClientIdentity,
    ) -> Result<BookingConfirmation> {
        let duration_hours = self.validate(request, client)?;

        // Early answer only. The store rechecks the limit inside the write.
        let allowance = self.allowance(&client.client_id).await?;
        if !allowance.can_book {
            return Err(Error::BookingLimit {
                active: allowance.current_count,
                max: allowance.max_bookings,
            });
        }

        let provider = self
            .providers
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Provider {}", provider_id)))?;
        if !provider.is_bookable() {
            return Err(Error::Conflict(format!(
                "Provider {} is not accepting bookings",
                provider_id
            )));
        }
        let contact = resolve_contact(&provider)?;

        let total_amount = provider.hourly_rate * duration_hours;
        let otp_code = OtpCode::generate(&mut rand::thread_rng());
        let scheduled_at = request.scheduled_at.unwrap_or_else(Utc::now);

        let mut attempts = 0;
        let booking = loop {
            let booking_reference = self.unused_reference(&mut attempts).await?;
            let new_booking = NewBooking {
                client_id: client.client_id.clone(),
                provider_id,
                scheduled_at,
                duration_hours,
                origin: request.origin,
                location_label: request.location_label.clone(),
                service_type: request.service_type.clone(),
                payment_method: request.payment_method.clone(),
                total_amount,
                booking_reference,
                otp_code,
                requirements: request.requirements.trim().to_string(),
            };

            let written = self
                .retry
                .run("insert_booking", || {
                    self.bookings
                        .insert_booking(new_booking.clone(), self.settings.max_active_bookings)
                })
                .await;

            match written {
                Ok(booking) => break booking,
                Err(Error::DuplicateReference(reference)) => {
                    warn!(booking_reference = %reference, "Reference claimed concurrently, regenerating");
                }
                Err(e) => {
                    warn!(provider_id = %provider_id, error = %e, "Booking write failed");
                    return Err(e);
                }
            }
        };

        info!(
            booking_reference = %booking.booking_reference,
            provider_id = %provider_id,
            client_id = %client.client_id,
            total_amount,
            "Booking created"
        );

        Ok(BookingConfirmation {
            client_message: templates::client_message(&booking, &contact, client),
            provider_message: templates::provider_message(&booking),
            booking,
            provider: contact,
            client: client.clone(),
        })
    }

    /// Active bookings held by `client_id` against the configured limit.
    pub async fn allowance(&self, client_id: &str) -> Result<BookingAllowance> {
        let active = self.bookings.count_active_for_client(client_id).await?;
        Ok(BookingAllowance::new(active, self.settings.max_active_bookings))
    }

    pub async fn lookup(&self, reference: BookingReference) -> Result<Booking> {
        self.bookings
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Booking {}", reference)))
    }

    /// Provider accepts the job.
    pub async fn accept(&self, reference: BookingReference) -> Result<Booking> {
        let booking = self.lookup(reference).await?;
        self.advance(booking, BookingStatus::Confirmed).await
    }

    /// Start the service once the client's OTP checks out.
    ///
    /// Repeating a start with the right OTP on a booking already in progress
    /// returns it unchanged.
    pub async fn start(&self, reference: BookingReference, otp: &str) -> Result<Booking> {
        let booking = self.lookup(reference).await?;

        if !booking.otp_code.matches(otp) {
            warn!(booking_reference = %reference, "OTP mismatch");
            return Err(Error::InvalidOtp);
        }
        if booking.status == BookingStatus::InProgress {
            debug!(booking_reference = %reference, "Already in progress");
            return Ok(booking);
        }

        self.advance(booking, BookingStatus::InProgress).await
    }

    pub async fn complete(&self, reference: BookingReference) -> Result<Booking> {
        let booking = self.lookup(reference).await?;
        self.advance(booking, BookingStatus::Completed).await
    }

    /// Cancel on behalf of the client that placed the booking.
    pub async fn cancel(&self, reference: BookingReference, client_id: &str) -> Result<Booking> {
        let booking = self.lookup(reference).await?;
        if booking.client_id != client_id {
            return Err(Error::Unauthorized(
                "Only the client who placed the booking can cancel it".to_string(),
            ));
        }
        self.advance(booking, BookingStatus::Cancelled).await
    }

    async fn advance(&self, booking: Booking, to: BookingStatus) -> Result<Booking> {
        let from = booking.status;
        let invalid = || Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        };

        if !from.can_transition_to(to) {
            return Err(invalid());
        }

        // A concurrent transition moved the booking first.
        let updated = self
            .bookings
            .transition_status(booking.id, from, to)
            .await?
            .ok_or_else(invalid)?;

        info!(
            booking_reference = %updated.booking_reference,
            from = %from,
            to = %to,
            "Booking status changed"
        );
        Ok(updated)
    }

    /// Check the request and return the resolved duration.
    fn validate(&self, request: &ServiceRequest, client: &ClientIdentity) -> Result<f64> {
        if client.client_id.trim().is_empty() {
            return Err(Error::Validation("client_id is required".to_string()));
        }
        if request.requirements.trim().is_empty() {
            return Err(Error::Validation("requirements are required".to_string()));
        }
        if !request.origin.is_valid() {
            return Err(Error::Validation(
                "lat/lng must be valid coordinates".to_string(),
            ));
        }

        let duration = request
            .duration_hours
            .unwrap_or(self.settings.default_duration_hours);
        if !duration.is_finite() || duration <= 0.0 {
            return Err(Error::Validation(
                "duration_hours must be greater than zero".to_string(),
            ));
        }
        Ok(duration)
    }

    /// Draw references until one is free, counting against the shared budget.
    async fn unused_reference(&self, attempts: &mut u32) -> Result<BookingReference> {
        let limit = self.settings.reference_retry_limit;
        while *attempts < limit {
            *attempts += 1;
            let candidate = BookingReference::generate(&mut rand::thread_rng());
            if !self.bookings.reference_in_use(candidate).await? {
                return Ok(candidate);
            }
            debug!(booking_reference = %candidate, attempt = *attempts, "Reference collision");
        }

        warn!(attempts = limit, "Booking reference space exhausted");
        Err(Error::Collision { attempts: limit })
    }
}

/// Name and phone are mandatory. Email only drives an optional notification.
fn resolve_contact(provider: &Provider) -> Result<ProviderContact> {
    let name = provider.full_name.trim();
    if name.is_empty() {
        return Err(Error::ProviderContactMissing("name"));
    }
    let phone = provider
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(Error::ProviderContactMissing("phone"))?;

    Ok(ProviderContact {
        id: provider.id,
        name: name.to_string(),
        phone: phone.to_string(),
        email: provider.email.clone(),
        rating: provider.rating,
    })
}
