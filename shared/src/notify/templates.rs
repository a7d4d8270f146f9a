//! Confirmation texts and the email endpoint's `bookingDetails` payload.

use serde::Serialize;

use crate::models::{Booking, BookingConfirmation, ClientIdentity, ProviderContact};
use crate::notify::RecipientRole;

const DEFAULT_SERVICE: &str = "Drone service";

fn service_label(booking: &Booking) -> &str {
    booking
        .service_type
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SERVICE)
}

fn location_label(booking: &Booking) -> String {
    booking
        .location_label
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| {
            format!("Lat {:.5}, Lng {:.5}", booking.origin.lat, booking.origin.lng)
        })
}

pub fn format_slot(booking: &Booking) -> String {
    booking.scheduled_at.format("%d %b %Y, %H:%M UTC").to_string()
}

pub fn format_amount(amount: f64) -> String {
    format!("₹{:.0}", amount)
}

pub fn google_maps_link(booking: &Booking) -> String {
    format!(
        "https://www.google.com/maps?q={},{}",
        booking.origin.lat, booking.origin.lng
    )
}

/// Message shown to the client once the booking is stored.
pub fn client_message(
    booking: &Booking,
    provider: &ProviderContact,
    client: &ClientIdentity,
) -> String {
    let greeting = client
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or("there");

    format!(
        "Hello {greeting},\n\
         Your booking for {service} is confirmed!\n\
         Booking ID: {reference}\n\
         Location: {location}\n\
         Slot: {slot}\n\
         \n\
         Your Pilot Details:\n\
         {pilot} (Rating: {rating:.1})\n\
         Contact: {phone}\n\
         Share this OTP with your pilot on arrival: {otp}",
        service = service_label(booking),
        reference = booking.booking_reference,
        location = location_label(booking),
        slot = format_slot(booking),
        pilot = provider.name,
        rating = provider.rating,
        phone = provider.phone,
        otp = booking.otp_code,
    )
}

/// Job assignment for the provider. Never includes the OTP.
pub fn provider_message(booking: &Booking) -> String {
    format!(
        "NEW JOB ASSIGNMENT\n\
         Job ID: {reference}\n\
         Service: {service}\n\
         Site: Lat {lat}, Lng {lng}\n\
         Time: {slot}\n\
         Duration: {hours} h\n\
         Estimated earning: {amount}\n\
         \n\
         Status: {status}. Ask the client for their OTP on arrival.",
        reference = booking.booking_reference,
        service = service_label(booking),
        lat = booking.origin.lat,
        lng = booking.origin.lng,
        slot = format_slot(booking),
        hours = booking.duration_hours,
        amount = format_amount(booking.total_amount),
        status = booking.status.as_str().to_uppercase(),
    )
}

pub fn subject(role: RecipientRole, booking: &Booking) -> String {
    match role {
        RecipientRole::Client => format!("Booking Confirmed: {}", booking.booking_reference),
        RecipientRole::Provider => format!("New Job Assignment: {}", booking.booking_reference),
    }
}

/// `bookingDetails` object understood by the email send endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetails {
    pub booking_id: String,
    #[serde(rename = "orderUUID")]
    pub order_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    pub pilot_name: String,
    pub pilot_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pilot_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_email: Option<String>,
    pub service_type: String,
    pub location: String,
    pub scheduled_at: String,
    pub duration_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charges_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_job_link: Option<String>,
    pub google_maps_link: String,
    pub estimated_amount: String,
}

impl BookingDetails {
    /// Details for one recipient. Only the client copy carries the OTP and
    /// tracking link; only the provider copy carries the accept link.
    pub fn for_role(
        role: RecipientRole,
        confirmation: &BookingConfirmation,
        public_base_url: &str,
    ) -> Self {
        let booking = &confirmation.booking;
        let slug = booking.booking_reference.to_string().trim_start_matches('#').to_string();
        let is_client = role == RecipientRole::Client;

        Self {
            booking_id: booking.booking_reference.to_string(),
            order_uuid: booking.id.to_string(),
            otp: is_client.then(|| booking.otp_code.to_string()),
            pilot_name: confirmation.provider.name.clone(),
            pilot_phone: confirmation.provider.phone.clone(),
            pilot_email: confirmation.provider.email.clone(),
            client_name: confirmation.client.name.clone(),
            client_phone: confirmation.client.phone.clone(),
            client_email: confirmation.client.email.clone(),
            service_type: service_label(booking).to_string(),
            location: location_label(booking),
            scheduled_at: format_slot(booking),
            duration_hours: booking.duration_hours,
            charges_note: is_client
                .then(|| "Final charges may change with on-site requirements.".to_string()),
            tracking_link: is_client.then(|| format!("{}/track/{}", public_base_url, slug)),
            accept_job_link: (!is_client)
                .then(|| format!("{}/pilot/jobs/{}/accept", public_base_url, slug)),
            google_maps_link: google_maps_link(booking),
            estimated_amount: format_amount(booking.total_amount),
        }
    }
}
