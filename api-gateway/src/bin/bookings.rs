//! Bookings Lambda - Creates bookings and moves them through their lifecycle.
//!
//! Endpoints:
//! - POST /bookings - Book a pilot and notify both parties
//! - GET /bookings/limit - Active booking allowance for the caller
//! - GET /bookings/{reference} - Job details
//! - POST /bookings/{reference}/accept - Pilot accepts the job
//! - POST /bookings/{reference}/start - Pilot starts the job with the client's OTP
//! - POST /bookings/{reference}/complete - Pilot completes the job
//! - POST /bookings/{reference}/cancel - Client cancels

use chrono::{DateTime, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::{Deserialize, Serialize};
use shared::http::{error_response, error_response_for, json_response, ApiResponse};
use shared::notify::templates;
use shared::notify::NotificationDispatcher;
use shared::store::PgStore;
use shared::{
    extract_identity_from_context, Booking, BookingCoordinator, BookingReference, ClientIdentity,
    Config, GeoPoint, ServiceRequest,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Booking creation request, as posted by the booking form. Blank text
/// fields arrive as `None`.
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    #[serde(default, deserialize_with = "blank_as_none")]
    client_id: Option<String>,
    pilot_id: Uuid,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(length(max = 200))]
    service_type: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    lng: f64,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(length(max = 500))]
    location_name: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    duration_hours: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    payment_method: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(length(max = 2000))]
    requirements: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    user_name: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    user_phone: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(email)]
    user_email: Option<String>,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

impl CreateBookingRequest {
    fn service_request(&self) -> ServiceRequest {
        let requirements = self
            .requirements
            .clone()
            .or_else(|| self.service_type.clone())
            .unwrap_or_default();

        let mut request = ServiceRequest::new(requirements, GeoPoint::new(self.lat, self.lng));
        request.location_label = self.location_name.clone();
        request.scheduled_at = self.scheduled_at;
        request.service_type = self.service_type.clone();
        request.duration_hours = self.duration_hours;
        request.payment_method = self.payment_method.clone();
        request
    }

    /// Contact details typed into the form take precedence over the token's.
    fn client(&self, identity: ClientIdentity) -> ClientIdentity {
        ClientIdentity {
            name: self.user_name.clone().or(identity.name),
            phone: self.user_phone.clone().or(identity.phone),
            email: self.user_email.clone().or(identity.email),
            client_id: identity.client_id,
        }
    }
}

/// Start request
#[derive(Debug, Deserialize)]
struct StartJobRequest {
    otp: String,
}

/// Booking creation response
#[derive(Debug, Serialize)]
struct CreateBookingResponse {
    status: &'static str,
    booking_id: String,
    otp: String,
    pilot_name: String,
    pilot_phone: String,
    pilot_email: Option<String>,
    pilot_rating: f64,
    total_amount: f64,
    client_message: String,
    pilot_message: String,
    emails_sent: usize,
    client_email_sent: bool,
    pilot_email_sent: bool,
}

/// Job details response. Never carries the OTP.
#[derive(Debug, Serialize)]
struct BookingResponse {
    booking_id: String,
    status: String,
    service_type: Option<String>,
    requirements: String,
    scheduled_at: String,
    duration_hours: f64,
    lat: f64,
    lng: f64,
    location_name: Option<String>,
    maps_url: String,
    estimated_amount: f64,
    created_at: String,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            booking_id: b.booking_reference.to_string(),
            status: b.status.to_string(),
            maps_url: templates::google_maps_link(&b),
            service_type: b.service_type,
            requirements: b.requirements,
            scheduled_at: b.scheduled_at.to_rfc3339(),
            duration_hours: b.duration_hours,
            lat: b.origin.lat,
            lng: b.origin.lng,
            location_name: b.location_label,
            estimated_amount: b.total_amount,
            created_at: b.created_at.to_rfc3339(),
        }
    }
}

/// Application state
struct AppState {
    coordinator: BookingCoordinator,
    dispatcher: NotificationDispatcher,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let pool = shared::db::connect(&config, &aws).await?;
        let store = Arc::new(PgStore::new(pool));

        Ok(Self {
            dispatcher: NotificationDispatcher::from_settings(&config.dispatch, &aws),
            coordinator: BookingCoordinator::new(store.clone(), store, config.dispatch),
        })
    }
}

/// Extract the caller from Cognito claims
fn extract_identity(event: &Request) -> Result<ClientIdentity, Error> {
    let context = event
        .request_context_ref()
        .ok_or("Missing request context")?;

    let claims = context
        .authorizer()
        .and_then(|a| a.fields.get("claims"))
        .ok_or("Missing claims in authorizer context")?;

    Ok(extract_identity_from_context(claims)?)
}

/// `#AH-1234` arrives as `%23AH-1234` or plain `AH-1234` in a path.
fn parse_reference(segment: &str) -> shared::Result<BookingReference> {
    segment
        .strip_prefix("%23")
        .unwrap_or(segment)
        .parse()
}

async fn create_booking(
    state: &AppState,
    request: CreateBookingRequest,
    identity: ClientIdentity,
) -> Result<Response<Body>, Error> {
    if let Err(e) = request.validate() {
        return error_response(400, "validation_error", format!("Invalid request: {}", e));
    }
    if let Some(client_id) = request.client_id.as_deref() {
        if client_id != identity.client_id {
            return error_response(403, "unauthorized", "Cannot book on behalf of another client");
        }
    }

    let client = request.client(identity);
    let confirmation = match state
        .coordinator
        .create_booking(&request.service_request(), request.pilot_id, &client)
        .await
    {
        Ok(confirmation) => confirmation,
        Err(e) => return error_response_for(&e),
    };

    // Only reached once the booking is stored.
    let delivery = state.dispatcher.dispatch(&confirmation).await;
    info!(
        booking_reference = %confirmation.booking.booking_reference,
        emails_sent = delivery.emails_sent(),
        failures = delivery.failures(),
        "Booking confirmed"
    );

    json_response(
        201,
        &CreateBookingResponse {
            status: "success",
            booking_id: confirmation.booking.booking_reference.to_string(),
            otp: confirmation.booking.otp_code.to_string(),
            pilot_name: confirmation.provider.name.clone(),
            pilot_phone: confirmation.provider.phone.clone(),
            pilot_email: confirmation.provider.email.clone(),
            pilot_rating: confirmation.provider.rating,
            total_amount: confirmation.booking.total_amount,
            client_message: confirmation.client_message.clone(),
            pilot_message: confirmation.provider_message.clone(),
            emails_sent: delivery.emails_sent(),
            client_email_sent: delivery.email_sent_to(shared::notify::RecipientRole::Client),
            pilot_email_sent: delivery.email_sent_to(shared::notify::RecipientRole::Provider),
        },
    )
}

fn booking_response(result: shared::Result<Booking>) -> Result<Response<Body>, Error> {
    match result {
        Ok(booking) => json_response(200, &ApiResponse::success(BookingResponse::from(booking))),
        Err(e) => error_response_for(&e),
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    // Strip /api stage prefix if present (API Gateway REST API includes stage in path)
    let path = raw_path.strip_prefix("/api").unwrap_or(raw_path);
    let method = event.method().as_str();

    info!("Bookings request: {} {}", method, path);

    let identity = match extract_identity(&event) {
        Ok(identity) => identity,
        Err(e) => {
            return error_response(401, "auth_error", format!("Authentication required: {}", e));
        }
    };

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        ("POST", ["bookings"]) => {
            let request: CreateBookingRequest = shared::parse_body!(event.body());
            create_booking(&state, request, identity).await
        }

        ("GET", ["bookings", "limit"]) => {
            match state.coordinator.allowance(&identity.client_id).await {
                Ok(allowance) => json_response(200, &ApiResponse::success(allowance)),
                Err(e) => error_response_for(&e),
            }
        }

        ("GET", ["bookings", reference]) => {
            let reference = match parse_reference(reference) {
                Ok(r) => r,
                Err(e) => return error_response_for(&e),
            };
            booking_response(state.coordinator.lookup(reference).await)
        }

        ("POST", ["bookings", reference, action]) => {
            let reference = match parse_reference(reference) {
                Ok(r) => r,
                Err(e) => return error_response_for(&e),
            };

            let result = match *action {
                "accept" => state.coordinator.accept(reference).await,
                "start" => {
                    let request: StartJobRequest = shared::parse_body!(event.body());
                    state.coordinator.start(reference, &request.otp).await
                }
                "complete" => state.coordinator.complete(reference).await,
                "cancel" => {
                    state
                        .coordinator
                        .cancel(reference, &identity.client_id)
                        .await
                }
                _ => return error_response(404, "not_found", "Not found"),
            };
            booking_response(result)
        }

        _ => error_response(404, "not_found", "Not found"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
