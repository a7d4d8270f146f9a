use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BookingStore, ProviderStore};
use crate::models::{Booking, BookingStatus, GeoPoint, NewBooking, Provider};
use crate::reference::BookingReference;
use crate::{Error, Result};

const UNIQUE_VIOLATION: &str = "23505";
const ACTIVE_REFERENCE_INDEX: &str = "bookings_active_reference_idx";

const BOOKING_COLUMNS: &str = "id, client_id, provider_id, status, scheduled_at, duration_hours, \
     client_location_lat, client_location_lng, location_label, service_type, payment_method, \
     total_amount, booking_reference, otp_code, requirements, created_at";

/// Postgres-backed store for the Lambda deployments.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProviderRow {
    id: Uuid,
    full_name: String,
    phone: Option<String>,
    email: Option<String>,
    location_lat: Option<f64>,
    location_lng: Option<f64>,
    hourly_rate: f64,
    rating: f64,
    specializations: Vec<String>,
    is_verified: bool,
    is_active: bool,
}

impl From<ProviderRow> for Provider {
    fn from(row: ProviderRow) -> Self {
        let location = match (row.location_lat, row.location_lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        };
        Self {
            id: row.id,
            full_name: row.full_name,
            phone: row.phone.filter(|s| !s.trim().is_empty()),
            email: row.email.filter(|s| !s.trim().is_empty()),
            location,
            hourly_rate: row.hourly_rate,
            rating: row.rating,
            specializations: row.specializations,
            is_verified: row.is_verified,
            is_active: row.is_active,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    client_id: String,
    provider_id: Uuid,
    status: String,
    scheduled_at: DateTime<Utc>,
    duration_hours: f64,
    client_location_lat: f64,
    client_location_lng: f64,
    location_label: Option<String>,
    service_type: Option<String>,
    payment_method: Option<String>,
    total_amount: f64,
    booking_reference: String,
    otp_code: String,
    requirements: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = Error;

    fn try_from(row: BookingRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            client_id: row.client_id,
            provider_id: row.provider_id,
            status: row.status.parse()?,
            scheduled_at: row.scheduled_at,
            duration_hours: row.duration_hours,
            origin: GeoPoint::new(row.client_location_lat, row.client_location_lng),
            location_label: row.location_label,
            service_type: row.service_type,
            payment_method: row.payment_method,
            total_amount: row.total_amount,
            booking_reference: row.booking_reference.parse()?,
            otp_code: row.otp_code.parse()?,
            requirements: row.requirements,
            created_at: row.created_at,
        })
    }
}

fn active_statuses() -> Vec<&'static str> {
    BookingStatus::ACTIVE.iter().map(|s| s.as_str()).collect()
}

fn is_duplicate_reference(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db.constraint() == Some(ACTIVE_REFERENCE_INDEX)
        }
        _ => false,
    }
}

#[async_trait]
impl ProviderStore for PgStore {
    async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>> {
        let row = sqlx::query_as::<_, ProviderRow>(
            r#"
            SELECT id, full_name, phone, email, location_lat, location_lng,
                   hourly_rate, rating, specializations, is_verified, is_active
            FROM providers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Provider::from))
    }

    async fn list_bookable(&self) -> Result<Vec<Provider>> {
        let rows = sqlx::query_as::<_, ProviderRow>(
            r#"
            SELECT id, full_name, phone, email, location_lat, location_lng,
                   hourly_rate, rating, specializations, is_verified, is_active
            FROM providers
            WHERE is_verified = TRUE AND is_active = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Loaded bookable providers");
        Ok(rows.into_iter().map(Provider::from).collect())
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn reference_in_use(&self, reference: BookingReference) -> Result<bool> {
        let in_use: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM bookings
                WHERE booking_reference = $1 AND status = ANY($2)
            )
            "#,
        )
        .bind(reference.to_string())
        .bind(active_statuses())
        .fetch_one(&self.pool)
        .await?;

        Ok(in_use)
    }

    async fn insert_booking(&self, booking: NewBooking, max_active: usize) -> Result<Booking> {
        let mut tx = self.pool.begin().await?;

        // Serialises every booking write for this client until commit. Taken
        // before the provider row so all writers lock in the same order.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&booking.client_id)
            .execute(&mut *tx)
            .await?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings WHERE client_id = $1 AND status = ANY($2)",
        )
        .bind(&booking.client_id)
        .bind(active_statuses())
        .fetch_one(&mut *tx)
        .await?;
        let active = usize::try_from(active).unwrap_or(0);
        if active >= max_active {
            return Err(Error::BookingLimit {
                active,
                max: max_active,
            });
        }

        // Serialises every booking write for this provider until commit.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM providers WHERE id = $1 FOR UPDATE")
                .bind(booking.provider_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(Error::NotFound(format!("Provider {}", booking.provider_id)));
        }

        let window = booking.window();
        let overlapping: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM bookings
                WHERE provider_id = $1
                  AND status = ANY($2)
                  AND scheduled_at < $4
                  AND scheduled_at + make_interval(mins => (duration_hours * 60)::int) > $3
            )
            "#,
        )
        .bind(booking.provider_id)
        .bind(active_statuses())
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&mut *tx)
        .await?;

        if overlapping {
            return Err(Error::Conflict(format!(
                "Provider {} is already booked for that time",
                booking.provider_id
            )));
        }

        let reference = booking.booking_reference.to_string();
        let inserted = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            INSERT INTO bookings (
                client_id, provider_id, status, scheduled_at, duration_hours,
                client_location_lat, client_location_lng, location_label, service_type,
                payment_method, total_amount, booking_reference, otp_code, requirements
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(&booking.client_id)
        .bind(booking.provider_id)
        .bind(BookingStatus::Pending.as_str())
        .bind(booking.scheduled_at)
        .bind(booking.duration_hours)
        .bind(booking.origin.lat)
        .bind(booking.origin.lng)
        .bind(&booking.location_label)
        .bind(&booking.service_type)
        .bind(&booking.payment_method)
        .bind(booking.total_amount)
        .bind(&reference)
        .bind(booking.otp_code.to_string())
        .bind(&booking.requirements)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_duplicate_reference(&e) {
                Error::DuplicateReference(reference.clone())
            } else {
                Error::Database(e)
            }
        })?;

        tx.commit().await?;

        info!(
            booking_reference = %reference,
            provider_id = %booking.provider_id,
            "Booking inserted"
        );
        Booking::try_from(inserted)
    }

    async fn count_active_for_client(&self, client_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings WHERE client_id = $1 AND status = ANY($2)",
        )
        .bind(client_id)
        .bind(active_statuses())
        .fetch_one(&self.pool)
        .await?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn find_by_reference(&self, reference: BookingReference) -> Result<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            SELECT {}
            FROM bookings
            WHERE booking_reference = $1
            ORDER BY (status = ANY($2)) DESC, created_at DESC
            LIMIT 1
            "#,
            BOOKING_COLUMNS
        ))
        .bind(reference.to_string())
        .bind(active_statuses())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if row.is_none() {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM bookings WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?;
            if !exists {
                return Err(Error::NotFound(format!("Booking {}", id)));
            }
        }

        row.map(Booking::try_from).transpose()
    }
}
