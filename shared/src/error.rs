//! Error types for the booking dispatch services.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while matching, booking and notifying.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed request fields. No side effects were taken.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The client could not share a location (denied, unsupported, timed out).
    #[error("Geolocation error: {0}")]
    Geolocation(String),

    /// No provider within the search radius.
    #[error("No providers found within {radius_km} km")]
    MatchNotFound { radius_km: f64 },

    /// Booking reference generation ran out of attempts.
    #[error("Booking reference space exhausted after {attempts} attempts")]
    Collision { attempts: u32 },

    /// Reference already held by an active booking. Used to trigger regeneration.
    #[error("Booking reference {0} is already in use")]
    DuplicateReference(String),

    /// The booking could not be durably recorded.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Provider already holds an overlapping active booking.
    #[error("Provider unavailable: {0}")]
    Conflict(String),

    /// Client reached the active booking limit.
    #[error("Active booking limit reached ({active}/{max})")]
    BookingLimit { active: usize, max: usize },

    /// Provider record lacks a contact field required for a real booking.
    #[error("Provider contact details incomplete: missing {0}")]
    ProviderContactMissing(&'static str),

    /// OTP presented at service start did not match.
    #[error("Invalid OTP")]
    InvalidOtp,

    /// Status change not allowed by the booking lifecycle.
    #[error("Cannot move booking from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A single notification send failed.
    #[error("Notification error: {0}")]
    Notification(String),

    /// An external call did not answer in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Authorization error
    #[error("Authorization error: {0}")]
    Unauthorized(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::Geolocation(_) => 400,
            Error::Auth(_) | Error::InvalidOtp => 401,
            Error::Unauthorized(_) => 403,
            Error::NotFound(_) | Error::MatchNotFound { .. } => 404,
            Error::Conflict(_) | Error::InvalidTransition { .. } => 409,
            Error::ProviderContactMissing(_) => 422,
            Error::BookingLimit { .. } => 429,
            Error::Notification(_) | Error::Aws(_) => 502,
            Error::Collision { .. } => 503,
            Error::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Stable tag surfaced to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Geolocation(_) => "geolocation_error",
            Error::MatchNotFound { .. } => "match_not_found",
            Error::Collision { .. } => "collision_error",
            Error::DuplicateReference(_) => "duplicate_reference",
            Error::Persistence(_) | Error::Database(_) => "persistence_error",
            Error::Conflict(_) => "provider_unavailable",
            Error::BookingLimit { .. } => "booking_limit",
            Error::ProviderContactMissing(_) => "provider_contact_missing",
            Error::InvalidOtp => "invalid_otp",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Notification(_) => "notification_error",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization_error",
            Error::Aws(_) => "aws_error",
            Error::Config(_) => "config_error",
            Error::Auth(_) => "auth_error",
            Error::Unauthorized(_) => "unauthorized",
            Error::NotFound(_) => "not_found",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether a persistence attempt that failed this way may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            // Serialization failures, deadlocks and dropped connections only.
            Error::Database(sqlx::Error::Database(db)) => db
                .code()
                .map(|code| code.starts_with("40") || code.starts_with("08"))
                .unwrap_or(false),
            Error::Database(e) => !matches!(
                e,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::TypeNotFound { .. }
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::ColumnDecode { .. }
            ),
            Error::Persistence(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_is_distinct_from_persistence() {
        let collision = Error::Collision { attempts: 5 };
        let persistence = Error::Persistence("insert failed".to_string());

        assert_ne!(collision.kind(), persistence.kind());
        assert_eq!(collision.status_code(), 503);
        assert_eq!(persistence.status_code(), 500);
    }

    #[test]
    fn test_only_storage_failures_are_transient() {
        assert!(Error::Persistence("connection reset".to_string()).is_transient());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!Error::Conflict("overlap".to_string()).is_transient());
        assert!(!Error::DuplicateReference("#AH-1234".to_string()).is_transient());
        assert!(!Error::Validation("missing client_id".to_string()).is_transient());
    }
}
