//! Configuration management for Lambda functions.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database host
    pub db_host: String,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: String,
    /// AWS region
    pub aws_region: String,
    /// Matching, booking and notification tunables
    pub dispatch: DispatchSettings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config(format!("{} not set", key)))
        };

        Ok(Self {
            db_host: required("DB_HOST")?,
            db_name: lookup("DB_NAME").unwrap_or_else(|| "aerohive".to_string()),
            db_secret_arn: required("DB_SECRET_ARN")?,
            aws_region: lookup("AWS_REGION").unwrap_or_else(|| "ap-south-1".to_string()),
            dispatch: DispatchSettings::from_lookup(&lookup)?,
        })
    }
}

/// Tunables for the dispatch flow. None of these are hidden literals.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Radius used for the first provider search
    pub search_radius_km: f64,
    /// Ascending radii offered when a search comes back empty
    pub radius_tiers_km: Vec<f64>,
    /// Duration applied when the request does not carry one
    pub default_duration_hours: f64,
    /// Attempts at drawing an unused booking reference
    pub reference_retry_limit: u32,
    /// Active bookings a single client may hold
    pub max_active_bookings: usize,
    /// Attempts at the booking write before reporting failure
    pub persist_max_attempts: u32,
    pub match_timeout: Duration,
    pub geolocation_timeout: Duration,
    pub booking_timeout: Duration,
    pub send_timeout: Duration,
    /// Email send endpoint. Email is disabled when unset.
    pub notify_endpoint_url: Option<String>,
    pub sms_enabled: bool,
    /// Base for tracking and accept-job links
    pub public_base_url: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            search_radius_km: 10.0,
            radius_tiers_km: vec![10.0, 20.0, 50.0],
            default_duration_hours: 2.0,
            reference_retry_limit: 5,
            max_active_bookings: 2,
            persist_max_attempts: 3,
            match_timeout: Duration::from_secs(15),
            geolocation_timeout: Duration::from_secs(15),
            booking_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(10),
            notify_endpoint_url: None,
            sms_enabled: false,
            public_base_url: "https://aerohive.co.in".to_string(),
        }
    }
}

impl DispatchSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let search_radius_km = parse_or(lookup, "SEARCH_RADIUS_KM", defaults.search_radius_km)?;
        if !is_positive(search_radius_km) {
            return Err(Error::Config("SEARCH_RADIUS_KM must be positive".to_string()));
        }

        let radius_tiers_km = match lookup("RADIUS_TIERS_KM") {
            Some(raw) => parse_tiers(&raw)?,
            None => defaults.radius_tiers_km,
        };

        let default_duration_hours =
            parse_or(lookup, "DEFAULT_DURATION_HOURS", defaults.default_duration_hours)?;
        if !is_positive(default_duration_hours) {
            return Err(Error::Config("DEFAULT_DURATION_HOURS must be positive".to_string()));
        }

        let secs = |key: &str, default: Duration| -> Result<Duration> {
            parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
        };

        Ok(Self {
            search_radius_km,
            radius_tiers_km,
            default_duration_hours,
            reference_retry_limit: parse_or(
                lookup,
                "REFERENCE_RETRY_LIMIT",
                defaults.reference_retry_limit,
            )?
            .max(1),
            max_active_bookings: parse_or(lookup, "MAX_ACTIVE_BOOKINGS", defaults.max_active_bookings)?,
            persist_max_attempts: parse_or(
                lookup,
                "PERSIST_MAX_ATTEMPTS",
                defaults.persist_max_attempts,
            )?
            .max(1),
            match_timeout: secs("MATCH_TIMEOUT_SECS", defaults.match_timeout)?,
            geolocation_timeout: secs("GEOLOCATION_TIMEOUT_SECS", defaults.geolocation_timeout)?,
            booking_timeout: secs("BOOKING_TIMEOUT_SECS", defaults.booking_timeout)?,
            send_timeout: secs("SEND_TIMEOUT_SECS", defaults.send_timeout)?,
            notify_endpoint_url: lookup("NOTIFY_ENDPOINT_URL").filter(|url| !url.trim().is_empty()),
            sms_enabled: parse_or(lookup, "SMS_ENABLED", defaults.sms_enabled)?,
            public_base_url: lookup("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
        })
    }

    /// Next tier strictly wider than `current`, if any.
    pub fn next_radius(&self, current: f64) -> Option<f64> {
        self.radius_tiers_km.iter().copied().find(|tier| *tier > current)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn parse_tiers(raw: &str) -> Result<Vec<f64>> {
    let mut tiers = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|e| Error::Config(format!("Invalid RADIUS_TIERS_KM entry {}: {}", s, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    if tiers.is_empty() || tiers.iter().any(|t| !is_positive(*t)) {
        return Err(Error::Config("RADIUS_TIERS_KM must list positive radii".to_string()));
    }

    tiers.sort_by(|a, b| a.total_cmp(b));
    tiers.dedup();
    Ok(tiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = DispatchSettings::from_lookup(&lookup_from(&[])).unwrap();
        assert_eq!(settings.search_radius_km, 10.0);
        assert_eq!(settings.default_duration_hours, 2.0);
        assert_eq!(settings.reference_retry_limit, 5);
        assert_eq!(settings.radius_tiers_km, vec![10.0, 20.0, 50.0]);
        assert!(settings.notify_endpoint_url.is_none());
    }

    #[test]
    fn test_overrides_and_tier_sorting() {
        let settings = DispatchSettings::from_lookup(&lookup_from(&[
            ("SEARCH_RADIUS_KM", "5"),
            ("RADIUS_TIERS_KM", "50, 5,20,20"),
            ("SEND_TIMEOUT_SECS", "3"),
            ("SMS_ENABLED", "true"),
            ("PUBLIC_BASE_URL", "https://example.test/"),
        ]))
        .unwrap();

        assert_eq!(settings.search_radius_km, 5.0);
        assert_eq!(settings.radius_tiers_km, vec![5.0, 20.0, 50.0]);
        assert_eq!(settings.send_timeout, Duration::from_secs(3));
        assert!(settings.sms_enabled);
        assert_eq!(settings.public_base_url, "https://example.test");
        assert_eq!(settings.next_radius(5.0), Some(20.0));
        assert_eq!(settings.next_radius(50.0), None);
    }

    #[test]
    fn test_malformed_values_are_config_errors() {
        let err = DispatchSettings::from_lookup(&lookup_from(&[("MAX_ACTIVE_BOOKINGS", "two")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = DispatchSettings::from_lookup(&lookup_from(&[("RADIUS_TIERS_KM", "10,-5")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_radius_must_be_a_positive_number() {
        for raw in ["NaN", "inf", "0", "-3"] {
            let err = DispatchSettings::from_lookup(&lookup_from(&[("SEARCH_RADIUS_KM", raw)]))
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{raw} accepted");
        }

        let err = DispatchSettings::from_lookup(&lookup_from(&[("DEFAULT_DURATION_HOURS", "NaN")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = DispatchSettings::from_lookup(&lookup_from(&[("RADIUS_TIERS_KM", "10,NaN")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_database_host() {
        let err = Config::from_lookup(lookup_from(&[("DB_SECRET_ARN", "arn:secret")])).unwrap_err();
        assert!(err.to_string().contains("DB_HOST"));
    }
}
