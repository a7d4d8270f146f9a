//! Proximity matching of providers around a client location.

use serde::Serialize;

use crate::models::{GeoPoint, Provider};

/// Mean Earth radius used by the spherical approximation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A provider within range, with its great-circle distance from the origin.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub provider: Provider,
    pub distance_km: f64,
}

/// Great-circle distance in kilometres (haversine).
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    // Clamp guards against rounding pushing h slightly outside [0, 1].
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Active, verified providers within `radius_km` of `origin`.
///
/// Ordered by distance ascending, then rating descending, then id, so the
/// result is deterministic. Providers without coordinates are skipped.
pub fn find_nearby(origin: GeoPoint, radius_km: f64, providers: &[Provider]) -> Vec<Candidate> {
    if !origin.is_valid() || !radius_km.is_finite() || radius_km < 0.0 {
        return Vec::new();
    }

    let mut candidates: Vec<Candidate> = providers
        .iter()
        .filter(|p| p.is_bookable())
        .filter_map(|p| {
            let location = p.location.filter(GeoPoint::is_valid)?;
            let distance_km = haversine_km(origin, location);
            (distance_km <= radius_km).then(|| Candidate {
                provider: p.clone(),
                distance_km,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| b.provider.rating.total_cmp(&a.provider.rating))
            .then_with(|| a.provider.id.cmp(&b.provider.id))
    });

    candidates
}

/// Format distance for display
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{}m", (km * 1000.0) as i32)
    } else if km < 10.0 {
        format!("{:.1}km", km)
    } else {
        format!("{}km", km as i32)
    }
}
