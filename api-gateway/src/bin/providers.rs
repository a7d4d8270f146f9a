//! Providers Lambda - Proximity search over bookable pilots.
//!
//! Endpoints:
//! - GET /providers/nearby?lat=..&lng=..[&radius_km=..][&service=..] - Pilots near a point

use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use shared::http::{error_response, error_response_for, json_response, ApiResponse};
use shared::session::CandidateView;
use shared::store::PgStore;
use shared::{find_nearby, Config, DispatchSettings, GeoPoint, ProviderStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    providers: Arc<dyn ProviderStore>,
    settings: DispatchSettings,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let pool = shared::db::connect(&config, &aws).await?;

        Ok(Self {
            providers: Arc::new(PgStore::new(pool)),
            settings: config.dispatch,
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    // Strip /api stage prefix if present (API Gateway REST API includes stage in path)
    let path = raw_path.strip_prefix("/api").unwrap_or(raw_path);
    let method = event.method().as_str();

    info!("Providers request: {} {}", method, path);

    match (method, path) {
        ("GET", "/providers/nearby") => {
            let params = event.query_string_parameters();

            let lat: Option<f64> = params.first("lat").and_then(|l| l.parse().ok());
            // Support both 'lng' and 'lon' parameter names
            let lng: Option<f64> = params
                .first("lng")
                .or_else(|| params.first("lon"))
                .and_then(|l| l.parse().ok());
            let origin = match (lat, lng) {
                (Some(lat), Some(lng)) if GeoPoint::new(lat, lng).is_valid() => {
                    GeoPoint::new(lat, lng)
                }
                _ => {
                    return error_response(
                        400,
                        "validation_error",
                        "lat and lng must be valid coordinates",
                    );
                }
            };
            let radius_km: f64 = params
                .first("radius_km")
                .and_then(|r| r.parse().ok())
                .filter(|r: &f64| r.is_finite() && *r > 0.0)
                .unwrap_or(state.settings.search_radius_km);
            let service = params.first("service").filter(|s| !s.trim().is_empty());

            let listed =
                tokio::time::timeout(state.settings.match_timeout, state.providers.list_bookable())
                    .await;
            let mut providers = match listed {
                Ok(Ok(providers)) => providers,
                Ok(Err(e)) => return error_response_for(&e),
                Err(_) => {
                    return error_response_for(&shared::Error::Timeout(
                        "provider search".to_string(),
                    ))
                }
            };
            if let Some(service) = service {
                providers.retain(|p| p.offers(service));
            }

            let results: Vec<CandidateView> = find_nearby(origin, radius_km, &providers)
                .iter()
                .map(CandidateView::from)
                .collect();

            json_response(
                200,
                &ApiResponse::success(serde_json::json!({
                    "center": {"lat": origin.lat, "lng": origin.lng},
                    "radius_km": radius_km,
                    "next_radius_km": state.settings.next_radius(radius_km),
                    "count": results.len(),
                    "results": results,
                })),
            )
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
