//! Chat socket Lambda - Drives booking conversations over an API Gateway
//! WebSocket API.
//!
//! Routes:
//! - $connect - Open a session (optional `token` query parameter signs the client in)
//! - $default - One client action per frame; replies come back as the route response.
//!   A booking's notification report follows on a later frame, or on
//!   request with `delivery_status`.
//! - $disconnect - Discard the session

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use shared::notify::NotificationDispatcher;
use shared::session::{ClientMessage, Event, Reply, SessionRegistry, SessionServices};
use shared::store::PgStore;
use shared::{validate_token, BookingCoordinator, Config};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// The parts of an API Gateway WebSocket event this function reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebSocketEvent {
    request_context: WebSocketContext,
    #[serde(default)]
    query_string_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebSocketContext {
    route_key: String,
    connection_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SocketResponse {
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReplyFrame<'a> {
    replies: &'a [Reply],
}

impl SocketResponse {
    fn status(status_code: u16) -> Self {
        Self {
            status_code,
            body: None,
        }
    }

    fn replies(replies: &[Reply]) -> Result<Self, Error> {
        Ok(Self {
            status_code: 200,
            body: Some(serde_json::to_string(&ReplyFrame { replies })?),
        })
    }
}

struct AppState {
    registry: SessionRegistry,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let pool = shared::db::connect(&config, &aws).await?;
        let store = Arc::new(PgStore::new(pool));

        let services = SessionServices {
            providers: store.clone(),
            dispatcher: NotificationDispatcher::from_settings(&config.dispatch, &aws),
            coordinator: BookingCoordinator::new(store.clone(), store, config.dispatch),
        };

        Ok(Self {
            registry: SessionRegistry::new(Arc::new(services)),
        })
    }
}

/// What one client frame asks for.
#[derive(Debug)]
enum Frame {
    Events(Vec<Event>),
    DeliveryStatus,
}

/// Turn one frame into session events.
///
/// A frame that is not a known action ends the conversation. A sign-in that
/// fails is answered without touching the session.
fn read_frame(body: Option<&str>) -> Result<Frame, Reply> {
    let message: ClientMessage = match serde_json::from_str(body.unwrap_or_default()) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Unreadable client frame");
            return Ok(Frame::Events(vec![Event::Abort(
                "This chat received a message it could not understand. Please start over."
                    .to_string(),
            )]));
        }
    };
    if matches!(message, ClientMessage::DeliveryStatus) {
        return Ok(Frame::DeliveryStatus);
    }

    message.into_events().map(Frame::Events).map_err(|e| {
        warn!(error = %e, "Client sign-in failed");
        Reply::AuthRequired {
            text: "Sign-in failed. Please sign in again to confirm your booking.".to_string(),
        }
    })
}

async fn handler(
    state: Arc<AppState>,
    event: LambdaEvent<WebSocketEvent>,
) -> Result<SocketResponse, Error> {
    let (event, _context) = event.into_parts();
    let connection_id = event.request_context.connection_id.as_str();
    let route = event.request_context.route_key.as_str();

    info!(route, connection_id, "Socket event");

    match route {
        "$connect" => {
            let token = event
                .query_string_parameters
                .as_ref()
                .and_then(|params| params.get("token"))
                .filter(|token| !token.is_empty());

            let identity = match token.map(|t| validate_token(t)).transpose() {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(connection_id, error = %e, "Rejecting connection with bad token");
                    return Ok(SocketResponse::status(401));
                }
            };

            state.registry.open(connection_id, identity);
            Ok(SocketResponse::status(200))
        }

        "$disconnect" => {
            state.registry.close(connection_id);
            Ok(SocketResponse::status(200))
        }

        _ => {
            let events = match read_frame(event.body.as_deref()) {
                Ok(Frame::Events(events)) => events,
                Ok(Frame::DeliveryStatus) => {
                    let replies = state.registry.delivery(connection_id).await;
                    return SocketResponse::replies(&replies);
                }
                Err(reply) => return SocketResponse::replies(&[reply]),
            };

            let mut replies = Vec::new();
            for event in events {
                match state.registry.dispatch(connection_id, event).await {
                    Some(produced) => replies.extend(produced),
                    None => {
                        warn!(connection_id, "Frame for unknown connection");
                        return Ok(SocketResponse::status(410));
                    }
                }
            }

            SocketResponse::replies(&replies)
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lambda_runtime::Context;
    use shared::notify::{Channel, NotificationJob, NotificationSender};
    use shared::store::MemoryStore;
    use shared::{ClientIdentity, DispatchSettings, GeoPoint, Provider};
    use std::time::Duration;
    use uuid::Uuid;

    /// Accepts a send and never finishes it.
    struct StalledSender;

    #[async_trait]
    impl NotificationSender for StalledSender {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, _to: &str, _job: &NotificationJob) -> shared::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn pilot() -> Provider {
        Provider {
            id: Uuid::new_v4(),
            full_name: "Arjun Rao".to_string(),
            phone: Some("9876543210".to_string()),
            email: Some("arjun@example.com".to_string()),
            location: Some(GeoPoint::new(12.98, 77.60)),
            hourly_rate: 1200.0,
            rating: 4.8,
            specializations: vec!["Aerial Photography".to_string()],
            is_verified: true,
            is_active: true,
        }
    }

    fn stalled_state(pilot: Provider) -> Arc<AppState> {
        let store = Arc::new(MemoryStore::with_providers([pilot]));
        let settings = DispatchSettings::default();
        let dispatcher = NotificationDispatcher::new(settings.send_timeout, "https://aerohive.test")
            .with_sender(Arc::new(StalledSender));
        let services = SessionServices {
            providers: store.clone(),
            coordinator: BookingCoordinator::new(store.clone(), store, settings),
            dispatcher,
        };
        Arc::new(AppState {
            registry: SessionRegistry::new(Arc::new(services)),
        })
    }

    async fn send(state: &Arc<AppState>, connection_id: &str, body: String) -> serde_json::Value {
        let event = WebSocketEvent {
            request_context: WebSocketContext {
                route_key: "$default".to_string(),
                connection_id: connection_id.to_string(),
            },
            query_string_parameters: None,
            body: Some(body),
        };
        let response = handler(Arc::clone(state), LambdaEvent::new(event, Context::default()))
            .await
            .unwrap();
        assert_eq!(response.status_code, 200);
        serde_json::from_str(response.body.as_deref().unwrap()).unwrap()
    }

    fn has_reply(frame: &serde_json::Value, kind: &str) -> bool {
        frame["replies"]
            .as_array()
            .unwrap()
            .iter()
            .any(|r| r["type"] == kind)
    }

    #[test]
    fn test_event_shape() {
        let raw = r#"{
            "requestContext": {"routeKey": "$default", "connectionId": "abc=", "stage": "prod"},
            "body": "{\"action\":\"message\",\"text\":\"Roof survey\"}",
            "isBase64Encoded": false
        }"#;
        let event: WebSocketEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.request_context.route_key, "$default");
        assert!(event.query_string_parameters.is_none());

        let frame = read_frame(event.body.as_deref()).unwrap();
        assert!(matches!(&frame, Frame::Events(events) if matches!(&events[..], [Event::UserText(t)] if t == "Roof survey")));
    }

    #[test]
    fn test_garbage_frame_aborts() {
        for body in [Some("not json"), None] {
            let frame = read_frame(body).unwrap();
            assert!(matches!(&frame, Frame::Events(events) if matches!(&events[..], [Event::Abort(_)])));
        }

        let frame = read_frame(Some(r#"{"action":"delivery_status"}"#)).unwrap();
        assert!(matches!(frame, Frame::DeliveryStatus));
    }

    #[test]
    fn test_bad_token_answers_without_events() {
        let reply = read_frame(Some(r#"{"action":"authenticate","token":"nope"}"#)).unwrap_err();
        assert!(matches!(reply, Reply::AuthRequired { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_does_not_wait_for_notifications() {
        let pilot = pilot();
        let state = stalled_state(pilot.clone());
        state.registry.open(
            "conn-1",
            Some(ClientIdentity {
                client_id: "client-1".to_string(),
                name: Some("Asha".to_string()),
                phone: Some("9123456780".to_string()),
                email: Some("asha@example.com".to_string()),
            }),
        );

        for body in [
            r#"{"action":"start"}"#.to_string(),
            r#"{"action":"message","text":"Aerial photography of a wedding"}"#.to_string(),
            r#"{"action":"share_location","lat":12.9716,"lng":77.5946}"#.to_string(),
            format!(r#"{{"action":"select_provider","provider_id":"{}"}}"#, pilot.id),
        ] {
            send(&state, "conn-1", body).await;
        }

        let before = tokio::time::Instant::now();
        let frame = send(&state, "conn-1", r#"{"action":"confirm"}"#.to_string()).await;
        assert_eq!(tokio::time::Instant::now(), before);
        assert!(has_reply(&frame, "booked"));
        assert!(!has_reply(&frame, "delivery"));

        let frame = send(&state, "conn-1", r#"{"action":"delivery_status"}"#.to_string()).await;
        assert!(has_reply(&frame, "delivery"));
        assert_eq!(frame["replies"][0]["emails_sent"], 0);
    }

    #[test]
    fn test_reply_frame_shape() {
        let response = SocketResponse::replies(&[Reply::prompt("hi")]).unwrap();
        let body: serde_json::Value = serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["replies"][0]["type"], "prompt");
        assert_eq!(body["replies"][0]["text"], "hi");
    }
}
