use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::booking::BookingCoordinator;
use crate::config::DispatchSettings;
use crate::geo::find_nearby;
use crate::http::ErrorBody;
use crate::models::{ClientIdentity, GeoPoint, ServiceRequest};
use crate::notify::{DeliverySummary, NotificationDispatcher};
use crate::store::ProviderStore;

use super::effect::Effect;
use super::event::Event;
use super::reply::Reply;
use super::state::ChatSession;
use super::transition::{transition, Transition};

/// Everything a session needs to talk to the outside world.
pub struct SessionServices {
    pub providers: Arc<dyn ProviderStore>,
    pub coordinator: BookingCoordinator,
    pub dispatcher: NotificationDispatcher,
}

impl SessionServices {
    pub fn settings(&self) -> &DispatchSettings {
        self.coordinator.settings()
    }
}

/// Runs one session: applies events, performs the effects they ask for and
/// feeds the results back in until the session settles.
pub struct SessionDriver {
    session: ChatSession,
    services: Arc<SessionServices>,
    location_deadline: Option<Instant>,
    pending_delivery: Option<JoinHandle<DeliverySummary>>,
}

impl SessionDriver {
    pub fn new(services: Arc<SessionServices>, identity: Option<ClientIdentity>) -> Self {
        let radius_km = services.settings().search_radius_km;
        Self {
            session: ChatSession::new(radius_km, identity),
            services,
            location_deadline: None,
            pending_delivery: None,
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Apply a client or surface event and return every reply it produced.
    ///
    /// A notification report that finished since the last event comes first.
    /// A location that was asked for but never arrived fails the session
    /// before `event` is looked at, so a late fix is ignored.
    pub async fn handle(&mut self, event: Event) -> Vec<Reply> {
        let mut replies = self.finished_delivery().await;

        if self.location_expired() {
            let waited = self.services.settings().geolocation_timeout;
            info!(waited_secs = waited.as_secs(), "Location never arrived");
            replies.extend(
                self.run(Event::LocationFailed(format!(
                    "no location received within {} seconds",
                    waited.as_secs()
                )))
                .await,
            );
        }

        replies.extend(self.run(event).await);
        replies
    }

    /// Wait for the notification fan-out started by a booking, if any, and
    /// apply its report.
    pub async fn delivery_report(&mut self) -> Vec<Reply> {
        let Some(handle) = self.pending_delivery.take() else {
            return Vec::new();
        };

        match handle.await {
            Ok(summary) => self.run(Event::DeliveryReported(summary)).await,
            Err(e) => {
                error!(error = %e, "Notification task failed");
                Vec::new()
            }
        }
    }

    /// The notification report, only if the fan-out already finished.
    async fn finished_delivery(&mut self) -> Vec<Reply> {
        let finished = self
            .pending_delivery
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(false);
        if finished {
            self.delivery_report().await
        } else {
            Vec::new()
        }
    }

    fn location_expired(&self) -> bool {
        self.session.awaiting_location
            && self
                .location_deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }

    async fn run(&mut self, event: Event) -> Vec<Reply> {
        let mut replies = Vec::new();
        let mut next = Some(event);

        while let Some(event) = next.take() {
            let from = self.session.state;
            let Transition {
                session,
                replies: produced,
                effect,
            } = transition(
                std::mem::take(&mut self.session),
                event,
                self.services.settings(),
            );
            self.session = session;
            if from != self.session.state {
                debug!(from = from.as_str(), to = self.session.state.as_str(), "Session moved");
            }
            replies.extend(produced);

            if let Some(effect) = effect {
                next = self.perform(effect).await;
            }
        }

        if !self.session.awaiting_location {
            self.location_deadline = None;
        }
        replies
    }

    async fn perform(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::AwaitLocation => {
                self.location_deadline =
                    Some(Instant::now() + self.services.settings().geolocation_timeout);
                None
            }
            Effect::FindProviders { origin, radius_km } => {
                Some(self.find_providers(origin, radius_km).await)
            }
            Effect::CreateBooking {
                request,
                provider_id,
                client,
            } => Some(self.create_booking(request, provider_id, client).await),
            Effect::Notify(confirmation) => {
                let services = Arc::clone(&self.services);
                self.pending_delivery = Some(tokio::spawn(async move {
                    services.dispatcher.dispatch(&confirmation).await
                }));
                None
            }
        }
    }

    async fn find_providers(&self, origin: GeoPoint, radius_km: f64) -> Event {
        let timeout = self.services.settings().match_timeout;

        match tokio::time::timeout(timeout, self.services.providers.list_bookable()).await {
            Ok(Ok(providers)) => {
                let candidates = find_nearby(origin, radius_km, &providers);
                info!(radius_km, found = candidates.len(), "Provider search finished");
                Event::MatchesReady {
                    radius_km,
                    candidates,
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Provider search failed");
                Event::SearchFailed("Couldn't search for pilots right now. Please try again.".to_string())
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Provider search timed out");
                Event::SearchFailed("The pilot search took too long. Please try again.".to_string())
            }
        }
    }

    async fn create_booking(
        &self,
        request: ServiceRequest,
        provider_id: Uuid,
        client: ClientIdentity,
    ) -> Event {
        let timeout = self.services.settings().booking_timeout;
        let attempt = self
            .services
            .coordinator
            .create_booking(&request, provider_id, &client);

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(confirmation)) => Event::Booked(Box::new(confirmation)),
            Ok(Err(e)) => {
                warn!(provider_id = %provider_id, error = %e, "Booking rejected");
                let body = ErrorBody::from(&e);
                Event::BookingFailed {
                    kind: body.kind,
                    message: body.error,
                }
            }
            Err(_) => {
                warn!(provider_id = %provider_id, timeout_secs = timeout.as_secs(), "Booking timed out");
                Event::BookingFailed {
                    kind: "timeout",
                    message: "The booking did not complete in time. Check your bookings before trying again."
                        .to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::EARTH_RADIUS_KM;
    use crate::models::{BookingStatus, Provider};
    use crate::notify::{Channel, NotificationJob, NotificationSender};
    use crate::session::state::{ChatState, ErrorKind};
    use crate::store::MemoryStore;
    use crate::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    const ORIGIN: GeoPoint = GeoPoint {
        lat: 12.9716,
        lng: 77.5946,
    };

    struct RecordingSender {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, to: &str, _job: &NotificationJob) -> Result<()> {
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    /// Never answers.
    struct StalledProviders;

    #[async_trait]
    impl ProviderStore for StalledProviders {
        async fn get_provider(&self, _id: Uuid) -> Result<Option<Provider>> {
            Ok(None)
        }

        async fn list_bookable(&self) -> Result<Vec<Provider>> {
            std::future::pending().await
        }
    }

    fn provider_at(name: &str, km: f64, rating: f64) -> Provider {
        Provider {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            phone: Some("9876543210".to_string()),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            location: Some(GeoPoint::new(
                ORIGIN.lat + (km / EARTH_RADIUS_KM).to_degrees(),
                ORIGIN.lng,
            )),
            hourly_rate: 1000.0,
            rating,
            specializations: vec!["Aerial Photography".to_string()],
            is_verified: true,
            is_active: true,
        }
    }

    fn identity() -> ClientIdentity {
        ClientIdentity {
            client_id: "client-1".to_string(),
            name: Some("Asha".to_string()),
            phone: Some("9123456780".to_string()),
            email: Some("asha@example.com".to_string()),
        }
    }

    fn services(
        store: Arc<MemoryStore>,
        sender: Arc<RecordingSender>,
    ) -> Arc<SessionServices> {
        let settings = DispatchSettings::default();
        let dispatcher = NotificationDispatcher::new(settings.send_timeout, "https://aerohive.test")
            .with_sender(sender);
        Arc::new(SessionServices {
            providers: store.clone(),
            coordinator: BookingCoordinator::new(store.clone(), store, settings),
            dispatcher,
        })
    }

    fn recorder() -> Arc<RecordingSender> {
        Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        })
    }

    async fn at_location(driver: &mut SessionDriver) -> Vec<Reply> {
        driver.handle(Event::Open).await;
        driver
            .handle(Event::UserText("Aerial photography of a wedding".to_string()))
            .await;
        driver.handle(Event::ShareLocation).await;
        driver
            .handle(Event::LocationResolved {
                point: ORIGIN,
                label: Some("Indiranagar".to_string()),
            })
            .await
    }

    #[tokio::test]
    async fn test_nearby_providers_are_listed_nearest_first() {
        let store = Arc::new(MemoryStore::with_providers([
            provider_at("Near", 3.2, 4.0),
            provider_at("Mid", 7.5, 4.9),
            provider_at("Far", 12.0, 5.0),
        ]));
        let mut driver = SessionDriver::new(services(store, recorder()), None);

        let replies = at_location(&mut driver).await;

        assert_eq!(driver.session().state, ChatState::Results);
        let listed: Vec<_> = replies
            .iter()
            .find_map(|r| match r {
                Reply::Candidates { providers, .. } => Some(
                    providers
                        .iter()
                        .map(|p| (p.name.clone(), p.distance_km))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
            .unwrap();
        assert_eq!(listed, vec![("Near".to_string(), 3.2), ("Mid".to_string(), 7.5)]);
    }

    #[tokio::test]
    async fn test_full_booking_flow_notifies_after_success() {
        let pilot = provider_at("Arjun", 2.0, 4.8);
        let store = Arc::new(MemoryStore::with_providers([pilot.clone()]));
        let sender = recorder();
        let mut driver = SessionDriver::new(services(store.clone(), sender.clone()), Some(identity()));

        at_location(&mut driver).await;
        driver.handle(Event::SelectProvider(pilot.id)).await;
        let replies = driver.handle(Event::Confirm).await;

        assert_eq!(driver.session().state, ChatState::Success);
        let booked = replies
            .iter()
            .find_map(|r| match r {
                Reply::Booked { otp, pilot_name, .. } => Some((otp.clone(), pilot_name.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(booked.1, "Arjun");

        let stored = store.bookings();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, BookingStatus::Pending);
        assert_eq!(stored[0].otp_code.to_string(), booked.0);

        let replies = driver.delivery_report().await;
        assert!(matches!(
            replies[..],
            [Reply::Delivery {
                emails_sent: 2,
                client_email_sent: true,
                pilot_email_sent: true
            }]
        ));
        assert_eq!(sender.sent.lock().unwrap().len(), 2);
        assert!(driver.delivery_report().await.is_empty());
    }

    #[tokio::test]
    async fn test_finished_delivery_rides_on_next_event() {
        let pilot = provider_at("Arjun", 2.0, 4.8);
        let store = Arc::new(MemoryStore::with_providers([pilot.clone()]));
        let mut driver = SessionDriver::new(services(store, recorder()), Some(identity()));

        at_location(&mut driver).await;
        driver.handle(Event::SelectProvider(pilot.id)).await;
        let replies = driver.handle(Event::Confirm).await;
        assert!(!replies.iter().any(|r| matches!(r, Reply::Delivery { .. })));

        while !driver
            .pending_delivery
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
        {
            tokio::task::yield_now().await;
        }

        let replies = driver.handle(Event::UserText("thanks".to_string())).await;
        assert!(matches!(replies[..], [Reply::Delivery { emails_sent: 2, .. }]));
        assert!(driver.delivery_report().await.is_empty());
    }

    #[tokio::test]
    async fn test_denied_location_then_retry() {
        let store = Arc::new(MemoryStore::with_providers([provider_at("Near", 3.0, 4.0)]));
        let mut driver = SessionDriver::new(services(store, recorder()), None);

        driver.handle(Event::Open).await;
        driver.handle(Event::UserText("Survey".to_string())).await;
        driver.handle(Event::ShareLocation).await;
        let replies = driver
            .handle(Event::LocationFailed("permission denied".to_string()))
            .await;

        assert_eq!(driver.session().state, ChatState::Error(ErrorKind::Geolocation));
        assert!(replies.iter().any(|r| matches!(
            r,
            Reply::Error { can_retry_location: true, .. }
        )));

        driver.handle(Event::RetryLocation).await;
        assert_eq!(driver.session().state, ChatState::Location);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_location_is_rejected() {
        let store = Arc::new(MemoryStore::with_providers([provider_at("Near", 3.0, 4.0)]));
        let mut driver = SessionDriver::new(services(store, recorder()), None);

        driver.handle(Event::Open).await;
        driver.handle(Event::UserText("Survey".to_string())).await;
        driver.handle(Event::ShareLocation).await;

        tokio::time::advance(Duration::from_secs(16)).await;
        driver
            .handle(Event::LocationResolved {
                point: ORIGIN,
                label: None,
            })
            .await;

        assert_eq!(driver.session().state, ChatState::Error(ErrorKind::Geolocation));
        assert!(driver.session().origin.is_none());
    }

    #[tokio::test]
    async fn test_empty_area_offers_wider_search() {
        let store = Arc::new(MemoryStore::with_providers([provider_at("Far", 15.0, 4.0)]));
        let mut driver = SessionDriver::new(services(store, recorder()), None);

        at_location(&mut driver).await;
        assert_eq!(driver.session().state, ChatState::Error(ErrorKind::NoMatches));

        driver.handle(Event::ExpandRadius).await;
        assert_eq!(driver.session().state, ChatState::Results);
        assert_eq!(driver.session().radius_km, 20.0);
        assert_eq!(driver.session().candidates.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_search_times_out() {
        let store = Arc::new(MemoryStore::new());
        let settings = DispatchSettings::default();
        let services = Arc::new(SessionServices {
            providers: Arc::new(StalledProviders),
            coordinator: BookingCoordinator::new(store.clone(), store, settings.clone()),
            dispatcher: NotificationDispatcher::new(settings.send_timeout, "https://aerohive.test"),
        });
        let mut driver = SessionDriver::new(services, None);

        at_location(&mut driver).await;
        assert_eq!(driver.session().state, ChatState::Error(ErrorKind::Search));
    }

    #[tokio::test]
    async fn test_rejected_booking_is_reported() {
        let mut pilot = provider_at("NoPhone", 2.0, 4.8);
        pilot.phone = None;
        let store = Arc::new(MemoryStore::with_providers([pilot.clone()]));
        let mut driver = SessionDriver::new(services(store.clone(), recorder()), Some(identity()));

        at_location(&mut driver).await;
        driver.handle(Event::SelectProvider(pilot.id)).await;
        let replies = driver.handle(Event::Confirm).await;

        assert_eq!(driver.session().state, ChatState::Error(ErrorKind::Booking));
        assert!(replies.iter().any(|r| matches!(
            r,
            Reply::Error { kind: "provider_contact_missing", .. }
        )));
        assert!(store.bookings().is_empty());
        assert!(driver.delivery_report().await.is_empty());
    }
}
