//! Pure session transitions. No I/O happens here: the driver runs whatever
//! effect a transition returns and feeds the outcome back as an event.

use crate::config::DispatchSettings;
use crate::geo::format_distance;

use super::effect::Effect;
use super::event::Event;
use super::reply::{CandidateView, Reply};
use super::state::{ChatSession, ChatState, ErrorKind};

const ASK_REQUIREMENTS: &str =
    "Hi! Tell me what you need a drone pilot for (for example: aerial photography of a wedding).";
const ASK_LOCATION: &str = "Got it. Share your location so I can find pilots near you.";

#[derive(Debug)]
pub struct Transition {
    pub session: ChatSession,
    pub replies: Vec<Reply>,
    pub effect: Option<Effect>,
}

impl Transition {
    fn hold(session: ChatSession) -> Self {
        Self {
            session,
            replies: Vec::new(),
            effect: None,
        }
    }

    fn enter(&mut self, state: ChatState) {
        self.session.state = state;
        self.replies.push(Reply::state(state));
    }

    fn say(&mut self, text: impl Into<String>) {
        self.replies.push(Reply::prompt(text));
    }

    fn fail(&mut self, kind: ErrorKind, wire_kind: &'static str, text: String, settings: &DispatchSettings) {
        let can_expand_radius = kind == ErrorKind::NoMatches
            && self.session.origin.is_some()
            && settings.next_radius(self.session.radius_km).is_some();

        self.session.last_error = Some(text.clone());
        self.enter(ChatState::Error(kind));
        self.replies.push(Reply::Error {
            kind: wire_kind,
            text,
            can_expand_radius,
            can_retry_location: kind == ErrorKind::Geolocation,
        });
    }
}

/// Apply one event to a session.
///
/// Events that make no sense in the current state leave the session
/// untouched and produce no replies. While a call is in flight every user
/// event is dropped this way.
pub fn transition(session: ChatSession, event: Event, settings: &DispatchSettings) -> Transition {
    let mut t = Transition::hold(session);
    let state = t.session.state;

    if state.is_busy() && event.is_user_input() {
        return t;
    }

    match (state, event) {
        (ChatState::Init, Event::Open) => {
            t.enter(ChatState::Requirements);
            t.say(ASK_REQUIREMENTS);
        }

        (_, Event::Abort(reason)) if !state.is_terminal() => {
            t.fail(ErrorKind::Aborted, ErrorKind::Aborted.as_str(), reason, settings);
        }

        (_, Event::Authenticated(identity)) => {
            t.session.identity = Some(identity);
            if state == ChatState::Confirm {
                t.say("You're signed in. Confirm to place the booking.");
            }
        }

        (ChatState::Requirements, Event::UserText(text)) => {
            let text = text.trim();
            if text.is_empty() {
                t.say("Please describe the service you need.");
            } else {
                t.session.requirements = Some(text.to_string());
                t.enter(ChatState::Location);
                t.say(ASK_LOCATION);
            }
        }

        (ChatState::Location, Event::UserText(_)) => {
            t.say("Use the share location button so I can search near you.");
        }

        (ChatState::Location, Event::ShareLocation) => {
            t.session.awaiting_location = true;
            t.enter(ChatState::Searching);
            t.effect = Some(Effect::AwaitLocation);
        }

        (ChatState::Searching, Event::LocationResolved { point, label })
            if t.session.awaiting_location =>
        {
            t.session.awaiting_location = false;
            if !point.is_valid() {
                t.fail(
                    ErrorKind::Geolocation,
                    ErrorKind::Geolocation.as_str(),
                    "The shared location is not a valid coordinate.".to_string(),
                    settings,
                );
            } else {
                t.session.origin = Some(point);
                t.session.location_label = label.filter(|l| !l.trim().is_empty());
                let radius_km = t.session.radius_km;
                t.say(format!("Searching for pilots within {} km...", radius_km));
                t.effect = Some(Effect::FindProviders {
                    origin: point,
                    radius_km,
                });
            }
        }

        (ChatState::Searching, Event::LocationFailed(reason)) if t.session.awaiting_location => {
            t.session.awaiting_location = false;
            t.fail(
                ErrorKind::Geolocation,
                ErrorKind::Geolocation.as_str(),
                format!("Couldn't get your location: {}", reason),
                settings,
            );
        }

        (ChatState::Searching, Event::MatchesReady { radius_km, candidates })
            if !t.session.awaiting_location =>
        {
            t.session.radius_km = radius_km;
            t.session.selected = None;
            if candidates.is_empty() {
                t.session.candidates.clear();
                t.fail(
                    ErrorKind::NoMatches,
                    ErrorKind::NoMatches.as_str(),
                    format!("No pilots found within {} km of you.", radius_km),
                    settings,
                );
            } else {
                let providers = candidates.iter().map(CandidateView::from).collect();
                let count = candidates.len();
                t.session.candidates = candidates;
                t.enter(ChatState::Results);
                t.replies.push(Reply::Candidates {
                    radius_km,
                    providers,
                });
                t.say(format!(
                    "Found {} pilot{} nearby. Pick one to continue.",
                    count,
                    if count == 1 { "" } else { "s" }
                ));
            }
        }

        (ChatState::Searching, Event::SearchFailed(reason)) if !t.session.awaiting_location => {
            t.fail(ErrorKind::Search, ErrorKind::Search.as_str(), reason, settings);
        }

        (ChatState::Results, Event::SelectProvider(id)) => {
            if let Some(candidate) = t.session.candidate(id).cloned() {
                let estimate = candidate.provider.hourly_rate * settings.default_duration_hours;
                t.say(format!(
                    "{} is {} away, rated {:.1}. Estimated ₹{:.0} for {} hours. Confirm to book.",
                    candidate.provider.full_name,
                    format_distance(candidate.distance_km),
                    candidate.provider.rating,
                    estimate,
                    settings.default_duration_hours,
                ));
                t.session.selected = Some(candidate);
                t.enter(ChatState::Confirm);
            }
        }

        (ChatState::Confirm, Event::Confirm) => {
            let Some(client) = t.session.identity.clone() else {
                t.replies.push(Reply::AuthRequired {
                    text: "Please sign in to confirm your booking.".to_string(),
                });
                return t;
            };
            let provider_id = t.session.selected.as_ref().map(|c| c.provider.id);
            match (provider_id, t.session.service_request()) {
                (Some(provider_id), Some(request)) => {
                    t.enter(ChatState::Booking);
                    t.effect = Some(Effect::CreateBooking {
                        request,
                        provider_id,
                        client,
                    });
                }
                _ => t.fail(
                    ErrorKind::Booking,
                    ErrorKind::Booking.as_str(),
                    "Booking details are incomplete.".to_string(),
                    settings,
                ),
            }
        }

        (ChatState::Booking, Event::Booked(confirmation)) => {
            t.session.confirmation = Some((*confirmation).clone());
            t.enter(ChatState::Success);
            t.replies.push(Reply::booked(&confirmation));
            t.effect = Some(Effect::Notify(confirmation));
        }

        (ChatState::Booking, Event::BookingFailed { kind, message }) => {
            t.fail(ErrorKind::Booking, kind, message, settings);
        }

        (ChatState::Success, Event::DeliveryReported(summary)) => {
            t.replies.push(Reply::delivery(&summary));
            t.session.delivery = Some(summary);
        }

        (ChatState::Error(ErrorKind::NoMatches), Event::ExpandRadius) => {
            if let (Some(next), Some(origin)) =
                (settings.next_radius(t.session.radius_km), t.session.origin)
            {
                t.session.radius_km = next;
                t.session.last_error = None;
                t.enter(ChatState::Searching);
                t.say(format!("Widening the search to {} km...", next));
                t.effect = Some(Effect::FindProviders {
                    origin,
                    radius_km: next,
                });
            }
        }

        (ChatState::Error(ErrorKind::Geolocation), Event::RetryLocation) => {
            t.session.last_error = None;
            t.enter(ChatState::Location);
            t.say(ASK_LOCATION);
        }

        _ => {}
    }

    t
}
