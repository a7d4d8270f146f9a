//! Conversational booking sessions.
//!
//! `transition` is pure: it maps a session and an event to the next session,
//! the replies to send and at most one effect. `SessionDriver` performs the
//! effects. `SessionRegistry` keeps one driver per live connection.

mod driver;
mod effect;
pub mod event;
mod registry;
pub mod reply;
pub mod state;
pub(crate) mod transition;

pub use driver::{SessionDriver, SessionServices};
pub use effect::Effect;
pub use event::{ClientMessage, Event};
pub use registry::SessionRegistry;
pub use reply::{CandidateView, Reply};
pub use state::{ChatSession, ChatState, ErrorKind};
pub use transition::{transition, Transition};
