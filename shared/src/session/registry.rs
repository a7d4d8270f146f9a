use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::models::ClientIdentity;

use super::driver::{SessionDriver, SessionServices};
use super::event::Event;
use super::reply::Reply;

type SharedDriver = Arc<tokio::sync::Mutex<SessionDriver>>;

/// Live sessions keyed by connection id. Nothing here outlives its connection.
pub struct SessionRegistry {
    services: Arc<SessionServices>,
    sessions: Mutex<HashMap<String, SharedDriver>>,
}

impl SessionRegistry {
    pub fn new(services: Arc<SessionServices>) -> Self {
        Self {
            services,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a fresh session for a connection. Reopening an existing
    /// connection id starts over.
    pub fn open(&self, connection_id: &str, identity: Option<ClientIdentity>) {
        let driver = SessionDriver::new(Arc::clone(&self.services), identity);
        self.lock().insert(
            connection_id.to_string(),
            Arc::new(tokio::sync::Mutex::new(driver)),
        );
        info!(connection_id, "Session opened");
    }

    /// Apply `event` to a connection's session.
    ///
    /// Returns `None` for unknown connections. While the session is still
    /// working on an earlier event the new one is dropped and no replies come
    /// back. An abort is never dropped: it waits for the session to settle.
    pub async fn dispatch(&self, connection_id: &str, event: Event) -> Option<Vec<Reply>> {
        let driver = self.get(connection_id)?;
        let mut driver = if matches!(event, Event::Abort(_)) {
            driver.lock_owned().await
        } else {
            match driver.try_lock_owned() {
                Ok(driver) => driver,
                Err(_) => {
                    debug!(connection_id, "Session busy, dropping event");
                    return Some(Vec::new());
                }
            }
        };
        Some(driver.handle(event).await)
    }

    /// Wait for a connection's pending notification report.
    pub async fn delivery(&self, connection_id: &str) -> Vec<Reply> {
        let Some(driver) = self.get(connection_id) else {
            return Vec::new();
        };
        let mut driver = driver.lock().await;
        driver.delivery_report().await
    }

    /// Discard a connection's session.
    pub fn close(&self, connection_id: &str) -> bool {
        let removed = self.lock().remove(connection_id).is_some();
        if removed {
            info!(connection_id, "Session closed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, connection_id: &str) -> Option<SharedDriver> {
        self.lock().get(connection_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedDriver>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
