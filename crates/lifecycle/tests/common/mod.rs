#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use worktrack_core::session::Session;
use worktrack_lifecycle::memory::{MemoryStore, RecordingPublisher};
use worktrack_lifecycle::{ServiceSettings, SessionService};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub service: Arc<SessionService>,
}

pub fn harness() -> Harness {
    harness_with(ServiceSettings::default())
}

pub fn harness_with(settings: ServiceSettings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let service = SessionService::new(store.clone(), publisher.clone(), settings)
        .expect("settings are valid");
    Harness {
        store,
        publisher,
        service: Arc::new(service),
    }
}

/// Poll until the session is completed or `limit` elapses.
pub async fn wait_for_completion(store: &MemoryStore, session_id: i64, limit: Duration) -> Session {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let session = store.session(session_id).expect("session exists");
        if !session.is_active() || tokio::time::Instant::now() >= deadline {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll `done` until it holds or `limit` elapses. Returns its last value.
pub async fn wait_until(limit: Duration, done: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if done() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Settings whose storage deadline is shorter than a late acknowledgement.
pub fn short_deadline() -> ServiceSettings {
    ServiceSettings {
        storage_timeout: Duration::from_millis(100),
        ..ServiceSettings::default()
    }
}

/// Acknowledgement delay well past [`short_deadline`].
pub const LATE_ACK: Duration = Duration::from_millis(300);

pub fn minutes_from_now(minutes: i64) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::minutes(minutes)
}
