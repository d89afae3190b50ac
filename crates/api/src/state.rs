use std::sync::Arc;

use worktrack_events::EventHub;
use worktrack_lifecycle::SessionService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Session commands, queries and expiration timers.
    pub sessions: Arc<SessionService>,
    /// Fan-out of lifecycle events to WebSocket subscribers.
    pub hub: Arc<EventHub>,
}
