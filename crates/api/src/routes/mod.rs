pub mod commands;
pub mod health;
pub mod sessions;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws                          WebSocket event stream
///
/// /commands/join               start a session (POST)
/// /commands/out                end the active session (POST)
/// /commands/more               extend the active session (POST)
/// /commands/change             change the work label (POST)
///
/// /sessions/active             list active sessions
/// /users/{user_name}/info      remaining and worked minutes
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/commands", commands::router())
        .merge(sessions::router())
}
