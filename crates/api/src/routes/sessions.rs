use axum::routing::get;
use axum::Router;

use crate::handlers::queries;
use crate::state::AppState;

/// Read-side routes.
///
/// ```text
/// GET /sessions/active             -> active_sessions
/// GET /users/{user_name}/info      -> user_info
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions/active", get(queries::active_sessions))
        .route("/users/{user_name}/info", get(queries::user_info))
}
