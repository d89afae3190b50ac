use axum::routing::post;
use axum::Router;

use crate::handlers::commands;
use crate::state::AppState;

/// Command routes mounted at `/commands`.
///
/// ```text
/// POST /join     -> join
/// POST /out      -> out
/// POST /more     -> more
/// POST /change   -> change
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/join", post(commands::join))
        .route("/out", post(commands::out))
        .route("/more", post(commands::more))
        .route("/change", post(commands::change))
}
