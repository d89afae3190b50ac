use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/sessions/active
pub async fn active_sessions(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let sessions = state.sessions.active_sessions().await?;

    Ok(Json(DataResponse { data: sessions }))
}

/// GET /api/v1/users/{user_name}/info
///
/// Remaining minutes and worked totals. Requires an active session.
pub async fn user_info(
    State(state): State<AppState>,
    Path(user_name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let info = state.sessions.user_info(&user_name).await?;

    Ok(Json(DataResponse { data: info }))
}
