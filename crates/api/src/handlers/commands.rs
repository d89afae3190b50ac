//! Handlers for the session commands: join, out, more and change.
//!
//! Malformed JSON is reported in the same error envelope as everything
//! else. Bodies are checked with `validator` first; domain rules such as
//! the extension bounds are left to the coordinators.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use validator::Validate;
use worktrack_core::tier::Tier;
use worktrack_lifecycle::join::JoinRequest;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct JoinBody {
    #[validate(length(min = 1, max = 64))]
    pub user_name: String,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub work_name: String,
    #[validate(range(min = 1, max = 3))]
    pub tier: Option<i16>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OutBody {
    #[validate(length(min = 1, max = 64))]
    pub user_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MoreBody {
    #[validate(length(min = 1, max = 64))]
    pub user_name: String,
    pub minutes: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeBody {
    #[validate(length(min = 1, max = 64))]
    pub user_name: String,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub work_name: String,
}

/// POST /api/v1/commands/join
pub async fn join(
    State(state): State<AppState>,
    payload: Result<Json<JoinBody>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(body) = payload?;
    body.validate()?;
    let tier = body.tier.map(Tier::try_from).transpose()?;

    let mut request = JoinRequest::new(body.user_name, body.work_name);
    request.tier = tier;
    let outcome = state.sessions.join(&request).await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: outcome })))
}

/// POST /api/v1/commands/out
pub async fn out(
    State(state): State<AppState>,
    payload: Result<Json<OutBody>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(body) = payload?;
    body.validate()?;
    let outcome = state.sessions.out(&body.user_name).await?;

    Ok(Json(DataResponse { data: outcome }))
}

/// POST /api/v1/commands/more
pub async fn more(
    State(state): State<AppState>,
    payload: Result<Json<MoreBody>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(body) = payload?;
    body.validate()?;
    let outcome = state.sessions.extend(&body.user_name, body.minutes).await?;

    Ok(Json(DataResponse { data: outcome }))
}

/// POST /api/v1/commands/change
pub async fn change(
    State(state): State<AppState>,
    payload: Result<Json<ChangeBody>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(body) = payload?;
    body.validate()?;
    let outcome = state
        .sessions
        .change_label(&body.user_name, &body.work_name)
        .await?;

    Ok(Json(DataResponse { data: outcome }))
}
