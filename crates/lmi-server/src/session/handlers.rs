//! `/sessions` endpoints.

use crate::auth::handlers::{payload, require_filled};
use crate::error::ApiResult;
use crate::gate::Authenticated;
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use lmi_core::model::SessionWithOwner;
use lmi_core::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: UserId,
    pub container_id: String,
    pub ip_address: String,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub message: &'static str,
    pub session_id: SessionId,
}

/// Register a session record for an externally managed process.
pub async fn start_session(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    body: Result<Json<StartSessionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<StartSessionResponse>)> {
    let req = payload(body)?;
    require_filled(&[&req.container_id, &req.ip_address])?;
    debug!(caller = claims.user_id, owner = req.user_id, "starting session");
    let session = state
        .registry
        .create_session(req.user_id, req.container_id, req.ip_address)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            message: "Session started successfully",
            session_id: session.id,
        }),
    ))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
) -> ApiResult<Json<Vec<SessionWithOwner>>> {
    Ok(Json(state.registry.list_active_sessions().await?))
}
