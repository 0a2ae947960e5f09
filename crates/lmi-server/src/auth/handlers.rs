//! `/auth/*` endpoints.

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::Json;
use lmi_core::model::User;
use lmi_core::{LmiError, TokenPair};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Unwrap a JSON body or fail with the generic payload message.
pub(crate) fn payload<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(v)| v)
        .map_err(|_| ApiError::bad_request("Invalid request payload"))
}

/// Reject a request whose required string fields are empty.
pub(crate) fn require_filled(fields: &[&str]) -> ApiResult<()> {
    if fields.iter().any(|f| f.is_empty()) {
        return Err(ApiError::bad_request("Invalid request payload"));
    }
    Ok(())
}

/// Client address used for attempt limiting.
fn client_ip(connect: Option<ConnectInfo<SocketAddr>>) -> IpAddr {
    connect
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn check_attempt(state: &AppState, ip: IpAddr) -> ApiResult<()> {
    if state.limiter.lock().await.check_and_record(ip) {
        Ok(())
    } else {
        tracing::warn!(remote = %ip, "too many auth attempts");
        Err(LmiError::RateLimited.into())
    }
}

pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Json<RegisterResponse>> {
    let req = payload(body)?;
    let user = state
        .auth
        .register(&req.display_name, &req.email, &req.password)
        .await?;
    Ok(Json(RegisterResponse { user }))
}

pub async fn login(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<TokenPair>> {
    check_attempt(&state, client_ip(connect)).await?;
    let req = payload(body)?;
    require_filled(&[&req.email, &req.password])?;
    let pair = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(pair))
}

pub async fn refresh(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<Json<TokenPair>> {
    check_attempt(&state, client_ip(connect)).await?;
    let req = payload(body)?;
    require_filled(&[&req.refresh_token])?;
    let pair = state.auth.redeem_refresh_token(&req.refresh_token).await?;
    Ok(Json(pair))
}
