//! Mapping of domain errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lmi_core::{ErrorKind, LmiError};
use serde_json::json;
use tracing::{debug, error};

/// Domain error returned from a handler.
#[derive(Debug)]
pub struct ApiError(pub LmiError);

impl From<LmiError> for ApiError {
    fn from(err: LmiError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// 400 with a fixed message.
    pub fn bad_request(message: &str) -> Self {
        Self(LmiError::Validation(message.to_string()))
    }

    pub fn status_and_message(&self) -> (StatusCode, String) {
        match (&self.0, self.0.kind()) {
            (LmiError::RateLimited, _) => (StatusCode::TOO_MANY_REQUESTS, "Too many attempts".into()),
            (LmiError::InvalidRefreshToken, _) => {
                (StatusCode::UNAUTHORIZED, "Invalid refresh token".into())
            }
            (LmiError::InvalidCredentials, _) => {
                (StatusCode::UNAUTHORIZED, "Invalid email or password".into())
            }
            (_, ErrorKind::Authentication) => (StatusCode::UNAUTHORIZED, "Invalid token".into()),
            (LmiError::DuplicateEmail, _) => (StatusCode::BAD_REQUEST, "Email already exists".into()),
            (LmiError::UnknownUser(_), _) => (StatusCode::BAD_REQUEST, "User not found".into()),
            (err, ErrorKind::Validation) => (StatusCode::BAD_REQUEST, err.to_string()),
            (_, ErrorKind::Resource | ErrorKind::Storage | ErrorKind::Stream) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            debug!(error = %self.0, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
