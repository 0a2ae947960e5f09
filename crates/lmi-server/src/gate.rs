//! Connection gate: access-token check in front of protected routes.
//!
//! The token comes from the `token` query parameter or an
//! `Authorization: Bearer` header; the query parameter wins. Rejections are
//! a generic 401 and happen before any upgrade or process launch.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::header::AUTHORIZATION;
use lmi_core::{AccessClaims, LmiError};
use tracing::debug;

/// Claims of a request carrying a valid access token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AccessClaims);

#[axum::async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts)
            .ok_or_else(|| LmiError::InvalidToken("missing token".into()))?;
        match state.auth.authenticate(&token) {
            Ok(claims) => Ok(Authenticated(claims)),
            Err(e) => {
                debug!(path = %parts.uri.path(), error = %e, "gate rejected request");
                Err(e.into())
            }
        }
    }
}

fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(query) = parts.uri.query() {
        for param in query.split('&') {
            if let Some(token) = param.strip_prefix("token=") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(uri: &str, bearer: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn query_token_wins_over_header() {
        let p = parts("/ws/terminal?token=from-query", Some("from-header"));
        assert_eq!(extract_token(&p).as_deref(), Some("from-query"));
    }

    #[test]
    fn header_token_used_without_query() {
        let p = parts("/ws/terminal", Some("from-header"));
        assert_eq!(extract_token(&p).as_deref(), Some("from-header"));
    }

    #[test]
    fn missing_or_empty_token() {
        assert_eq!(extract_token(&parts("/ws/terminal", None)), None);
        assert_eq!(extract_token(&parts("/ws/terminal?token=", None)), None);
        assert_eq!(extract_token(&parts("/ws/terminal?other=1", None)), None);
    }
}
