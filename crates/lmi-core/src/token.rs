//! Access and refresh tokens.
//!
//! Access tokens are self-contained HMAC-SHA256 signed claims in the compact
//! `header.payload.signature` form (base64-url, unpadded segments). Refresh
//! token values are 32 random bytes, base64-url encoded; their state lives in
//! the record store.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::error::{LmiError, LmiResult};
use crate::model::UserId;

/// Access tokens are valid for two hours from issuance.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 2 * 60 * 60;

/// Raw size of a refresh token value before encoding.
pub const REFRESH_TOKEN_BYTES: usize = 32;

const HEADER: &[u8] = br#"{"alg":"HS256","typ":"JWT"}"#;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: UserId,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

/// An access token together with a fresh refresh token value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues and validates tokens with a server-held secret.
pub struct TokenService {
    key: hmac::Key,
    access_ttl_secs: i64,
    rng: SystemRandom,
}

impl TokenService {
    /// Create a service signing with `secret`.
    pub fn new(secret: &[u8], access_ttl_secs: i64) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            access_ttl_secs,
            rng: SystemRandom::new(),
        }
    }

    /// Issue an access token for `user_id`, valid from now.
    pub fn issue_access_token(&self, user_id: UserId) -> LmiResult<String> {
        self.issue_access_token_at(user_id, now_secs())
    }

    /// Issue an access token as if the current time were `now` (unix seconds).
    pub fn issue_access_token_at(&self, user_id: UserId, now: i64) -> LmiResult<String> {
        let claims = AccessClaims {
            user_id,
            iat: now,
            exp: now + self.access_ttl_secs,
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| LmiError::Other(format!("claims encoding failed: {e}")))?;

        let mut token = String::new();
        token.push_str(&URL_SAFE_NO_PAD.encode(HEADER));
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(payload));

        let tag = hmac::sign(&self.key, token.as_bytes());
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(tag.as_ref()));
        Ok(token)
    }

    /// Verify signature, shape and expiry of an access token.
    pub fn validate_access_token(&self, token: &str) -> LmiResult<AccessClaims> {
        self.validate_access_token_at(token, now_secs())
    }

    /// Validate against an explicit current time (unix seconds).
    pub fn validate_access_token_at(&self, token: &str, now: i64) -> LmiResult<AccessClaims> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, sig_b64) = match (parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s)) if parts.next().is_none() => (h, p, s),
            _ => return Err(LmiError::InvalidToken("malformed token".into())),
        };

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| LmiError::InvalidToken("malformed signature".into()))?;
        let signed_len = header_b64.len() + 1 + payload_b64.len();
        hmac::verify(&self.key, token[..signed_len].as_bytes(), &signature)
            .map_err(|_| LmiError::InvalidToken("invalid token signature".into()))?;

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(LmiError::InvalidToken(format!(
                "unsupported algorithm: {}",
                header.alg
            )));
        }

        let claims: AccessClaims = decode_segment(payload_b64)?;
        if now >= claims.exp {
            return Err(LmiError::InvalidToken("token expired".into()));
        }
        Ok(claims)
    }

    /// Generate a fresh refresh token value.
    pub fn issue_refresh_token(&self) -> LmiResult<String> {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| LmiError::EntropyFailure("failed to generate refresh token".into()))?;
        Ok(URL_SAFE.encode(bytes))
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> LmiResult<T> {
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| LmiError::InvalidToken("malformed segment".into()))?;
    serde_json::from_slice(&raw)
        .map_err(|e| LmiError::InvalidToken(format!("malformed payload: {e}")))
}

/// Generate a random signing secret (32 bytes).
pub fn generate_secret() -> LmiResult<Vec<u8>> {
    let mut secret = vec![0u8; 32];
    SystemRandom::new()
        .fill(&mut secret)
        .map_err(|_| LmiError::EntropyFailure("failed to generate secret".into()))?;
    Ok(secret)
}

/// Current wall-clock time in unix seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
