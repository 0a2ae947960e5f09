//! Persisted record shapes shared by the store and the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LmiError, LmiResult};

pub type UserId = i64;
pub type SessionId = i64;

/// A registered account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// Login credentials for a user. Never serialized to clients.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: UserId,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
}

/// Input for creating a user together with its credentials.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub display_name: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
}

/// A refresh-token chain. The `token` value is replaced on every redemption;
/// `created_at` marks the start of the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub token: String,
    pub user_id: UserId,
    /// Unix seconds.
    pub expires_at: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a terminal session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Inactive,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Inactive => "inactive",
            SessionStatus::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> LmiResult<Self> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "inactive" => Ok(SessionStatus::Inactive),
            "terminated" => Ok(SessionStatus::Terminated),
            other => Err(LmiError::Storage(format!("invalid session status: {other}"))),
        }
    }

    /// Only an active session may change status; nothing is ever reactivated.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        self == SessionStatus::Active && next != SessionStatus::Active
    }
}

/// One logical terminal session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub status: SessionStatus,
    pub process_ref: String,
    pub origin_addr: String,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a session record.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: UserId,
    pub process_ref: String,
    pub origin_addr: String,
}

/// An active session joined with its owner's display information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionWithOwner {
    #[serde(flatten)]
    pub session: Session,
    pub owner: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_reactivates() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Inactive));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Terminated));
        assert!(!SessionStatus::Active.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Inactive.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Inactive.can_transition_to(SessionStatus::Terminated));
        assert!(!SessionStatus::Terminated.can_transition_to(SessionStatus::Active));
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            SessionStatus::Active,
            SessionStatus::Inactive,
            SessionStatus::Terminated,
        ] {
            assert_eq!(SessionStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(SessionStatus::parse("paused").is_err());
    }
}
