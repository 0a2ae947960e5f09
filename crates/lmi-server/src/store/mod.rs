//! Record store for users, credentials, refresh tokens and sessions.
//!
//! `SqliteStore` backs a running server; `MemoryStore` backs tests and
//! `--in-memory` runs. Both honour the same contracts: unique emails,
//! compare-and-swap refresh rotation, monotonic session activity and
//! active-only status transitions.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lmi_core::model::{
    Credentials, NewSession, NewUser, RefreshTokenRecord, Session, SessionWithOwner, User,
};
use lmi_core::{LmiResult, SessionId, SessionStatus, UserId};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Create a user and its credentials together. Fails with
    /// `DuplicateEmail` if the email is taken.
    async fn create_user(&self, user: NewUser) -> LmiResult<User>;

    async fn find_user(&self, id: UserId) -> LmiResult<Option<User>>;

    async fn find_credentials_by_email(&self, email: &str) -> LmiResult<Option<Credentials>>;

    /// Insert a new, active refresh-token chain.
    async fn insert_refresh_token(
        &self,
        user_id: UserId,
        token: &str,
        expires_at: i64,
    ) -> LmiResult<RefreshTokenRecord>;

    async fn find_refresh_token(&self, token: &str) -> LmiResult<Option<RefreshTokenRecord>>;

    /// Replace the value of chain `id` only if it still holds `expected` and
    /// is active. Returns `false` when another redemption got there first.
    async fn swap_refresh_token(
        &self,
        id: i64,
        expected: &str,
        new_token: &str,
        new_expires_at: i64,
    ) -> LmiResult<bool>;

    async fn create_session(&self, session: NewSession) -> LmiResult<Session>;

    /// Active sessions with their owners, in insertion order.
    async fn list_active_sessions(&self) -> LmiResult<Vec<SessionWithOwner>>;

    /// Raise `last_activity` to `at`; never lowers it.
    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> LmiResult<()>;

    /// Move an active session to `status`. Returns `false` if the session is
    /// missing or no longer active.
    async fn set_session_status(&self, id: SessionId, status: SessionStatus) -> LmiResult<bool>;
}
