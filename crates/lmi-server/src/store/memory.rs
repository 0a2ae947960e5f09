//! In-process store guarded by a single async mutex.

use super::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lmi_core::model::{
    Credentials, NewSession, NewUser, RefreshTokenRecord, Session, SessionWithOwner, User,
};
use lmi_core::{LmiError, LmiResult, SessionId, SessionStatus, UserId};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, User>,
    /// Keyed by email.
    credentials: HashMap<String, Credentials>,
    refresh_tokens: BTreeMap<i64, RefreshTokenRecord>,
    sessions: BTreeMap<SessionId, Session>,
    next_user_id: UserId,
    next_token_id: i64,
    next_session_id: SessionId,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> LmiResult<User> {
        let mut inner = self.inner.lock().await;
        if inner.credentials.contains_key(&user.email) {
            return Err(LmiError::DuplicateEmail);
        }
        inner.next_user_id += 1;
        let record = User {
            id: inner.next_user_id,
            display_name: user.display_name,
            created_at: Utc::now(),
        };
        inner.users.insert(record.id, record.clone());
        inner.credentials.insert(
            user.email.clone(),
            Credentials {
                user_id: record.id,
                email: user.email,
                password_hash: user.password_hash,
                salt: user.salt,
            },
        );
        Ok(record)
    }

    async fn find_user(&self, id: UserId) -> LmiResult<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_credentials_by_email(&self, email: &str) -> LmiResult<Option<Credentials>> {
        Ok(self.inner.lock().await.credentials.get(email).cloned())
    }

    async fn insert_refresh_token(
        &self,
        user_id: UserId,
        token: &str,
        expires_at: i64,
    ) -> LmiResult<RefreshTokenRecord> {
        let mut inner = self.inner.lock().await;
        if inner.refresh_tokens.values().any(|r| r.token == token) {
            return Err(LmiError::Storage("refresh token value collision".into()));
        }
        inner.next_token_id += 1;
        let record = RefreshTokenRecord {
            id: inner.next_token_id,
            token: token.to_string(),
            user_id,
            expires_at,
            active: true,
            created_at: Utc::now(),
        };
        inner.refresh_tokens.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_refresh_token(&self, token: &str) -> LmiResult<Option<RefreshTokenRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .refresh_tokens
            .values()
            .find(|r| r.token == token)
            .cloned())
    }

    async fn swap_refresh_token(
        &self,
        id: i64,
        expected: &str,
        new_token: &str,
        new_expires_at: i64,
    ) -> LmiResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.refresh_tokens.get_mut(&id) {
            Some(record) if record.active && record.token == expected => {
                record.token = new_token.to_string();
                record.expires_at = new_expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_session(&self, session: NewSession) -> LmiResult<Session> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&session.user_id) {
            return Err(LmiError::UnknownUser(session.user_id));
        }
        inner.next_session_id += 1;
        let now = Utc::now();
        let record = Session {
            id: inner.next_session_id,
            user_id: session.user_id,
            status: SessionStatus::Active,
            process_ref: session.process_ref,
            origin_addr: session.origin_addr,
            last_activity: now,
            created_at: now,
        };
        inner.sessions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_active_sessions(&self) -> LmiResult<Vec<SessionWithOwner>> {
        let inner = self.inner.lock().await;
        let mut out = Vec::new();
        for session in inner.sessions.values() {
            if session.status != SessionStatus::Active {
                continue;
            }
            let owner = inner
                .users
                .get(&session.user_id)
                .cloned()
                .ok_or_else(|| LmiError::Storage(format!("session {} has no owner", session.id)))?;
            out.push(SessionWithOwner {
                session: session.clone(),
                owner,
            });
        }
        Ok(out)
    }

    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> LmiResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(&id) {
            if at > session.last_activity {
                session.last_activity = at;
            }
        }
        Ok(())
    }

    async fn set_session_status(&self, id: SessionId, status: SessionStatus) -> LmiResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&id) {
            Some(session) if session.status.can_transition_to(status) => {
                session.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
