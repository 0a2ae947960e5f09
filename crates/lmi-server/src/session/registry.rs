//! Session registry: durable records of terminal sessions.
//!
//! Creates one record per bridged connection, lists active sessions with
//! their owners, advances activity timestamps and applies one-way status
//! transitions.

use super::bridge::ActivityObserver;
use crate::store::Store;
use chrono::{DateTime, Utc};
use lmi_core::model::{NewSession, Session, SessionWithOwner};
use lmi_core::{LmiError, LmiResult, SessionId, SessionStatus, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimum spacing between activity writes for one session.
const ACTIVITY_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn Store>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create an active session for `user_id`.
    pub async fn create_session(
        &self,
        user_id: UserId,
        process_ref: impl Into<String>,
        origin_addr: impl Into<String>,
    ) -> LmiResult<Session> {
        if self.store.find_user(user_id).await?.is_none() {
            return Err(LmiError::UnknownUser(user_id));
        }
        let session = self
            .store
            .create_session(NewSession {
                user_id,
                process_ref: process_ref.into(),
                origin_addr: origin_addr.into(),
            })
            .await?;
        info!(
            session_id = session.id,
            user_id,
            process = %session.process_ref,
            origin = %session.origin_addr,
            "session created"
        );
        Ok(session)
    }

    pub async fn list_active_sessions(&self) -> LmiResult<Vec<SessionWithOwner>> {
        self.store.list_active_sessions().await
    }

    /// Advance `last_activity` to `at`. Earlier timestamps never win.
    pub async fn touch(&self, id: SessionId, at: DateTime<Utc>) -> LmiResult<()> {
        self.store.touch_session(id, at).await
    }

    /// Move an active session to `status`. Returns `false` if it was
    /// already inactive or terminated.
    pub async fn finish(&self, id: SessionId, status: SessionStatus) -> LmiResult<bool> {
        let changed = self.store.set_session_status(id, status).await?;
        if changed {
            info!(session_id = id, status = status.as_str(), "session status changed");
        } else {
            debug!(session_id = id, status = status.as_str(), "status change ignored");
        }
        Ok(changed)
    }

    /// Start coalescing activity for `id` into at most one write per second.
    pub fn track(&self, id: SessionId) -> ActivityTracker {
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let flusher = tokio::spawn(flush_activity(self.clone(), id, rx, cancel.clone()));
        ActivityTracker {
            id,
            registry: self.clone(),
            signal: Arc::new(ActivitySignal(tx)),
            cancel,
            flusher,
        }
    }
}

struct ActivitySignal(watch::Sender<Option<DateTime<Utc>>>);

impl ActivityObserver for ActivitySignal {
    fn record_activity(&self) {
        self.0.send_replace(Some(Utc::now()));
    }
}

async fn flush_activity(
    registry: SessionRegistry,
    id: SessionId,
    mut rx: watch::Receiver<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let at = *rx.borrow_and_update();
        if let Some(at) = at {
            if let Err(e) = registry.touch(id, at).await {
                warn!(session_id = id, error = %e, "failed to record activity");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(ACTIVITY_FLUSH_INTERVAL) => {}
        }
    }
}

/// Activity bookkeeping for one live session.
pub struct ActivityTracker {
    id: SessionId,
    registry: SessionRegistry,
    signal: Arc<ActivitySignal>,
    cancel: CancellationToken,
    flusher: JoinHandle<()>,
}

impl ActivityTracker {
    pub fn observer(&self) -> Arc<dyn ActivityObserver> {
        self.signal.clone()
    }

    /// Stop the flusher, write any pending activity and set the final status.
    pub async fn finish(self, status: SessionStatus) -> LmiResult<bool> {
        self.cancel.cancel();
        let _ = self.flusher.await;
        let pending = *self.signal.0.borrow();
        if let Some(at) = pending {
            self.registry.touch(self.id, at).await?;
        }
        self.registry.finish(self.id, status).await
    }
}
