//! `/ws/terminal`: gate, upgrade, launch and bridge.
//!
//! Sequence per connection: the gate validates the token before the
//! upgrade; after the upgrade a shell is launched, a session record is
//! created for it and the bridge runs until either side stops. The record
//! is marked terminated when the bridge closes.

use crate::gate::Authenticated;
use crate::server::AppState;
use crate::session::{Bridge, BridgeState};
use crate::transport::websocket::{self, WsSink, MAX_MESSAGE_SIZE};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use lmi_core::{FrameSink, LmiError, SessionId, SessionStatus, UserId};
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Text frame sent when the shell cannot be started.
pub const LAUNCH_FAILURE_NOTICE: &str = "Error: Failed to start PTY session.";

pub async fn terminal_ws(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    connect: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = connect
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    debug!(user_id = claims.user_id, remote = %origin, "terminal upgrade accepted");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| serve_terminal(state, claims.user_id, origin, socket))
}

async fn serve_terminal(state: AppState, user_id: UserId, origin: String, socket: WebSocket) {
    let (source, mut sink) = websocket::split(socket);

    let launcher = state.launcher.clone();
    let shell = state.config.shell.clone();
    let launched = tokio::task::spawn_blocking(move || launcher.launch(&shell))
        .await
        .unwrap_or_else(|e| Err(LmiError::LaunchFailure(format!("launch task failed: {e}"))));
    let process = match launched {
        Ok(process) => process,
        Err(e) => {
            error!(user_id, remote = %origin, error = %e, "failed to start shell");
            notify_and_close(&mut sink, LAUNCH_FAILURE_NOTICE).await;
            return;
        }
    };

    let process_ref = process
        .control
        .pid()
        .map(|pid| format!("pty:{pid}"))
        .unwrap_or_else(|| "pty".to_string());
    let session = match state
        .registry
        .create_session(user_id, process_ref, origin.clone())
        .await
    {
        Ok(session) => session,
        Err(e) => {
            error!(user_id, remote = %origin, error = %e, "failed to record session");
            let _ = tokio::task::spawn_blocking(move || process.terminate()).await;
            close_quietly(&mut sink).await;
            return;
        }
    };

    let tracker = state.registry.track(session.id);
    let bridge = Bridge::new(process).with_observer(tracker.observer());
    tokio::spawn(log_transitions(session.id, bridge.subscribe()));
    let outcome = bridge.run(source, sink).await;
    info!(
        session_id = session.id,
        user_id,
        remote = %origin,
        reason = ?outcome.reason,
        bytes_out = outcome.bytes_out,
        bytes_in = outcome.bytes_in,
        exit_code = ?outcome.exit_code,
        "terminal session ended"
    );

    if let Err(e) = tracker.finish(SessionStatus::Terminated).await {
        warn!(session_id = session.id, error = %e, "failed to finalize session");
    }
}

async fn notify_and_close(sink: &mut WsSink, text: &str) {
    if let Err(e) = sink.send_text(text.to_string()).await {
        debug!(error = %e, "could not deliver notice");
    }
    close_quietly(sink).await;
}

async fn close_quietly(sink: &mut WsSink) {
    if let Err(e) = sink.close().await {
        debug!(error = %e, "close failed");
    }
}

/// Trace bridge state changes until the bridge is gone.
async fn log_transitions(session_id: SessionId, mut states: watch::Receiver<BridgeState>) {
    loop {
        let state = *states.borrow_and_update();
        debug!(session_id, state = ?state, "bridge state");
        if states.changed().await.is_err() {
            return;
        }
    }
}
