//! HTTP server: shared state, routes and lifecycle.
//!
//! Owns the token service, record store, session registry and launcher, and
//! serves the auth API, session API, terminal WebSocket and static files.

use crate::auth::{self, AttemptLimiter, AuthService, RefreshPolicy};
use crate::config::ServerConfig;
use crate::session::{self, Launcher, SessionRegistry};
use crate::store::Store;
use crate::terminal;
use axum::routing::{get, post};
use axum::{Json, Router};
use lmi_core::{LmiError, LmiResult, PasswordHasher, TokenService};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// How often idle entries are dropped from the attempt limiter.
const LIMITER_GC_INTERVAL: Duration = Duration::from_secs(60);

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub auth: Arc<AuthService>,
    pub registry: SessionRegistry,
    pub launcher: Arc<dyn Launcher>,
    pub limiter: Arc<Mutex<AttemptLimiter>>,
}

/// The let-me-in server instance.
pub struct LmiServer {
    state: AppState,
}

impl LmiServer {
    /// Build the server around a store and a launcher.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn Store>,
        launcher: Arc<dyn Launcher>,
    ) -> LmiResult<Self> {
        let secret = match &config.token_secret {
            Some(secret) => secret.clone(),
            None => {
                warn!("no token secret configured, using a random one; tokens will not survive a restart");
                lmi_core::generate_secret()?
            }
        };
        let tokens = TokenService::new(&secret, config.access_token_ttl);
        if config.pepper.is_empty() {
            warn!("password pepper is empty");
        }
        let hasher = PasswordHasher::new(config.pepper.clone(), config.pbkdf2_iterations);
        let auth = AuthService::new(
            store.clone(),
            tokens,
            hasher,
            RefreshPolicy::from_config(&config),
        );
        let limiter = AttemptLimiter::per_minute(config.login_attempts_per_minute);

        Ok(Self {
            state: AppState {
                config: Arc::new(config),
                auth: Arc::new(auth),
                registry: SessionRegistry::new(store),
                launcher,
                limiter: Arc::new(Mutex::new(limiter)),
            },
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/auth/register", post(auth::handlers::register))
            .route("/auth/login", post(auth::handlers::login))
            .route("/auth/refresh", post(auth::handlers::refresh))
            .route("/sessions", get(session::handlers::list_sessions))
            .route("/sessions/start", post(session::handlers::start_session))
            .route("/ws/terminal", get(terminal::terminal_ws))
            .nest_service("/static", ServeDir::new(&self.state.config.static_dir))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> LmiResult<()> {
        let addr = SocketAddr::new(self.state.config.bind, self.state.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LmiError::Other(format!("bind {addr} failed: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> LmiResult<()> {
        let local = listener.local_addr()?;
        info!(addr = %local, "listening");

        let gc_limiter = self.state.limiter.clone();
        let gc_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_GC_INTERVAL);
            loop {
                interval.tick().await;
                gc_limiter.lock().await.gc();
            }
        });

        let app = self.router();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;
        gc_task.abort();
        info!("server stopped");
        result.map_err(LmiError::Io)
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
