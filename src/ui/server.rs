//! HTTP server setup

use axum::routing::{get, put};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::error::Error;
use crate::session::SessionManager;
use crate::ui::{handlers, websocket};

/// State shared by every handler
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub started: Instant,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            started: Instant::now(),
        }
    }
}

/// Build the control router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/devices", get(handlers::get_devices))
        .route("/api/sessions", get(handlers::get_sessions))
        .route("/api/sessions/:id", get(handlers::get_session))
        .route("/api/sessions/:id/listen", put(handlers::set_listen))
        .route("/api/sessions/:id/save", put(handlers::set_save))
        .route("/ws", get(websocket::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, sessions: Arc<SessionManager>) -> Self {
        Self {
            config,
            state: Arc::new(AppState::new(sessions)),
        }
    }

    /// Serve until the listener fails
    pub async fn run(self) -> Result<(), Error> {
        let addr = self.config.bind_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Control API listening on http://{}", addr);

        axum::serve(listener, router(self.state)).await?;
        Ok(())
    }

    /// Serve on a background task
    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Control API stopped: {}", e);
            }
        })
    }
}
