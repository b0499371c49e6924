//! HTTP surface over the session manager.

pub mod admin;
pub mod channels;
pub mod error;

use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::artifacts::ArtifactServer;
use crate::lifecycle::{wait_for_signal, LifecycleManager};
use crate::supervisor::ProcessSupervisor;
use crate::watcher::{ArtifactWatcher, WatchSettings};

pub use self::error::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub supervisor: Arc<ProcessSupervisor>,
    pub watcher: ArtifactWatcher,
    pub artifacts: ArtifactServer,
    pub lifecycle: Arc<LifecycleManager>,
}

impl AppState {
    pub fn new(supervisor: Arc<ProcessSupervisor>, watch: WatchSettings) -> Self {
        Self {
            start_time: Instant::now(),
            watcher: ArtifactWatcher::new(supervisor.clone(), watch),
            artifacts: ArtifactServer::new(supervisor.clone()),
            lifecycle: Arc::new(LifecycleManager::new(supervisor.clone())),
            supervisor,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/channel", channels::router())
        .nest("/admin", admin::router())
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until a shutdown signal, tearing down every session before the
/// listener drains.
pub async fn serve(listener: TcpListener, state: AppState) -> io::Result<()> {
    let lifecycle = state.lifecycle.clone();
    let router = create_router(state);
    info!(addr = ?listener.local_addr().ok(), "http server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            lifecycle.shutdown().await;
        })
        .await
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    channels: usize,
    live_sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.supervisor.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        channels: state.supervisor.registry().len(),
        live_sessions: state.supervisor.live_session_count(),
    })
}
