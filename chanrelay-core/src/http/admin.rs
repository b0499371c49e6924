//! Administrative routes over the channel registry and live sessions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::channel::Channel;
use crate::supervisor::{SessionSnapshot, SessionStatus, TerminateOutcome};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/channels", get(list_channels).post(add_channel))
        .route("/channels/{id}", get(get_channel).delete(remove_channel))
        .route("/channels/{id}/status", get(channel_status))
        .route("/channels/{id}/restart", post(restart_channel))
        .route("/channels/{id}/stop", post(stop_channel))
        .route("/sessions", get(list_sessions))
}

#[derive(Debug, Serialize)]
pub struct ChannelView {
    #[serde(flatten)]
    pub channel: Channel,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct ChannelStatusView {
    pub channel_id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct StopView {
    pub channel_id: String,
    /// Absent when no session was running.
    pub outcome: Option<TerminateOutcome>,
}

#[derive(Debug, Serialize)]
pub struct RestartView {
    pub channel_id: String,
    pub launched: bool,
    pub status: SessionStatus,
}

async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelView>> {
    let views = state
        .supervisor
        .registry()
        .list()
        .into_iter()
        .map(|channel| ChannelView {
            status: state.supervisor.status(&channel.id),
            channel,
        })
        .collect();
    Json(views)
}

async fn get_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ChannelView>> {
    let channel = state
        .supervisor
        .registry()
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("channel '{id}' not found")))?;
    Ok(Json(ChannelView {
        status: state.supervisor.status(&id),
        channel,
    }))
}

async fn add_channel(
    State(state): State<AppState>,
    Json(channel): Json<Channel>,
) -> ApiResult<(StatusCode, Json<Channel>)> {
    state.supervisor.registry().add(channel.clone())?;
    Ok((StatusCode::CREATED, Json(channel)))
}

/// Unregisters first so no new session can start, then stops the live one.
async fn remove_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StopView>> {
    state.supervisor.registry().remove(&id)?;
    let outcome = state.supervisor.stop(&id).await?;
    info!(channel = %id, outcome = ?outcome, "channel removed");
    Ok(Json(StopView {
        channel_id: id,
        outcome,
    }))
}

async fn channel_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ChannelStatusView>> {
    let session = state.supervisor.snapshot(&id);
    if session.is_none() && !state.supervisor.registry().contains(&id) {
        return Err(ApiError::not_found(format!("channel '{id}' not found")));
    }
    Ok(Json(ChannelStatusView {
        status: state.supervisor.status(&id),
        channel_id: id,
        session,
    }))
}

async fn restart_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RestartView>> {
    let launched = state.supervisor.restart(&id).await?;
    Ok(Json(RestartView {
        status: state.supervisor.status(&id),
        channel_id: id,
        launched,
    }))
}

async fn stop_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StopView>> {
    if !state.supervisor.registry().contains(&id) && state.supervisor.session(&id).is_none() {
        return Err(ApiError::not_found(format!("channel '{id}' not found")));
    }
    let outcome = state.supervisor.stop(&id).await?;
    Ok(Json(StopView {
        channel_id: id,
        outcome,
    }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.supervisor.snapshots())
}
