//! Playlist and segment routes.

use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::debug;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::supervisor::SessionStatus;
use crate::watcher::WaitPolicy;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/playlist", get(get_playlist))
        .route("/{id}/segment/{name}", get(get_segment))
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaylistQuery {
    #[serde(default)]
    pub long_poll: bool,
}

impl PlaylistQuery {
    fn policy(&self) -> WaitPolicy {
        if self.long_poll {
            WaitPolicy::LongPoll
        } else {
            WaitPolicy::Interactive
        }
    }
}

/// Starts the channel if needed and answers with its playlist once ready.
async fn get_playlist(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PlaylistQuery>,
) -> ApiResult<Response> {
    let started = state.supervisor.ensure_running(&id).await?;
    if started || state.supervisor.status(&id) != SessionStatus::Ready {
        debug!(channel = %id, started, policy = ?query.policy(), "waiting for playlist");
        state.watcher.await_ready(&id, query.policy()).await?;
    }
    let body = state.artifacts.serve_playlist(&id).await?;
    Ok((
        [(CONTENT_TYPE, PLAYLIST_CONTENT_TYPE), (CACHE_CONTROL, "no-cache")],
        body,
    )
        .into_response())
}

async fn get_segment(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<Response> {
    if !state.supervisor.registry().contains(&id) {
        return Err(ApiError::not_found(format!("channel '{id}' not found")));
    }
    let body = state.artifacts.serve_segment(&id, &name).await?;
    Ok((
        [
            (CONTENT_TYPE, segment_content_type(&name)),
            (CACHE_CONTROL, "max-age=60"),
        ],
        body,
    )
        .into_response())
}

pub fn segment_content_type(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("m4s") | Some("mp4") => "video/mp4",
        Some("aac") => "audio/aac",
        _ => "video/mp2t",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_poll_flag_selects_policy() {
        assert_eq!(PlaylistQuery::default().policy(), WaitPolicy::Interactive);
        let query = PlaylistQuery { long_poll: true };
        assert_eq!(query.policy(), WaitPolicy::LongPoll);
    }

    #[test]
    fn segment_types_follow_extension() {
        assert_eq!(segment_content_type("seg_00001.ts"), "video/mp2t");
        assert_eq!(segment_content_type("seg_00001.m4s"), "video/mp4");
        assert_eq!(segment_content_type("noext"), "video/mp2t");
    }
}
