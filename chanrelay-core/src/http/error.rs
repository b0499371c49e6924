//! API error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::artifacts::ArtifactError;
use crate::channel::ChannelError;
use crate::supervisor::SupervisorError;
use crate::watcher::WatchError;

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::UnknownChannel(id) => {
                ApiError::not_found(format!("channel '{id}' not found"))
            }
            SupervisorError::ShuttingDown => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SHUTTING_DOWN",
                "server is shutting down",
            ),
            err @ SupervisorError::Spawn { .. } => {
                tracing::error!("{err}");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SPAWN_FAILED",
                    "backing process could not be launched",
                )
            }
            err @ SupervisorError::OutputDir { .. } => {
                tracing::error!("{err}");
                ApiError::internal("output directory unavailable")
            }
        }
    }
}

impl From<WatchError> for ApiError {
    fn from(err: WatchError) -> Self {
        let message = err.to_string();
        match err {
            WatchError::ProcessExitedEarly {
                exit_code,
                stderr_tail,
                ..
            } => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "PROCESS_EXITED_EARLY", message)
                .with_details(json!({
                    "exit_code": exit_code,
                    "stderr_tail": stderr_tail,
                })),
            WatchError::StartupTimeout { waited, .. } => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "STARTUP_TIMEOUT", message)
                    .with_details(json!({ "waited_seconds": waited.as_secs() }))
            }
            WatchError::SessionStopped(_) => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SESSION_STOPPED", message)
            }
            WatchError::NoSession(_) => ApiError::service_unavailable(message),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound { .. } | ArtifactError::InvalidName { .. } => {
                ApiError::not_found(err.to_string())
            }
            ArtifactError::Io { .. } => {
                tracing::error!("{err}");
                ApiError::internal("failed to read artifact")
            }
        }
    }
}

impl From<ChannelError> for ApiError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::InvalidId(_)
            | ChannelError::InvalidSource { .. }
            | ChannelError::InvalidProfile { .. } => ApiError::validation(err.to_string()),
            ChannelError::Duplicate(_) => ApiError::conflict(err.to_string()),
            ChannelError::NotFound(_) => ApiError::not_found(err.to_string()),
            ChannelError::Persist(_) => {
                tracing::error!("{err}");
                ApiError::internal("failed to persist channel registry")
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn startup_failures_are_distinguishable() {
        let early: ApiError = WatchError::ProcessExitedEarly {
            channel: "y".into(),
            exit: "exit code 1".into(),
            exit_code: Some(1),
            stderr_tail: "Connection refused".into(),
        }
        .into();
        let timeout: ApiError = WatchError::StartupTimeout {
            channel: "y".into(),
            waited: Duration::from_secs(15),
        }
        .into();
        assert_eq!(early.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(timeout.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_ne!(early.code, timeout.code);
        assert_eq!(
            early.details.unwrap()["stderr_tail"],
            json!("Connection refused")
        );
    }

    #[test]
    fn unknown_channel_is_not_found() {
        let err: ApiError = SupervisorError::UnknownChannel("nope".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
