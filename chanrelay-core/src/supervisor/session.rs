use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use super::process::ProcessHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::Starting => "starting",
            SessionStatus::Ready => "ready",
            SessionStatus::Failed => "failed",
            SessionStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Failed | SessionStatus::Stopped)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    channel_id: String,
    output_dir: PathBuf,
    playlist_path: PathBuf,
    started_at: DateTime<Utc>,
    process: ProcessHandle,
    status: RwLock<SessionStatus>,
}

impl Session {
    pub(crate) fn new(
        channel_id: String,
        output_dir: PathBuf,
        playlist_name: &str,
        process: ProcessHandle,
    ) -> Self {
        let playlist_path = output_dir.join(playlist_name);
        Self {
            id: Uuid::new_v4(),
            channel_id,
            output_dir,
            playlist_path,
            started_at: Utc::now(),
            process,
            status: RwLock::new(SessionStatus::Starting),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn playlist_path(&self) -> &Path {
        &self.playlist_path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    /// Recorded status folded with what the process handle knows right now.
    pub fn status(&self) -> SessionStatus {
        let recorded = *self.status.read();
        if self.process.is_running() {
            return recorded;
        }
        match recorded {
            SessionStatus::Starting => SessionStatus::Failed,
            SessionStatus::Ready => SessionStatus::Stopped,
            other => other,
        }
    }

    pub fn is_live(&self) -> bool {
        self.process.is_running() && !self.status().is_terminal()
    }

    pub(crate) fn mark_ready(&self) -> bool {
        self.transition(SessionStatus::Starting, SessionStatus::Ready)
    }

    pub(crate) fn mark_failed(&self) -> bool {
        self.transition(SessionStatus::Starting, SessionStatus::Failed)
    }

    pub(crate) fn mark_stopped(&self) {
        *self.status.write() = SessionStatus::Stopped;
    }

    fn transition(&self, from: SessionStatus, to: SessionStatus) -> bool {
        let mut status = self.status.write();
        if *status == from {
            *status = to;
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            channel_id: self.channel_id.clone(),
            status: self.status(),
            pid: self.process.pid(),
            started_at: self.started_at,
            output_dir: self.output_dir.clone(),
            exit_code: self.process.exit_status().and_then(|exit| exit.code),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub channel_id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}
