use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::fs as async_fs;
use tracing::debug;

use crate::supervisor::{ProcessSupervisor, SessionStatus};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found for {channel}: {name}")]
    NotFound { channel: String, name: String },
    #[error("rejected segment name for {channel}: {name}")]
    InvalidName { channel: String, name: String },
    #[error("io error reading {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Reads playlist and segment files from channel output directories.
#[derive(Debug, Clone)]
pub struct ArtifactServer {
    supervisor: Arc<ProcessSupervisor>,
}

impl ArtifactServer {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { supervisor }
    }

    /// Current playlist bytes; the session must already be `Ready`.
    pub async fn serve_playlist(&self, channel_id: &str) -> ArtifactResult<Bytes> {
        let session = self
            .supervisor
            .session(channel_id)
            .filter(|session| session.status() == SessionStatus::Ready)
            .ok_or_else(|| ArtifactError::NotFound {
                channel: channel_id.to_string(),
                name: "playlist".to_string(),
            })?;
        read_artifact(channel_id, session.playlist_path()).await
    }

    /// Segment bytes from the current session's directory. Nothing is served
    /// once the session has been stopped or taken out for a restart.
    pub async fn serve_segment(&self, channel_id: &str, filename: &str) -> ArtifactResult<Bytes> {
        if !is_segment_name(filename, self.supervisor.segment_extension()) {
            debug!(channel = %channel_id, name = %filename, "segment name rejected");
            return Err(ArtifactError::InvalidName {
                channel: channel_id.to_string(),
                name: filename.to_string(),
            });
        }
        let session = self
            .supervisor
            .session(channel_id)
            .filter(|session| session.status() != SessionStatus::Stopped)
            .ok_or_else(|| ArtifactError::NotFound {
                channel: channel_id.to_string(),
                name: filename.to_string(),
            })?;
        let path = contained_path(session.output_dir(), filename)
            .await
            .ok_or_else(|| ArtifactError::NotFound {
                channel: channel_id.to_string(),
                name: filename.to_string(),
            })?;
        read_artifact(channel_id, &path).await
    }
}

/// A single plain file name carrying the expected extension.
pub fn is_segment_name(filename: &str, extension: &str) -> bool {
    let path = Path::new(filename);
    let mut components = path.components();
    let single_normal = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    single_normal
        && !filename.contains(['/', '\\'])
        && !filename.starts_with('.')
        && path
            .extension()
            .map(|ext| ext == extension)
            .unwrap_or(false)
        && path.file_stem().map(|stem| !stem.is_empty()).unwrap_or(false)
}

/// Canonical path of `filename` if it exists and stays inside `dir`.
async fn contained_path(dir: &Path, filename: &str) -> Option<PathBuf> {
    let root = async_fs::canonicalize(dir).await.ok()?;
    let resolved = async_fs::canonicalize(root.join(filename)).await.ok()?;
    if resolved.starts_with(&root) && resolved != root {
        Some(resolved)
    } else {
        None
    }
}

async fn read_artifact(channel_id: &str, path: &Path) -> ArtifactResult<Bytes> {
    match async_fs::read(path).await {
        Ok(bytes) => Ok(Bytes::from(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ArtifactError::NotFound {
            channel: channel_id.to_string(),
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
        }),
        Err(source) => Err(ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
