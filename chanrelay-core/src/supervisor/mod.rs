pub mod command;
pub mod process;
pub mod session;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::fs as async_fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::channel::ChannelRegistry;
use crate::config::{FfmpegSection, RelayConfig};

pub use self::command::{CommandBuilder, FfmpegCommandBuilder};
pub use self::process::{ProcessExit, ProcessHandle, StderrTail, TerminateOutcome};
pub use self::session::{Session, SessionSnapshot, SessionStatus};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("supervisor is shutting down")]
    ShuttingDown,
    #[error("failed to launch backing process for {channel} ({command}): {source}")]
    Spawn {
        channel: String,
        command: String,
        source: io::Error,
    },
    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir { path: PathBuf, source: io::Error },
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub output_root: PathBuf,
    pub termination_grace: Duration,
    pub stderr_tail_bytes: usize,
    pub ffmpeg: FfmpegSection,
}

impl SupervisorSettings {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            termination_grace: Duration::from_secs(5),
            stderr_tail_bytes: 1000,
            ffmpeg: FfmpegSection::default(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            output_root: config.output_root(),
            termination_grace: config.supervisor.termination_grace(),
            stderr_tail_bytes: config.supervisor.stderr_tail_bytes,
            ffmpeg: config.ffmpeg.clone(),
        }
    }
}

/// Owns the live sessions, at most one per channel.
///
/// Every start, stop and restart for a channel runs under that channel's
/// async lock. The session map is only held for short reads and swaps.
pub struct ProcessSupervisor {
    registry: Arc<ChannelRegistry>,
    settings: SupervisorSettings,
    builder: Arc<dyn CommandBuilder>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    shutting_down: AtomicBool,
    launches: AtomicU64,
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("settings", &self.settings)
            .field("live_sessions", &self.sessions.read().len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl ProcessSupervisor {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        settings: SupervisorSettings,
        builder: Option<Arc<dyn CommandBuilder>>,
    ) -> Self {
        let builder = builder
            .unwrap_or_else(|| Arc::new(FfmpegCommandBuilder::new(settings.ffmpeg.clone())));
        Self {
            registry,
            settings,
            builder,
            sessions: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            launches: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn output_root(&self) -> &Path {
        &self.settings.output_root
    }

    pub fn output_dir(&self, channel_id: &str) -> PathBuf {
        self.settings.output_root.join(channel_id)
    }

    pub fn playlist_path(&self, channel_id: &str) -> PathBuf {
        self.output_dir(channel_id)
            .join(&self.settings.ffmpeg.playlist_name)
    }

    pub fn segment_extension(&self) -> &str {
        &self.settings.ffmpeg.segment_extension
    }

    /// Number of backing processes launched since construction.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn session(&self, channel_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(channel_id).cloned()
    }

    pub fn status(&self, channel_id: &str) -> SessionStatus {
        self.session(channel_id)
            .map(|session| session.status())
            .unwrap_or(SessionStatus::NotStarted)
    }

    pub fn snapshot(&self, channel_id: &str) -> Option<SessionSnapshot> {
        self.session(channel_id).map(|session| session.snapshot())
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<_> = self
            .sessions
            .read()
            .values()
            .map(|session| session.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        snapshots
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|session| session.is_live())
            .count()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Makes every later `ensure_running` fail with `ShuttingDown`.
    pub(crate) fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Channels that hold, or may be about to hold, a session.
    pub(crate) fn known_channels(&self) -> Vec<String> {
        let mut ids: BTreeSet<String> = self.locks.lock().keys().cloned().collect();
        ids.extend(self.sessions.read().keys().cloned());
        ids.into_iter().collect()
    }

    /// Returns `true` when this call launched a new backing process.
    pub async fn ensure_running(&self, channel_id: &str) -> SupervisorResult<bool> {
        let lock = self
            .channel_lock(channel_id)
            .ok_or_else(|| SupervisorError::UnknownChannel(channel_id.to_string()))?;
        let result = {
            let _guard = lock.lock().await;
            self.ensure_running_locked(channel_id).await
        };
        self.release_lock(channel_id, &lock);
        result
    }

    pub async fn stop(&self, channel_id: &str) -> SupervisorResult<Option<TerminateOutcome>> {
        let Some(lock) = self.channel_lock(channel_id) else {
            return Ok(None);
        };
        let result = {
            let _guard = lock.lock().await;
            self.stop_locked(channel_id).await
        };
        self.release_lock(channel_id, &lock);
        result
    }

    pub async fn restart(&self, channel_id: &str) -> SupervisorResult<bool> {
        let lock = self
            .channel_lock(channel_id)
            .ok_or_else(|| SupervisorError::UnknownChannel(channel_id.to_string()))?;
        let result = {
            let _guard = lock.lock().await;
            self.restart_locked(channel_id).await
        };
        self.release_lock(channel_id, &lock);
        result
    }

    /// Number of channels with a lock entry.
    pub fn tracked_channels(&self) -> usize {
        self.locks.lock().len()
    }

    /// Lock for a channel that is registered or still holds a session.
    fn channel_lock(&self, channel_id: &str) -> Option<Arc<AsyncMutex<()>>> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(channel_id) {
            return Some(lock.clone());
        }
        if !self.is_tracked(channel_id) {
            return None;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(channel_id.to_string(), lock.clone());
        Some(lock)
    }

    /// Drops the entry of an unregistered channel once nobody else holds it.
    fn release_lock(&self, channel_id: &str, lock: &Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock();
        if self.is_tracked(channel_id) {
            return;
        }
        // the map and `lock` itself; every other clone is taken under `locks`
        let unshared = Arc::strong_count(lock) == 2;
        let same = locks
            .get(channel_id)
            .map(|held| Arc::ptr_eq(held, lock))
            .unwrap_or(false);
        if same && unshared {
            locks.remove(channel_id);
            debug!(channel = %channel_id, "released lock of unregistered channel");
        }
    }

    fn is_tracked(&self, channel_id: &str) -> bool {
        self.registry.contains(channel_id) || self.sessions.read().contains_key(channel_id)
    }

    async fn restart_locked(&self, channel_id: &str) -> SupervisorResult<bool> {
        if !self.registry.contains(channel_id) {
            return Err(SupervisorError::UnknownChannel(channel_id.to_string()));
        }
        self.stop_locked(channel_id).await?;
        info!(channel = %channel_id, "restarting backing process");
        self.ensure_running_locked(channel_id).await
    }

    async fn ensure_running_locked(&self, channel_id: &str) -> SupervisorResult<bool> {
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }
        let channel = self
            .registry
            .get(channel_id)
            .ok_or_else(|| SupervisorError::UnknownChannel(channel_id.to_string()))?;

        if let Some(existing) = self.session(channel_id) {
            if existing.process().is_running() {
                return Ok(false);
            }
            debug!(
                channel = %channel_id,
                session = %existing.id(),
                status = %existing.status(),
                "replacing stale session"
            );
            self.stop_locked(channel_id).await?;
        }

        let output_dir = self.output_dir(channel_id);
        self.prepare_output_dir(&output_dir).await?;

        let command = self.builder.build(&channel, &output_dir);
        let process =
            match ProcessHandle::spawn(command, channel_id, self.settings.stderr_tail_bytes) {
                Ok(process) => process,
                Err(source) => {
                    remove_output_dir(&output_dir).await;
                    return Err(SupervisorError::Spawn {
                        channel: channel_id.to_string(),
                        command: self.builder.describe(&channel, &output_dir),
                        source,
                    });
                }
            };
        self.launches.fetch_add(1, Ordering::SeqCst);

        let session = Arc::new(Session::new(
            channel_id.to_string(),
            output_dir,
            &self.settings.ffmpeg.playlist_name,
            process,
        ));
        info!(
            channel = %channel_id,
            session = %session.id(),
            pid = ?session.process().pid(),
            profile = %channel.profile,
            "backing process started"
        );
        self.sessions
            .write()
            .insert(channel_id.to_string(), session);
        Ok(true)
    }

    async fn stop_locked(&self, channel_id: &str) -> SupervisorResult<Option<TerminateOutcome>> {
        let Some(session) = self.sessions.write().remove(channel_id) else {
            return Ok(None);
        };
        session.mark_stopped();
        let outcome = session
            .process()
            .terminate(self.settings.termination_grace)
            .await;
        if outcome == TerminateOutcome::Forced {
            warn!(
                channel = %channel_id,
                session = %session.id(),
                "backing process ignored graceful stop and was killed"
            );
        }
        remove_output_dir(session.output_dir()).await;
        info!(
            channel = %channel_id,
            session = %session.id(),
            outcome = ?outcome,
            "session stopped"
        );
        Ok(Some(outcome))
    }

    async fn prepare_output_dir(&self, output_dir: &Path) -> SupervisorResult<()> {
        match async_fs::remove_dir_all(output_dir).await {
            Ok(()) => debug!(path = %output_dir.display(), "removed leftover output directory"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(SupervisorError::OutputDir {
                    path: output_dir.to_path_buf(),
                    source,
                })
            }
        }
        async_fs::create_dir_all(output_dir)
            .await
            .map_err(|source| SupervisorError::OutputDir {
                path: output_dir.to_path_buf(),
                source,
            })
    }
}

async fn remove_output_dir(path: &Path) {
    match async_fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(path = %path.display(), %error, "failed to remove output directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    #[tokio::test]
    async fn unknown_ids_leave_no_lock_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = Arc::new(
            ChannelRegistry::from_channels([Channel::new("a", "https://example.com/a.m3u8")])
                .unwrap(),
        );
        let supervisor = ProcessSupervisor::new(
            registry.clone(),
            SupervisorSettings::new(dir.path().join("hls")),
            None,
        );

        for i in 0..1000 {
            let id = format!("nope{i}");
            assert!(matches!(
                supervisor.ensure_running(&id).await,
                Err(SupervisorError::UnknownChannel(_))
            ));
            assert!(matches!(
                supervisor.restart(&id).await,
                Err(SupervisorError::UnknownChannel(_))
            ));
            assert_eq!(supervisor.stop(&id).await.unwrap(), None);
        }
        assert_eq!(supervisor.tracked_channels(), 0);
        assert!(supervisor.known_channels().is_empty());

        assert_eq!(supervisor.stop("a").await.unwrap(), None);
        assert_eq!(supervisor.tracked_channels(), 1);
        registry.remove("a").unwrap();
        assert_eq!(supervisor.stop("a").await.unwrap(), None);
        assert_eq!(supervisor.tracked_channels(), 0);
    }
}
