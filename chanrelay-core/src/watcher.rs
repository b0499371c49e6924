//! Readiness wait for freshly started sessions.
//!
//! The backing process signals nothing except by writing its playlist, so the
//! watcher polls the output directory. Each poll also consults the process
//! handle and bails out as soon as the process is gone.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::SupervisorSection;
use crate::supervisor::{ProcessSupervisor, Session, SessionStatus};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("no session for channel {0}")]
    NoSession(String),
    #[error("backing process for {channel} exited before its playlist appeared ({exit})")]
    ProcessExitedEarly {
        channel: String,
        exit: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },
    #[error("playlist for {channel} not ready after {}s", .waited.as_secs())]
    StartupTimeout { channel: String, waited: Duration },
    #[error("session for {0} was stopped while waiting")]
    SessionStopped(String),
}

pub type WatchResult<T> = Result<T, WatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    #[default]
    Interactive,
    LongPoll,
}

#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub interactive_timeout: Duration,
    pub long_poll_timeout: Duration,
}

impl WatchSettings {
    pub fn from_section(section: &SupervisorSection) -> Self {
        Self {
            poll_interval: section.poll_interval(),
            interactive_timeout: section.interactive_timeout(),
            long_poll_timeout: section.long_poll_timeout(),
        }
    }

    pub fn timeout_for(&self, policy: WaitPolicy) -> Duration {
        match policy {
            WaitPolicy::Interactive => self.interactive_timeout,
            WaitPolicy::LongPoll => self.long_poll_timeout,
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self::from_section(&SupervisorSection::default())
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactWatcher {
    supervisor: Arc<ProcessSupervisor>,
    settings: WatchSettings,
}

impl ArtifactWatcher {
    pub fn new(supervisor: Arc<ProcessSupervisor>, settings: WatchSettings) -> Self {
        Self {
            supervisor,
            settings,
        }
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    /// `Ok(true)` once the playlist exists, `Ok(false)` when the policy's
    /// budget ran out with the process still alive.
    pub async fn wait_for_ready(&self, channel_id: &str, policy: WaitPolicy) -> WatchResult<bool> {
        let session = self
            .supervisor
            .session(channel_id)
            .ok_or_else(|| WatchError::NoSession(channel_id.to_string()))?;
        let timeout = self.settings.timeout_for(policy);
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            if let Some(ready) = self.poll(&session).await? {
                debug!(
                    channel = %channel_id,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "playlist ready"
                );
                return Ok(ready);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    channel = %channel_id,
                    session = %session.id(),
                    timeout_s = timeout.as_secs(),
                    policy = ?policy,
                    "playlist not ready before timeout"
                );
                return Ok(false);
            }
            let pause = self.settings.poll_interval.min(deadline - now);
            tokio::select! {
                _ = sleep(pause) => {}
                _ = session.process().exited() => {}
            }
        }
    }

    /// Like `wait_for_ready`, reporting a timeout as `StartupTimeout`.
    pub async fn await_ready(&self, channel_id: &str, policy: WaitPolicy) -> WatchResult<()> {
        if self.wait_for_ready(channel_id, policy).await? {
            Ok(())
        } else {
            Err(WatchError::StartupTimeout {
                channel: channel_id.to_string(),
                waited: self.settings.timeout_for(policy),
            })
        }
    }

    async fn poll(&self, session: &Arc<Session>) -> WatchResult<Option<bool>> {
        let channel_id = session.channel_id();
        let replaced = self
            .supervisor
            .session(channel_id)
            .map(|current| current.id() != session.id())
            .unwrap_or(true);
        if replaced || session.status() == SessionStatus::Stopped {
            return Err(WatchError::SessionStopped(channel_id.to_string()));
        }

        let playlist_exists = match tokio::fs::try_exists(session.playlist_path()).await {
            Ok(exists) => exists,
            Err(error) => {
                debug!(
                    channel = %channel_id,
                    path = %session.playlist_path().display(),
                    %error,
                    "cannot check playlist"
                );
                false
            }
        };
        if playlist_exists {
            if session.mark_ready() {
                info!(
                    channel = %channel_id,
                    session = %session.id(),
                    "session ready"
                );
            }
            return Ok(Some(true));
        }

        if let Some(exit) = session.process().exit_status() {
            session.mark_failed();
            let stderr_tail = session.process().stderr_tail();
            warn!(
                channel = %channel_id,
                session = %session.id(),
                %exit,
                stderr = %stderr_tail,
                "backing process exited before readiness"
            );
            return Err(WatchError::ProcessExitedEarly {
                channel: channel_id.to_string(),
                exit: exit.to_string(),
                exit_code: exit.code,
                stderr_tail,
            });
        }
        Ok(None)
    }
}
