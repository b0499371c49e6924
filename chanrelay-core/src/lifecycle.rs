use std::io;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::supervisor::{ProcessSupervisor, TerminateOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub graceful: usize,
    pub forced: usize,
    pub output_root_removed: bool,
}

/// Process-wide teardown of every supervised process.
#[derive(Debug)]
pub struct LifecycleManager {
    supervisor: Arc<ProcessSupervisor>,
    report: OnceCell<ShutdownReport>,
}

impl LifecycleManager {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            supervisor,
            report: OnceCell::new(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.report.initialized()
    }

    /// Runs once; concurrent and later callers get the first run's report.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.report
            .get_or_init(|| self.run_shutdown())
            .await
            .clone()
    }

    async fn run_shutdown(&self) -> ShutdownReport {
        self.supervisor.begin_shutdown();
        let channels = self.supervisor.known_channels();
        info!(channels = channels.len(), "shutting down backing processes");

        let outcomes = join_all(
            channels
                .iter()
                .map(|channel_id| self.supervisor.stop(channel_id)),
        )
        .await;

        let mut report = ShutdownReport::default();
        for (channel_id, outcome) in channels.iter().zip(outcomes) {
            match outcome {
                Ok(Some(outcome)) => {
                    report.stopped += 1;
                    match outcome {
                        TerminateOutcome::Graceful => report.graceful += 1,
                        TerminateOutcome::Forced => report.forced += 1,
                        TerminateOutcome::AlreadyExited => {}
                    }
                }
                Ok(None) => {}
                Err(err) => error!(channel = %channel_id, %err, "failed to stop channel"),
            }
        }

        let root = self.supervisor.output_root();
        report.output_root_removed = match tokio::fs::remove_dir_all(root).await {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(path = %root.display(), %err, "failed to remove output root");
                false
            }
        };
        info!(
            stopped = report.stopped,
            forced = report.forced,
            "shutdown complete"
        );
        report
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
