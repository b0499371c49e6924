use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub success: bool,
}

impl ProcessExit {
    fn from_status(status: io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                code: status.code(),
                success: status.success(),
            },
            Err(error) => {
                warn!(%error, "failed to wait on backing process");
                Self {
                    code: None,
                    success: false,
                }
            }
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateOutcome {
    AlreadyExited,
    Graceful,
    Forced,
}

/// Keeps the last `capacity` bytes written to the process's stderr.
#[derive(Debug)]
pub struct StderrTail {
    capacity: usize,
    buffer: Mutex<VecDeque<u8>>,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let mut buffer = self.buffer.lock();
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let overflow = (buffer.len() + bytes.len()).saturating_sub(self.capacity);
        buffer.drain(..overflow);
        buffer.extend(bytes);
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock();
        let (front, back) = buffer.as_slices();
        let mut bytes = Vec::with_capacity(buffer.len());
        bytes.extend_from_slice(front);
        bytes.extend_from_slice(back);
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

/// Handle to one spawned backing process.
///
/// The child is owned by a reaper task which publishes the exit status on a
/// watch channel. Signals go through that task, so they are only delivered
/// while the child is still unreaped. Dropping the handle kills the process.
pub struct ProcessHandle {
    pid: Option<u32>,
    exit: watch::Receiver<Option<ProcessExit>>,
    signals: mpsc::UnboundedSender<Signal>,
    stderr: Arc<StderrTail>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("exit", &*self.exit.borrow())
            .finish()
    }
}

impl ProcessHandle {
    pub fn spawn(mut command: Command, label: &str, stderr_tail_bytes: usize) -> io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn()?;
        let pid = child.id();
        let stderr = Arc::new(StderrTail::new(stderr_tail_bytes));

        let reader = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(drain_stderr(pipe, stderr.clone(), label.to_string())));

        let (exit_tx, exit_rx) = watch::channel(None);
        let (signals, mut signal_rx) = mpsc::unbounded_channel();
        let label = label.to_string();
        tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    signal = signal_rx.recv() => match signal {
                        Some(Signal::Terminate) if send_sigterm(&child) => {}
                        // kill requested, handle dropped or SIGTERM not sent
                        _ => {
                            if let Err(error) = child.start_kill() {
                                debug!(channel = %label, %error, "kill signal not delivered");
                            }
                            break child.wait().await;
                        }
                    },
                }
            };
            if let Some(reader) = reader {
                let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, reader).await;
            }
            let exit = ProcessExit::from_status(status);
            debug!(channel = %label, pid = ?pid, %exit, "backing process reaped");
            let _ = exit_tx.send(Some(exit));
        });

        Ok(Self {
            pid,
            exit: exit_rx,
            signals,
            stderr,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }

    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr.contents()
    }

    /// Resolves once the process has been reaped.
    pub async fn exited(&self) -> ProcessExit {
        let mut exit = self.exit.clone();
        let published = match exit.wait_for(Option::is_some).await {
            Ok(value) => *value,
            // reaper gone without publishing: treat as dead
            Err(_) => None,
        };
        published.unwrap_or(ProcessExit {
            code: None,
            success: false,
        })
    }

    pub async fn wait_exit(&self, timeout: Duration) -> Option<ProcessExit> {
        tokio::time::timeout(timeout, self.exited()).await.ok()
    }

    /// Graceful signal, then a forced kill once `grace` has elapsed.
    pub async fn terminate(&self, grace: Duration) -> TerminateOutcome {
        if !self.is_running() {
            return TerminateOutcome::AlreadyExited;
        }
        // a send error means the reaper is done and the exit is about to land
        let _ = self.signals.send(Signal::Terminate);
        if self.wait_exit(grace).await.is_some() {
            return TerminateOutcome::Graceful;
        }
        self.force_kill();
        self.exited().await;
        TerminateOutcome::Forced
    }

    pub fn force_kill(&self) {
        let _ = self.signals.send(Signal::Kill);
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    // `id()` is `None` once the child has been waited on
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // SAFETY: the caller owns `child` and has not reaped it, so `pid` is still ours.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    rc == 0
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

async fn drain_stderr(pipe: ChildStderr, tail: Arc<StderrTail>, label: String) {
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(target: "chanrelay::ffmpeg", channel = %label, "{line}");
                tail.push(line.as_bytes());
                tail.push(b"\n");
            }
            Ok(None) => break,
            Err(error) => {
                debug!(channel = %label, %error, "stderr read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_last_bytes() {
        let tail = StderrTail::new(8);
        tail.push(b"abcdef");
        tail.push(b"ghijkl");
        assert_eq!(tail.contents(), "efghijkl");
        tail.push(b"0123456789");
        assert_eq!(tail.contents(), "23456789");
    }

    #[test]
    fn zero_capacity_tail_stays_empty() {
        let tail = StderrTail::new(0);
        tail.push(b"noise");
        assert_eq!(tail.contents(), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_exit_and_stderr() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo 'Connection refused' >&2; exit 3");
        let handle = ProcessHandle::spawn(command, "test", 1000).unwrap();
        let exit = handle.exited().await;
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success);
        assert!(!handle.is_running());
        assert!(handle.stderr_tail().contains("Connection refused"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_stops_sleeping_process() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("exec sleep 30");
        let handle = ProcessHandle::spawn(command, "test", 1000).unwrap();
        assert!(handle.is_running());
        let outcome = handle.terminate(Duration::from_secs(2)).await;
        assert_eq!(outcome, TerminateOutcome::Graceful);
        assert!(!handle.is_running());
        assert_eq!(
            handle.terminate(Duration::from_secs(2)).await,
            TerminateOutcome::AlreadyExited
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_after_exit_does_not_signal_reaped_pid() {
        // the background sleep keeps stderr open, holding the reaper in its drain
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 1 & exit 0");
        let handle = ProcessHandle::spawn(command, "test", 1000).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = handle.terminate(Duration::from_secs(2)).await;
        assert_ne!(outcome, TerminateOutcome::Forced);
        let exit = handle.exit_status().unwrap();
        assert_eq!(exit.code, Some(0));
        assert!(exit.success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_escalates_when_sigterm_is_ignored() {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("trap '' TERM; while true; do sleep 0.05; done");
        let handle = ProcessHandle::spawn(command, "test", 1000).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let outcome = handle.terminate(Duration::from_millis(300)).await;
        assert_eq!(outcome, TerminateOutcome::Forced);
        assert!(!handle.is_running());
    }
}
