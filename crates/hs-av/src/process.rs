//! Long-lived ffmpeg processes feeding a live response.
//!
//! [`TranscodeProcess`] owns the child and guarantees it does not outlive
//! its owner: the child is spawned with `kill_on_drop`, and callers that can
//! afford to wait use [`TranscodeProcess::terminate`] for a SIGTERM first.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Number of stderr lines retained for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// How a [`TranscodeProcess::terminate`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process had already exited on its own.
    Exited(ExitStatus),
    /// The process stopped after SIGTERM within the grace period.
    Terminated(ExitStatus),
    /// The process had to be killed.
    Killed,
}

/// A running ffmpeg child with piped output.
#[derive(Debug)]
pub struct TranscodeProcess {
    child: Child,
    tool: String,
    pid: Option<u32>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl TranscodeProcess {
    /// Spawn `program args...` with stdout piped, stderr captured into a
    /// rolling tail, and stdin piped when `pipe_stdin` is set.
    pub fn spawn(program: &Path, args: &[String], pipe_stdin: bool) -> hs_core::Result<Self> {
        let tool = program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| program.to_string_lossy().to_string());

        let mut child = Command::new(program)
            .args(args)
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| hs_core::Error::tool(&tool, format!("failed to spawn: {e}")))?;

        let pid = child.id();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            let tool = tool.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::trace!(tool = %tool, "{line}");
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        tracing::debug!(tool = %tool, pid = ?pid, args = ?args, "Spawned transcode process");

        Ok(Self {
            child,
            tool,
            pid,
            stderr_tail,
            stderr_task,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Take the stdout pipe. Returns `None` on the second call.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stdin pipe, present only when spawned with `pipe_stdin`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.settle_stderr().await;
        Ok(status)
    }

    /// Last stderr lines, newline-joined.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.lock().iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Give the stderr reader a moment to drain after the child exited.
    async fn settle_stderr(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(Duration::from_millis(500), task).await;
        }
    }

    /// Stop the process: SIGTERM, then a hard kill once `grace` expires.
    pub async fn terminate(&mut self, grace: Duration) -> ProcessExit {
        if let Ok(Some(status)) = self.child.try_wait() {
            return ProcessExit::Exited(status);
        }

        if self.send_sigterm() {
            if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
                tracing::debug!(tool = %self.tool, pid = ?self.pid, "Transcode process terminated");
                return ProcessExit::Terminated(status);
            }
        }

        if let Err(e) = self.child.start_kill() {
            tracing::warn!(tool = %self.tool, pid = ?self.pid, error = %e, "Failed to kill transcode process");
        }
        let _ = self.child.wait().await;
        tracing::debug!(tool = %self.tool, pid = ?self.pid, "Transcode process killed");
        ProcessExit::Killed
    }

    #[cfg(unix)]
    fn send_sigterm(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return false;
        };
        match i32::try_from(pid) {
            Ok(raw) => kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok(),
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn send_sigterm(&self) -> bool {
        false
    }
}

impl Drop for TranscodeProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            tracing::debug!(tool = %self.tool, pid = ?self.pid, "Killing transcode process on drop");
            let _ = self.child.start_kill();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
