//! Streaming session runner.
//!
//! A session owns one ffmpeg process for the lifetime of one HTTP response.
//! Its lifecycle is an explicit state machine driven through [`transition`]:
//!
//! ```text
//! Idle --Start--> Starting --Spawned--> Running --Completed--> Finished
//!                    |                     |
//!                    +------Failed---------+--------------> Errored
//! Idle | Starting | Running --ClientClosed--> Aborted
//! ```
//!
//! Whatever the outcome, the pump task terminates the process before it
//! returns, and the active-stream guard untracks the session after that.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use hs_av::TranscodeProcess;
use hs_core::config::StreamingConfig;
use hs_core::{Error, MediaSource};
use hs_transcode::{ProcessInput, ProcessSpec};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::active::{ActiveStreams, StreamLabel};
use super::monitor::SpeedMonitor;

/// Lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Finished,
    Errored,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Spawned,
    Completed,
    Failed,
    ClientClosed,
}

/// The next state after `event`, or `None` when the event does not apply.
pub fn transition(state: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Idle, E::Start) => Some(S::Starting),
        (S::Idle, E::Spawned | E::Completed | E::Failed) => None,
        (S::Starting, E::Spawned) => Some(S::Running),
        (S::Starting, E::Failed) => Some(S::Errored),
        (S::Starting, E::Start | E::Completed) => None,
        (S::Running, E::Completed) => Some(S::Finished),
        (S::Running, E::Failed) => Some(S::Errored),
        (S::Running, E::Start | E::Spawned) => None,
        (S::Idle | S::Starting | S::Running, E::ClientClosed) => Some(S::Aborted),
        (S::Finished | S::Errored | S::Aborted, _) => None,
    }
}

/// Why the output pump stopped before a clean finish.
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    /// The HTTP client went away.
    #[error("Output stream closed")]
    OutputClosed,

    #[error("failed to read process output: {0}")]
    Read(#[source] io::Error),

    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    #[error("process exited with {status}")]
    Process { status: ExitStatus },
}

impl PumpError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::OutputClosed)
    }
}

/// Log how a session ended early. Disconnects are routine and stay at debug.
pub fn report_failure(id: Uuid, label: &StreamLabel, err: &PumpError, bytes_sent: u64, stderr: &str) {
    if err.is_disconnect() {
        tracing::debug!(
            session_id = %id,
            provider = %label.provider,
            resource = %label.resource,
            bytes_sent,
            "{err}; stopping transcode"
        );
    } else {
        tracing::error!(
            session_id = %id,
            provider = %label.provider,
            resource = %label.resource,
            bytes_sent,
            stderr = %stderr,
            error = %err,
            "Transcode failed"
        );
    }
}

/// Runner settings derived from [`StreamingConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub channel_capacity: usize,
    pub chunk_size: usize,
    pub monitor: bool,
    pub max_buffered_bytes: usize,
    pub rate_window: Duration,
    pub report_interval: Duration,
    pub terminate_grace: Duration,
}

impl SessionConfig {
    pub fn from_config(cfg: &StreamingConfig) -> Self {
        Self {
            channel_capacity: cfg.channel_capacity.max(1),
            chunk_size: cfg.chunk_size.max(1),
            monitor: cfg.monitor,
            max_buffered_bytes: cfg.max_buffered_bytes,
            rate_window: Duration::from_millis(cfg.rate_window_ms),
            report_interval: Duration::from_millis(cfg.report_interval_ms),
            terminate_grace: Duration::from_millis(cfg.terminate_grace_ms),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&StreamingConfig::default())
    }
}

/// A running session, handed to the HTTP layer.
#[derive(Debug)]
pub struct StartedSession {
    pub id: Uuid,
    pub pid: Option<u32>,
    /// Response body. Ends with an `Err` item when the transcode fails.
    pub body: ReceiverStream<io::Result<Bytes>>,
    pub state: watch::Receiver<SessionState>,
    /// Resolves to the terminal state once the process is gone.
    pub task: JoinHandle<SessionState>,
}

/// Publishes state changes; rejects events the machine does not accept.
struct StateCell {
    id: Uuid,
    tx: watch::Sender<SessionState>,
}

impl StateCell {
    fn apply(&self, event: SessionEvent) -> SessionState {
        let mut moved = None;
        self.tx.send_if_modified(|state| match transition(*state, event) {
            Some(next) => {
                moved = Some((*state, next));
                *state = next;
                true
            }
            None => false,
        });

        match moved {
            Some((from, to)) => {
                tracing::trace!(session_id = %self.id, %from, %to, ?event, "Session state changed");
                to
            }
            None => {
                let current = *self.tx.borrow();
                tracing::warn!(session_id = %self.id, state = %current, ?event, "Ignored session event");
                current
            }
        }
    }
}

enum Sink {
    Direct(mpsc::Sender<io::Result<Bytes>>),
    Monitored(SpeedMonitor),
}

impl Sink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), PumpError> {
        match self {
            Sink::Direct(tx) => tx.send(Ok(chunk)).await.map_err(|_| PumpError::OutputClosed),
            Sink::Monitored(monitor) => monitor.write(chunk).await,
        }
    }

    async fn finish(self) -> Result<(), PumpError> {
        match self {
            Sink::Direct(_) => Ok(()),
            Sink::Monitored(monitor) => monitor.finish().await,
        }
    }
}

/// Spawn ffmpeg for `spec` and start pumping its output into a body stream.
///
/// Errors only when the process cannot be started; nothing has been sent
/// to the client at that point.
pub fn launch(
    ffmpeg: &Path,
    spec: &ProcessSpec,
    source: MediaSource,
    cfg: &SessionConfig,
    active: &ActiveStreams,
    label: StreamLabel,
) -> hs_core::Result<StartedSession> {
    let id = Uuid::new_v4();
    let (state_tx, state_rx) = watch::channel(SessionState::Idle);
    let state = StateCell { id, tx: state_tx };
    state.apply(SessionEvent::Start);

    let pipe_stdin = spec.input == ProcessInput::Pipe;
    let mut process = match TranscodeProcess::spawn(ffmpeg, &spec.args, pipe_stdin) {
        Ok(process) => process,
        Err(e) => {
            state.apply(SessionEvent::Failed);
            tracing::error!(
                session_id = %id,
                provider = %label.provider,
                resource = %label.resource,
                error = %e,
                "Failed to start transcode"
            );
            return Err(e);
        }
    };
    let Some(stdout) = process.take_stdout() else {
        state.apply(SessionEvent::Failed);
        return Err(Error::Internal("transcode process has no stdout".into()));
    };
    state.apply(SessionEvent::Spawned);

    let feeder = match (source, process.take_stdin()) {
        (MediaSource::Stream(reader), Some(stdin)) => Some(tokio::spawn(feed_stdin(id, reader, stdin))),
        _ => None,
    };

    let (tx, rx) = mpsc::channel(cfg.channel_capacity.max(1));
    let notify = tx.clone();
    let (sink, rates) = if cfg.monitor {
        let (monitor, rates) =
            SpeedMonitor::new(tx, cfg.max_buffered_bytes, cfg.rate_window, cfg.report_interval);
        (Sink::Monitored(monitor), Some(rates))
    } else {
        (Sink::Direct(tx), None)
    };

    let pid = process.pid();
    let bytes_sent = Arc::new(AtomicU64::new(0));
    let guard = active.register(id, label.clone(), pid, state_rx.clone(), Arc::clone(&bytes_sent), rates);

    let chunk_size = cfg.chunk_size.max(1);
    let grace = cfg.terminate_grace;
    let task = tokio::spawn(async move {
        let _guard = guard;
        let result = pump(&mut process, stdout, sink, &notify, chunk_size, &bytes_sent).await;

        let final_state = match &result {
            Ok(()) => state.apply(SessionEvent::Completed),
            Err(PumpError::OutputClosed) => state.apply(SessionEvent::ClientClosed),
            Err(_) => state.apply(SessionEvent::Failed),
        };

        if let Err(err) = &result {
            report_failure(id, &label, err, bytes_sent.load(Ordering::Relaxed), &process.stderr_tail());
            if !err.is_disconnect() {
                // Abort the body so the client sees a truncated response.
                let _ = notify.send(Err(io::Error::other(err.to_string()))).await;
            }
        }
        drop(notify);

        let exit = process.terminate(grace).await;
        if let Some(feeder) = feeder {
            feeder.abort();
        }
        tracing::debug!(session_id = %id, state = %final_state, ?exit, "Session closed");
        final_state
    });

    Ok(StartedSession {
        id,
        pid,
        body: ReceiverStream::new(rx),
        state: state_rx,
        task,
    })
}

/// Forward stdout to the sink until EOF, stopping as soon as the client is gone.
async fn pump(
    process: &mut TranscodeProcess,
    mut stdout: ChildStdout,
    mut sink: Sink,
    notify: &mpsc::Sender<io::Result<Bytes>>,
    chunk_size: usize,
    bytes_sent: &AtomicU64,
) -> Result<(), PumpError> {
    let mut buf = BytesMut::with_capacity(chunk_size);
    loop {
        buf.reserve(chunk_size);
        let read = tokio::select! {
            biased;
            _ = notify.closed() => return Err(PumpError::OutputClosed),
            read = stdout.read_buf(&mut buf) => read.map_err(PumpError::Read)?,
        };
        if read == 0 {
            break;
        }

        let chunk = buf.split().freeze();
        bytes_sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        sink.write(chunk).await?;
    }

    sink.finish().await?;
    let status = process.wait().await.map_err(PumpError::Wait)?;
    if !status.success() {
        return Err(PumpError::Process { status });
    }
    Ok(())
}

/// Copy a provider byte stream into the process stdin.
async fn feed_stdin(id: Uuid, mut reader: std::pin::Pin<Box<dyn AsyncRead + Send>>, mut stdin: ChildStdin) {
    match tokio::io::copy(&mut reader, &mut stdin).await {
        Ok(bytes) => tracing::trace!(session_id = %id, bytes, "Source fed to process"),
        // ffmpeg closes stdin early when it stops reading.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            tracing::debug!(session_id = %id, "Process closed its input");
        }
        Err(e) => tracing::warn!(session_id = %id, error = %e, "Failed to feed source to process"),
    }
    let _ = stdin.shutdown().await;
}
