//! Transcoder process lifecycle, one process per viewer.
//!
//! Every request spawns its own transcoder; two viewers of the same camera
//! cost two decoder processes. The child is owned by a monitor task that
//! reaps it when it exits on its own and kills it when the session is
//! dropped, so a client disconnect never leaves a transcoder behind.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

use super::demux::{FrameReader, VideoFrame};
use super::{FrameSource, StreamError};
use crate::config::{StreamSource, TranscoderConfig};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Process launched, no frame yet
    Starting,
    /// At least one frame delivered
    Streaming,
    /// Transcoder output reached end-of-stream
    Ended,
    /// Read error, malformed output or client disconnect
    Failed,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Streaming)
    }
}

/// How the transcoder process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited by itself with this code (`None` when killed by a signal)
    Exited(Option<i32>),
    /// Terminated by the supervisor
    Killed,
}

/// Observer for the exit of one transcoder process.
#[derive(Debug, Clone)]
pub struct ProcessMonitor {
    rx: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessMonitor {
    /// Exit status if the process is already gone.
    pub fn try_exit(&self) -> Option<ProcessExit> {
        *self.rx.borrow()
    }

    /// Wait until the process has been reaped.
    ///
    /// Returns `None` if the monitor task went away without reporting, which
    /// only happens when the runtime shuts down.
    pub async fn wait(&mut self) -> Option<ProcessExit> {
        if let Ok(exit) = self.rx.wait_for(Option::is_some).await {
            return *exit;
        }
        *self.rx.borrow()
    }
}

/// Launches transcoder processes.
#[derive(Debug, Clone)]
pub struct StreamSupervisor {
    transcoder: TranscoderConfig,
}

impl StreamSupervisor {
    pub fn new(transcoder: TranscoderConfig) -> Self {
        Self { transcoder }
    }

    pub fn transcoder(&self) -> &TranscoderConfig {
        &self.transcoder
    }

    /// Start a transcoder for `source` and return the session reading it.
    pub fn open(&self, name: &str, source: &StreamSource) -> Result<StreamSession, StreamError> {
        let url = source
            .authenticated_url()
            .map_err(|e| StreamError::InvalidSource(e.to_string()))?;
        let args = self.transcoder.render_args(&url);

        log::info!(
            "[STREAM] {}: starting {} for {}",
            name,
            self.transcoder.program,
            source.redacted_url()
        );

        let mut child = Command::new(&self.transcoder.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                log::error!("[STREAM] {}: failed to spawn transcoder: {}", name, e);
                StreamError::Spawn {
                    program: self.transcoder.program.clone(),
                    source: e,
                }
            })?;

        let pid = child.id();
        let stdout = child.stdout.take().ok_or(StreamError::MissingStdout)?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(monitor(name.to_string(), child, cancel_rx, exit_tx));

        Ok(StreamSession {
            name: name.to_string(),
            pid,
            reader: FrameReader::new(
                stdout,
                self.transcoder.chunk_size,
                self.transcoder.max_buffer_bytes,
            ),
            state: SessionState::Starting,
            frames: 0,
            monitor: ProcessMonitor { rx: exit_rx },
            cancel: Some(cancel_tx),
        })
    }
}

/// Owns the child until it exits or the session asks for termination.
async fn monitor(
    name: String,
    mut child: Child,
    cancel: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    let exit = tokio::select! {
        biased;
        // fires on explicit terminate and when the session is dropped
        _ = cancel => {
            if let Err(e) = child.kill().await {
                log::debug!("[STREAM] {}: kill failed: {}", name, e);
            }
            ProcessExit::Killed
        }
        status = child.wait() => match status {
            Ok(status) => ProcessExit::Exited(status.code()),
            Err(e) => {
                log::warn!("[STREAM] {}: error waiting for transcoder: {}", name, e);
                ProcessExit::Exited(None)
            }
        },
    };

    match exit {
        ProcessExit::Exited(code) => log::info!("[STREAM] {}: transcoder exited with code {:?}", name, code),
        ProcessExit::Killed => log::info!("[STREAM] {}: transcoder terminated", name),
    }
    let _ = exit_tx.send(Some(exit));
}

/// One viewer's transcoder and the frames read from it.
///
/// Dropping the session terminates the process.
pub struct StreamSession {
    name: String,
    pid: Option<u32>,
    reader: FrameReader<ChildStdout>,
    state: SessionState,
    frames: u64,
    monitor: ProcessMonitor,
    cancel: Option<oneshot::Sender<()>>,
}

impl StreamSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frames delivered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn monitor(&self) -> ProcessMonitor {
        self.monitor.clone()
    }

    pub async fn next_frame(&mut self) -> Result<Option<VideoFrame>, StreamError> {
        if !self.state.is_active() {
            return Ok(None);
        }
        match self.reader.next_frame().await {
            Ok(Some(frame)) => {
                if self.state == SessionState::Starting {
                    log::info!("[STREAM] {}: first frame ({} bytes)", self.name, frame.len());
                    self.state = SessionState::Streaming;
                }
                self.frames += 1;
                Ok(Some(frame))
            }
            Ok(None) => {
                log::info!(
                    "[STREAM] {}: transcoder output ended after {} frames",
                    self.name,
                    self.frames
                );
                self.state = SessionState::Ended;
                Ok(None)
            }
            Err(e) => {
                log::error!("[STREAM] {}: {}", self.name, e);
                self.state = SessionState::Failed;
                self.terminate();
                Err(e)
            }
        }
    }

    /// Ask the monitor to kill the process. Idempotent.
    pub fn terminate(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Give the process `grace` to exit by itself, then kill it; returns once reaped.
    pub async fn close(mut self, grace: Duration) -> Option<ProcessExit> {
        let mut monitor = self.monitor.clone();
        if tokio::time::timeout(grace, monitor.wait()).await.is_err() {
            self.terminate();
        }
        monitor.wait().await
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.state.is_active() {
            log::info!(
                "[STREAM] {}: session closed after {} frames, stopping transcoder",
                self.name,
                self.frames
            );
            self.state = SessionState::Failed;
        }
        self.terminate();
    }
}

#[async_trait]
impl FrameSource for StreamSession {
    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, StreamError> {
        StreamSession::next_frame(self).await
    }
}
