//! Per-connection engine process lifecycle.
//!
//! [`Supervisor`] starts at most one engine per connection, streams both of
//! its output pipes through an [`OutputClassifier`] into the connection's
//! [`FrameSink`], writes commands to its stdin, and tears it down.
//!
//! Engine failures never escape as errors the connection has to handle: they
//! are reported to the client as frames, and the returned `Result` only tells
//! the caller what happened.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gemini_relay_core::config::EngineConfig;
use gemini_relay_core::dispatch::FrameSink;
use gemini_relay_core::error::{RelayError, Result};
use gemini_relay_core::protocol::Frame;
use gemini_relay_core::types::ConnectionId;

use crate::classifier::OutputClassifier;
use crate::resolver::{CommandResolver, EngineCommand};

/// How long an output reader may keep draining after its process was reaped.
const READER_DRAIN_GRACE: Duration = Duration::from_millis(500);

const NOT_FOUND_MESSAGE: &str =
    "Error: 'gemini-cli' command not found. Make sure it is installed and in your system's PATH.";

/// One spawned engine instance.
#[derive(Debug)]
pub struct ManagedProcess {
    command: EngineCommand,
    pid: Option<u32>,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl ManagedProcess {
    pub fn command(&self) -> &EngineCommand {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking exit-status poll.
    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = ?self.pid, %status, "Engine process has exited");
                false
            }
            Err(e) => {
                warn!(pid = ?self.pid, %e, "Failed to poll engine process");
                false
            }
        }
    }

    /// Write one newline-terminated line to stdin and flush it.
    pub async fn write_line(&self, text: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(text.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    /// Signal the process (group) to terminate, wait up to `grace` for it to
    /// exit, then kill it. Both output readers are joined afterwards.
    pub async fn terminate(&self, grace: Duration) -> Option<ExitStatus> {
        let status = {
            let mut child = self.child.lock().await;
            match child.try_wait() {
                Ok(Some(status)) => Some(status),
                _ => {
                    self.signal_terminate(&mut child);
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(Ok(status)) => Some(status),
                        Ok(Err(e)) => {
                            warn!(pid = ?self.pid, %e, "Failed to wait for engine process");
                            None
                        }
                        Err(_) => {
                            warn!(
                                pid = ?self.pid,
                                grace_ms = grace.as_millis() as u64,
                                "Engine ignored termination request, killing"
                            );
                            let _ = child.start_kill();
                            child.wait().await.ok()
                        }
                    }
                }
            }
        };

        self.join_readers().await;
        status
    }

    #[cfg(unix)]
    fn signal_terminate(&self, child: &mut Child) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        // The engine leads its own process group, so this also reaches
        // anything it spawned (npx -> node).
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            match killpg(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => return,
                Err(e) => debug!(pid, %e, "SIGTERM to process group failed, killing child"),
            }
        }
        let _ = child.start_kill();
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self, child: &mut Child) {
        let _ = child.start_kill();
    }

    async fn join_readers(&self) {
        let handles = std::mem::take(&mut *self.readers.lock().await);
        for mut handle in handles {
            if tokio::time::timeout(READER_DRAIN_GRACE, &mut handle)
                .await
                .is_err()
            {
                debug!(pid = ?self.pid, "Output reader still open after exit, aborting");
                handle.abort();
            }
        }
    }
}

/// Connection -> engine process map shared by every connection of a server.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, Arc<ManagedProcess>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, conn_id: ConnectionId) -> Option<Arc<ManagedProcess>> {
        self.inner.read().await.get(&conn_id).cloned()
    }

    /// Insert a process, returning whatever was registered before.
    pub async fn insert(
        &self,
        conn_id: ConnectionId,
        process: Arc<ManagedProcess>,
    ) -> Option<Arc<ManagedProcess>> {
        self.inner.write().await.insert(conn_id, process)
    }

    pub async fn remove(&self, conn_id: ConnectionId) -> Option<Arc<ManagedProcess>> {
        self.inner.write().await.remove(&conn_id)
    }

    pub async fn contains(&self, conn_id: ConnectionId) -> bool {
        self.inner.read().await.contains_key(&conn_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    async fn drain(&self) -> Vec<(ConnectionId, Arc<ManagedProcess>)> {
        self.inner.write().await.drain().collect()
    }
}

/// Starts, feeds, and stops engine processes on behalf of connections.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: Arc<EngineConfig>,
    resolver: CommandResolver,
    registry: ProcessRegistry,
}

impl Supervisor {
    pub fn new(config: EngineConfig, registry: ProcessRegistry) -> Self {
        let resolver = CommandResolver::from_config(&config);
        Self {
            config: Arc::new(config),
            resolver,
            registry,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Start an engine for `conn_id`. On success the client receives
    /// `engine_started` followed by a status line naming the command.
    pub async fn start(&self, conn_id: ConnectionId, frames: &FrameSink) -> Result<()> {
        if let Some(existing) = self.registry.get(conn_id).await {
            if existing.is_running().await {
                frames.send(Frame::output("Engine is already running."));
                return Err(RelayError::EngineAlreadyRunning);
            }
            // Exited on its own; reap it and start fresh.
            if let Some(stale) = self.registry.remove(conn_id).await {
                stale.terminate(self.config.stop_timeout()).await;
            }
        }

        frames.send(Frame::output("Starting gemini-cli engine..."));

        match self.launch(conn_id, frames).await {
            Ok(process) => {
                info!(
                    conn_id = %conn_id,
                    command = %process.command,
                    pid = ?process.pid,
                    "Engine started"
                );
                if let Some(previous) = self.registry.insert(conn_id, process).await {
                    warn!(conn_id = %conn_id, "Replaced an engine registered concurrently");
                    previous.terminate(self.config.stop_timeout()).await;
                }
                Ok(())
            }
            Err(e) => {
                let message = match &e {
                    RelayError::EngineNotFound => NOT_FOUND_MESSAGE.to_string(),
                    other => format!("An unexpected error occurred while starting the engine: {other}"),
                };
                error!(conn_id = %conn_id, %e, "Engine failed to start");
                frames.send(Frame::output(message));
                frames.send(Frame::engine_failed());
                Err(e)
            }
        }
    }

    /// Resolve and spawn the engine, announce it, then attach the readers.
    async fn launch(&self, conn_id: ConnectionId, frames: &FrameSink) -> Result<Arc<ManagedProcess>> {
        let command = self.resolver.resolve().await?;

        let mut cmd = command.to_command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => RelayError::EngineNotFound,
            _ => RelayError::EngineStartFailed(e.to_string()),
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(RelayError::EngineStartFailed(
                "engine stdio was not captured".into(),
            ));
        };

        // Announce before any output can be queued behind these frames.
        frames.send(Frame::EngineStarted {});
        frames.send(Frame::output(format!(
            "Engine started successfully using {command}. Ready for commands."
        )));

        let max_buffer = self.config.max_buffer_bytes;
        let readers = vec![
            tokio::spawn(stream_output(conn_id, "stdout", stdout, frames.clone(), max_buffer)),
            tokio::spawn(stream_output(conn_id, "stderr", stderr, frames.clone(), max_buffer)),
        ];

        Ok(Arc::new(ManagedProcess {
            pid: child.id(),
            command,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            readers: Mutex::new(readers),
        }))
    }

    /// Whether `conn_id` has an engine that has not exited.
    pub async fn is_running(&self, conn_id: ConnectionId) -> bool {
        match self.registry.get(conn_id).await {
            Some(process) => process.is_running().await,
            None => false,
        }
    }

    /// Return the live engine for `conn_id`, or tell the client it is not
    /// running.
    pub async fn require_running(
        &self,
        conn_id: ConnectionId,
        frames: &FrameSink,
    ) -> Result<Arc<ManagedProcess>> {
        if let Some(process) = self.registry.get(conn_id).await {
            if process.is_running().await {
                return Ok(process);
            }
        }
        frames.send(Frame::output(
            "Engine is not running. Please start the engine first.",
        ));
        frames.send(Frame::engine_stopped());
        Err(RelayError::EngineNotRunning)
    }

    /// Write a command line to the engine's stdin.
    pub async fn send(&self, conn_id: ConnectionId, text: &str, frames: &FrameSink) -> Result<()> {
        let process = self.require_running(conn_id, frames).await?;
        self.write(&process, text, frames).await
    }

    /// Write to an engine already obtained from
    /// [`require_running`](Self::require_running), without checking liveness
    /// again. A failed write is reported to the client.
    pub async fn write(&self, process: &ManagedProcess, text: &str, frames: &FrameSink) -> Result<()> {
        let conn_id = frames.conn_id();
        if let Err(e) = process.write_line(text).await {
            error!(conn_id = %conn_id, %e, "Failed to write command to engine");
            frames.send(Frame::output(format!(
                "Error sending command to process: {e}"
            )));
            return Err(e.into());
        }

        debug!(conn_id = %conn_id, bytes = text.len() + 1, "Command written to engine");
        Ok(())
    }

    /// Unregister and terminate the engine for `conn_id`, waiting for it to
    /// exit. Returns `None` when nothing was registered.
    pub async fn stop(&self, conn_id: ConnectionId) -> Option<Option<ExitStatus>> {
        let process = self.registry.remove(conn_id).await?;
        info!(conn_id = %conn_id, pid = ?process.pid, "Terminating engine");
        let status = process.terminate(self.config.stop_timeout()).await;
        info!(conn_id = %conn_id, status = ?status, "Engine exited");
        Some(status)
    }

    /// Terminate every registered engine. Used on server shutdown.
    pub async fn stop_all(&self) -> usize {
        let processes = self.registry.drain().await;
        let count = processes.len();
        let grace = self.config.stop_timeout();
        join_all(processes.into_iter().map(|(conn_id, process)| async move {
            let status = process.terminate(grace).await;
            debug!(conn_id = %conn_id, status = ?status, "Engine stopped on shutdown");
        }))
        .await;
        count
    }
}

/// Read one output pipe line by line, classifying into frames, until EOF.
async fn stream_output<R>(
    conn_id: ConnectionId,
    stream: &'static str,
    reader: R,
    frames: FrameSink,
    max_buffer: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut classifier = OutputClassifier::new(max_buffer);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                for frame in classifier.push(&String::from_utf8_lossy(&line)) {
                    frames.send(frame);
                }
            }
            Err(e) => {
                warn!(conn_id = %conn_id, stream, %e, "Error while streaming engine output");
                break;
            }
        }
    }

    let discarded = classifier.finish();
    debug!(conn_id = %conn_id, stream, discarded, "Engine output stream closed");
}
