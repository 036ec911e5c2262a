//! Tunnel lifecycle state machine.
//!
//! State lives behind a short-lived `parking_lot` lock so that [`TunnelManager::status`]
//! and [`TunnelManager::redirect_uri`] never wait on a start in progress. `start` and
//! `stop` are serialized by a separate async operation lock, held across the readiness
//! wait. A supervising task per process owns the child and reports a crash back into
//! the state machine as soon as `wait()` returns.

use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use crate::config::TunnelConfig;
use crate::detect::{normalize_https, public_origin};
use crate::error::{Result, TunnelError};

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle phase of the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelPhase {
    Stopped,
    Starting,
    Active,
    Failed,
}

impl std::fmt::Display for TunnelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of the tunnel state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelStatus {
    pub state: TunnelPhase,
    pub public_url: Option<String>,
    pub local_port: u16,
    pub last_error: Option<String>,
    /// OS process id of the owned tunnel process, if one is running.
    pub pid: Option<u32>,
}

impl TunnelStatus {
    pub fn is_active(&self) -> bool {
        self.state == TunnelPhase::Active
    }
}

/// Public endpoint of an active tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelEndpoint {
    pub public_url: String,
    pub redirect_uri: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

struct Shared {
    state: Mutex<Inner>,
}

struct Inner {
    phase: TunnelPhase,
    public_url: Option<Url>,
    local_port: u16,
    last_error: Option<String>,
    process: Option<ProcessHandle>,
    /// Bumped on every start and stop so late events from an old process are ignored.
    generation: u64,
}

impl Shared {
    /// Called by the supervisor when the child exits on its own.
    fn mark_exited(&self, generation: u64, description: &str) {
        let mut inner = self.state.lock();
        if inner.generation != generation {
            return;
        }
        if matches!(inner.phase, TunnelPhase::Starting | TunnelPhase::Active) {
            tracing::warn!(
                previous = %inner.phase,
                reason = %description,
                "Tunnel process exited unexpectedly"
            );
            inner.phase = TunnelPhase::Failed;
            inner.public_url = None;
            inner.last_error = Some(description.to_string());
        }
    }
}

/// Owned handle to a running tunnel process.
struct ProcessHandle {
    pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<Duration>>,
    supervisor: JoinHandle<std::result::Result<(), String>>,
}

impl ProcessHandle {
    /// Ask the supervisor to terminate the child and wait until it is reaped.
    async fn shutdown(mut self, grace: Duration) -> std::result::Result<(), String> {
        if let Some(tx) = self.stop_tx.take() {
            // The supervisor may already be gone if the process exited by itself.
            let _ = tx.send(grace);
        }
        match self.supervisor.await {
            Ok(result) => result,
            Err(e) => Err(format!("tunnel supervisor task failed: {e}")),
        }
    }
}

enum ProcessEvent {
    Output(String),
    Exited(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns zero or one tunnel process and its lifecycle state.
pub struct TunnelManager {
    config: TunnelConfig,
    shared: Arc<Shared>,
    ops: tokio::sync::Mutex<()>,
}

impl TunnelManager {
    /// Create a stopped manager.
    pub fn new(config: TunnelConfig) -> Self {
        let local_port = config.local_port;
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(Inner {
                    phase: TunnelPhase::Stopped,
                    public_url: None,
                    local_port,
                    last_error: None,
                    process: None,
                    generation: 0,
                }),
            }),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Start the tunnel on the configured local port.
    pub async fn start(&self) -> Result<TunnelEndpoint> {
        self.start_on(None).await
    }

    /// Start the tunnel, exposing `port` instead of the configured one.
    ///
    /// Returns the existing endpoint when the tunnel is already active (the port argument
    /// is ignored in that case). Otherwise spawns the tunnel program and waits up to the
    /// configured timeout for it to announce a public URL.
    pub async fn start_on(&self, port: Option<u16>) -> Result<TunnelEndpoint> {
        let _op = self.ops.lock().await;

        let (generation, port, leftover) = {
            let mut inner = self.shared.state.lock();
            if inner.phase == TunnelPhase::Active
                && let Some(url) = inner.public_url.clone()
            {
                tracing::debug!(public_url = %public_origin(&url), "Tunnel already active");
                return Ok(self.endpoint(url));
            }
            inner.generation += 1;
            inner.phase = TunnelPhase::Starting;
            inner.public_url = None;
            inner.last_error = None;
            inner.local_port = port.unwrap_or(self.config.local_port);
            (inner.generation, inner.local_port, inner.process.take())
        };

        // A crashed process from a previous run is still owned until reaped.
        if let Some(process) = leftover
            && let Err(e) = process.shutdown(self.config.stop_grace).await
        {
            tracing::debug!(error = %e, "Reaping previous tunnel process failed");
        }

        let (program, args) = self.config.command_line(port);
        tracing::info!(
            backend = self.config.backend.name(),
            program = %program,
            port,
            "Starting tunnel"
        );

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = TunnelError::Spawn { program, source };
                self.fail(generation, err.to_string());
                return Err(err);
            }
        };

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, events_tx.clone(), "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, events_tx.clone(), "stderr");
        }

        let pid = child.id();
        let (stop_tx, stop_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(
            child,
            stop_rx,
            Arc::downgrade(&self.shared),
            generation,
            events_tx,
            self.config.stop_grace,
        ));
        self.shared.state.lock().process = Some(ProcessHandle {
            pid,
            stop_tx: Some(stop_tx),
            supervisor,
        });

        let detector = self.config.backend.detector();
        let deadline = Instant::now() + self.config.start_timeout;
        let outcome = loop {
            match tokio::time::timeout_at(deadline, events_rx.recv()).await {
                Ok(Some(ProcessEvent::Output(line))) => {
                    if let Some(url) = detector.detect(&line) {
                        break Ok(normalize_https(url));
                    }
                }
                Ok(Some(ProcessEvent::Exited(description))) => break Err(description),
                Ok(None) => break Err("tunnel process output closed".to_string()),
                Err(_) => {
                    break Err(format!(
                        "no public endpoint reported within {}s",
                        self.config.start_timeout.as_secs_f32()
                    ));
                }
            }
        };

        match outcome {
            Ok(url) => {
                let mut inner = self.shared.state.lock();
                if inner.generation == generation && inner.phase == TunnelPhase::Starting {
                    inner.phase = TunnelPhase::Active;
                    inner.public_url = Some(url.clone());
                    tracing::info!(public_url = %public_origin(&url), pid = ?pid, "Tunnel active");
                    return Ok(self.endpoint(url));
                }
                let reason = inner
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "tunnel process exited during startup".to_string());
                Err(TunnelError::StartFailed(reason))
            }
            Err(reason) => {
                let process = {
                    let mut inner = self.shared.state.lock();
                    inner.process.take()
                };
                if let Some(process) = process
                    && let Err(e) = process.shutdown(self.config.stop_grace).await
                {
                    tracing::warn!(error = %e, "Failed to terminate tunnel after failed start");
                }
                self.fail(generation, reason.clone());
                Err(TunnelError::StartFailed(reason))
            }
        }
    }

    /// Stop the tunnel.
    ///
    /// Succeeds immediately when already stopped. Otherwise the process is sent a
    /// terminate signal and killed after the grace period. The manager is `Stopped`
    /// afterwards even when termination reports an error.
    pub async fn stop(&self) -> Result<()> {
        let _op = self.ops.lock().await;

        let process = {
            let mut inner = self.shared.state.lock();
            if inner.phase == TunnelPhase::Stopped && inner.process.is_none() {
                return Ok(());
            }
            inner.generation += 1;
            inner.phase = TunnelPhase::Stopped;
            inner.public_url = None;
            inner.last_error = None;
            inner.process.take()
        };

        let Some(process) = process else {
            tracing::info!("Tunnel stopped");
            return Ok(());
        };

        match process.shutdown(self.config.stop_grace).await {
            Ok(()) => {
                tracing::info!("Tunnel stopped");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Tunnel did not stop cleanly");
                self.shared.state.lock().last_error = Some(e.clone());
                Err(TunnelError::StopFailed(e))
            }
        }
    }

    /// Snapshot of the current state. Never waits on a start or stop in progress.
    pub fn status(&self) -> TunnelStatus {
        let inner = self.shared.state.lock();
        TunnelStatus {
            state: inner.phase,
            public_url: inner.public_url.as_ref().map(public_origin),
            local_port: inner.local_port,
            last_error: inner.last_error.clone(),
            // A failed process may not be reaped yet; its id is no longer meaningful.
            pid: match inner.phase {
                TunnelPhase::Starting | TunnelPhase::Active => {
                    inner.process.as_ref().and_then(|p| p.pid)
                }
                TunnelPhase::Stopped | TunnelPhase::Failed => None,
            },
        }
    }

    /// Redirect URI for the active tunnel, or `None` unless the tunnel is `Active`.
    pub fn redirect_uri(&self) -> Option<String> {
        let inner = self.shared.state.lock();
        if inner.phase != TunnelPhase::Active {
            return None;
        }
        inner
            .public_url
            .as_ref()
            .map(|url| self.config.redirect_uri_for(url))
    }

    fn endpoint(&self, public_url: Url) -> TunnelEndpoint {
        TunnelEndpoint {
            redirect_uri: self.config.redirect_uri_for(&public_url),
            public_url: public_origin(&public_url),
        }
    }

    fn fail(&self, generation: u64, reason: String) {
        let mut inner = self.shared.state.lock();
        if inner.generation != generation {
            return;
        }
        tracing::error!(reason = %reason, "Tunnel failed to start");
        inner.phase = TunnelPhase::Failed;
        inner.public_url = None;
        inner.last_error = Some(reason);
    }
}

impl std::fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelManager")
            .field("backend", &self.config.backend.name())
            .field("status", &self.status())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process supervision
// ─────────────────────────────────────────────────────────────────────────────

fn spawn_reader<R>(reader: R, events: mpsc::UnboundedSender<ProcessEvent>, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        // Keep draining after startup so the child never blocks on a full pipe.
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::trace!(stream, line = %line, "tunnel output");
            let _ = events.send(ProcessEvent::Output(line));
        }
    });
}

async fn supervise(
    mut child: Child,
    stop_rx: oneshot::Receiver<Duration>,
    shared: Weak<Shared>,
    generation: u64,
    events: mpsc::UnboundedSender<ProcessEvent>,
    default_grace: Duration,
) -> std::result::Result<(), String> {
    tokio::select! {
        status = child.wait() => {
            let description = match status {
                Ok(status) => format!("tunnel process exited ({status})"),
                Err(e) => format!("failed to wait on tunnel process: {e}"),
            };
            if let Some(shared) = shared.upgrade() {
                shared.mark_exited(generation, &description);
            }
            let _ = events.send(ProcessEvent::Exited(description));
            Ok(())
        }
        grace = stop_rx => {
            // A dropped sender means the manager itself went away.
            terminate(&mut child, grace.unwrap_or(default_grace)).await
        }
    }
}

async fn terminate(child: &mut Child, grace: Duration) -> std::result::Result<(), String> {
    if let Ok(Some(_)) = child.try_wait() {
        return Ok(());
    }

    signal_terminate(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("failed to wait on tunnel process: {e}")),
        Err(_) => {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "Tunnel process ignored terminate signal, killing"
            );
            force_kill(child).await
        }
    }
}

#[cfg(unix)]
fn signal_terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: the child was spawned as its own process group leader and has not been
        // reaped, so the group id still refers to our processes.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn signal_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
async fn force_kill(child: &mut Child) -> std::result::Result<(), String> {
    if let Some(pid) = child.id() {
        // SAFETY: see `signal_terminate`.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    child
        .wait()
        .await
        .map(|_| ())
        .map_err(|e| format!("failed to kill tunnel process: {e}"))
}

#[cfg(not(unix))]
async fn force_kill(child: &mut Child) -> std::result::Result<(), String> {
    child
        .kill()
        .await
        .map_err(|e| format!("failed to kill tunnel process: {e}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
