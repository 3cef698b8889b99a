//! Lifecycle and request plumbing for the watcher worker process
//!
//! One supervisor owns one worker process. Requests are written to the
//! worker's stdin as JSON lines; a reader task routes everything coming
//! back on stdout, and a monitor task reaps the process and turns
//! unexpected exits into crash notifications.

use crate::config::SupervisorConfig;
use crate::correlator::RequestCorrelator;
use crate::error::{Error, Fault, Result};
use crate::registry::WatchRegistry;
use crate::subscription::Watch;
use notifymux_protocol::{
    decode_worker_message, FrameReader, FrameWriter, ProtocolError, Request, RequestId, WatchId,
    WorkerMessage, READY_MARKER,
};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Newest worker stderr kept for crash diagnostics
const STDERR_TAIL_LIMIT: usize = 64 * 1024;

/// Grace period for the stderr capture task to drain the pipe after the
/// worker exits, before its output is folded into an error message
const STDERR_DRAIN_WAIT: Duration = Duration::from_millis(250);

/// Where the supervised worker process currently stands.
///
/// There is no "not started" state: [`Supervisor::spawn`] only returns a
/// supervisor whose worker is already running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// The worker is alive and accepting requests
    Running,
    /// `kill` was called and the worker has been shut down
    Killed,
    /// The worker exited or broke protocol without being killed
    Crashed { details: String },
}

/// Supervises a single watcher worker process.
///
/// Cheap to clone; all clones drive the same worker. The worker is
/// terminated when [`kill`](Supervisor::kill) is called or when the last
/// handle (supervisor clone or [`Watch`]) is dropped.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<SupervisorShared>,
    guard: Arc<ShutdownGuard>,
}

impl Supervisor {
    /// Launch the worker and wait until it is ready to accept requests.
    ///
    /// The worker signals readiness by printing a marker line before its
    /// first protocol frame. A worker that fails to initialize reports the
    /// reason on stdout or stderr; either way the failure comes back here
    /// as [`Error::Spawn`].
    pub async fn spawn(config: SupervisorConfig) -> Result<Self> {
        let mut command = Command::new(&config.worker_path);
        command
            .args(&config.worker_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ms) = config.poll_interval_ms {
            command.arg("--poll-interval").arg(ms.to_string());
        }

        info!(worker = %config.worker_path.display(), "spawning watcher worker");
        let mut child = command.spawn().map_err(|e| {
            Error::spawn(format!(
                "failed to launch {}: {e}",
                config.worker_path.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::spawn("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::spawn("worker stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::spawn("worker stderr was not captured"))?;

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let (stderr_done_tx, stderr_done) = watch::channel(false);
        tokio::spawn(capture_stderr(
            stderr,
            Arc::clone(&stderr_tail),
            stderr_done_tx,
        ));

        let mut reader = FrameReader::new(stdout);
        let ready = await_ready(&mut reader, &mut child, &stderr_tail, &stderr_done);
        match timeout(config.ready_timeout(), ready).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return Err(error),
            Err(_) => {
                let _ = child.start_kill();
                return Err(Error::spawn(format!(
                    "worker did not announce readiness within {:?}",
                    config.ready_timeout()
                )));
            }
        }
        debug!("worker is ready");

        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let shared = Arc::new(SupervisorShared {
            config,
            state: Mutex::new(ProcessState::Running),
            correlator: RequestCorrelator::new(),
            registry: WatchRegistry::new(),
            writer: tokio::sync::Mutex::new(Some(FrameWriter::new(stdin))),
            faults_tx,
            faults_rx: Mutex::new(Some(faults_rx)),
            stderr_tail,
            stderr_done,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run_reader(Arc::clone(&shared), reader));
        tokio::spawn(run_monitor(Arc::clone(&shared), child));

        Ok(Self {
            shared,
            guard: Arc::new(ShutdownGuard { shutdown }),
        })
    }

    /// Subscribe to file system events under `root`, watched recursively.
    ///
    /// The worker resolves and validates the path; a root it cannot watch
    /// comes back as [`Error::Rejected`] with the worker's description.
    pub async fn watch_path(&self, root: impl AsRef<Path>) -> Result<Watch> {
        let root = root.as_ref().to_path_buf();
        self.shared.ensure_running()?;

        let watch_id = self.shared.registry.next_watch_id();
        let (events_tx, events_rx) = mpsc::channel(self.shared.config.event_channel_capacity);
        self.shared.registry.register(watch_id, events_tx);
        debug!(watch_id, root = %root.display(), "requesting watch");

        let result = self
            .shared
            .request(|request_id| Request::Watch {
                request_id,
                watch_id,
                root,
            })
            .await;
        match result {
            Ok(()) => Ok(Watch::new(
                watch_id,
                events_rx,
                Arc::clone(&self.shared),
                Arc::clone(&self.guard),
            )),
            Err(error) => {
                // The worker never accepted this id; stop routing for it
                self.shared.registry.unregister(watch_id);
                Err(error)
            }
        }
    }

    /// Shut the worker down.
    ///
    /// The worker gets one bounded chance to release its subscriptions
    /// cleanly, then its stdin is closed and the process is terminated.
    /// Requests still in flight fail with [`Error::Killed`] and every
    /// subscription's event stream ends. Only the first call does
    /// anything; calling after a crash is also a no-op.
    pub async fn kill(&self) {
        {
            let mut state = lock(&self.shared.state);
            if !matches!(*state, ProcessState::Running) {
                return;
            }
            *state = ProcessState::Killed;
        }
        info!("killing watcher worker");

        let drain = self
            .shared
            .request(|request_id| Request::UnwatchAll { request_id });
        match timeout(self.shared.config.shutdown_timeout(), drain).await {
            Ok(Ok(())) => debug!("worker acknowledged unwatch-all"),
            Ok(Err(error)) => debug!("unwatch-all failed during shutdown: {error}"),
            Err(_) => debug!("unwatch-all timed out during shutdown"),
        }

        self.shared.correlator.fail_all(&Error::Killed);
        self.shared.registry.clear();
        *self.shared.writer.lock().await = None;
        self.shared.shutdown.cancel();
    }

    /// Current state of the worker process
    pub fn state(&self) -> ProcessState {
        self.shared.state()
    }

    /// Take the fault channel.
    ///
    /// Crashes, protocol violations, and out-of-band worker errors are
    /// published here in addition to failing whatever calls they affect.
    /// Returns `Some` on the first call only.
    pub fn take_faults(&self) -> Option<mpsc::UnboundedReceiver<Fault>> {
        lock(&self.shared.faults_rx).take()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .finish()
    }
}

/// Cancels the worker when the last caller-facing handle drops
pub(crate) struct ShutdownGuard {
    shutdown: CancellationToken,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// State shared between caller-facing handles and the background tasks
pub(crate) struct SupervisorShared {
    config: SupervisorConfig,
    state: Mutex<ProcessState>,
    correlator: RequestCorrelator,
    registry: WatchRegistry,
    writer: tokio::sync::Mutex<Option<FrameWriter<ChildStdin>>>,
    faults_tx: mpsc::UnboundedSender<Fault>,
    faults_rx: Mutex<Option<mpsc::UnboundedReceiver<Fault>>>,
    stderr_tail: Arc<Mutex<String>>,
    stderr_done: watch::Receiver<bool>,
    shutdown: CancellationToken,
}

impl SupervisorShared {
    fn state(&self) -> ProcessState {
        lock(&self.state).clone()
    }

    fn is_running(&self) -> bool {
        matches!(*lock(&self.state), ProcessState::Running)
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ProcessState::Running => Ok(()),
            ProcessState::Killed => Err(Error::Killed),
            ProcessState::Crashed { details } => Err(Error::Crash(details)),
        }
    }

    /// Send one request and wait for the worker's verdict on it
    async fn request(&self, make: impl FnOnce(RequestId) -> Request) -> Result<()> {
        let request_id = self.correlator.next_request_id();
        let (completion_tx, completion_rx) = oneshot::channel();
        self.correlator.register(request_id, completion_tx);

        let request = make(request_id);
        trace!(request_id, "sending request");
        if let Err(write_error) = self.write_frame(&request).await {
            // A concurrent crash or kill may already have failed this
            // entry; only surface the write error if it is still ours
            if self.correlator.take(request_id).is_some() {
                return Err(self.transport_error(write_error));
            }
        }

        match completion_rx.await {
            Ok(result) => result,
            Err(_) => Err(self.terminal_error()),
        }
    }

    async fn write_frame(
        &self,
        request: &Request,
    ) -> std::result::Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => writer.send(request).await,
            None => Err(ProtocolError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            ))),
        }
    }

    /// Dispose one subscription on behalf of its [`Watch`] handle.
    ///
    /// Local routing is removed before the worker round trip, so no events
    /// are delivered past this point even while the unwatch is in flight.
    pub(crate) async fn unwatch(&self, watch_id: WatchId) -> Result<()> {
        self.registry.unregister(watch_id);
        if !self.is_running() {
            // Worker-side cleanup already happened wholesale
            return Ok(());
        }
        debug!(watch_id, "disposing watch");
        let result = self
            .request(|request_id| Request::Unwatch {
                request_id,
                watch_id,
            })
            .await;
        match result {
            Ok(()) => Ok(()),
            // The worker dying while an unwatch is in flight still leaves
            // the subscription gone, which is what the caller asked for
            Err(Error::Killed) | Err(Error::Crash(_)) => Ok(()),
            // A kill that began mid round trip can clear the worker's
            // table first and turn this unwatch into a rejection
            Err(_) if !self.is_running() => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// A `Watch` was dropped without `dispose`; stop local routing at least
    pub(crate) fn forget_watch(&self, watch_id: WatchId) {
        if self.registry.unregister(watch_id) {
            debug!(watch_id, "watch dropped without dispose");
        }
    }

    fn transport_error(&self, error: ProtocolError) -> Error {
        match self.state() {
            ProcessState::Killed => Error::Killed,
            ProcessState::Crashed { details } => Error::Crash(details),
            ProcessState::Running => {
                Error::crash(format!("failed to write to worker: {error}"))
            }
        }
    }

    /// Error for a request whose completion channel died unresolved
    fn terminal_error(&self) -> Error {
        match self.state() {
            ProcessState::Killed => Error::Killed,
            ProcessState::Crashed { details } => Error::Crash(details),
            ProcessState::Running => Error::protocol("request completion dropped"),
        }
    }

    fn route(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::OkResponse { request_id } => self.finish_request(request_id, Ok(())),
            WorkerMessage::ErrorResponse {
                request_id,
                description,
            } => self.finish_request(request_id, Err(Error::Rejected(description))),
            WorkerMessage::WatchEvents { watch_id, events } => {
                trace!(watch_id, count = events.len(), "event batch received");
                self.registry.dispatch(watch_id, events);
            }
            WorkerMessage::WatcherError { description } => {
                warn!("worker reported error: {description}");
                self.publish_fault(Fault::Worker { description });
            }
        }
    }

    fn finish_request(&self, request_id: RequestId, result: Result<()>) {
        if self.correlator.complete(request_id, result) {
            return;
        }
        if self.is_running() {
            // While running, every response must match a pending request
            self.fail_protocol(format!("response for unknown request id {request_id}"));
        } else {
            trace!(request_id, "stray response after shutdown");
        }
    }

    /// Terminal handling for a worker that broke the wire protocol
    fn fail_protocol(&self, message: String) {
        error!("worker protocol violation: {message}");
        let newly_failed = {
            let mut state = lock(&self.state);
            if matches!(*state, ProcessState::Running) {
                *state = ProcessState::Crashed {
                    details: format!("protocol violation: {message}"),
                };
                true
            } else {
                false
            }
        };
        if !newly_failed {
            return;
        }
        self.correlator.fail_all(&Error::Protocol(message.clone()));
        self.registry.clear();
        self.publish_fault(Fault::Protocol { message });
        self.shutdown.cancel();
    }

    /// Terminal handling for a worker that exited on its own
    async fn fail_crashed(&self, status_text: String) {
        let stderr = stderr_snapshot(&self.stderr_tail, &self.stderr_done).await;
        let details = if stderr.is_empty() {
            format!("worker exited unexpectedly ({status_text})")
        } else {
            format!("worker exited unexpectedly ({status_text}):\n{stderr}")
        };

        let newly_failed = {
            let mut state = lock(&self.state);
            if matches!(*state, ProcessState::Running) {
                *state = ProcessState::Crashed {
                    details: details.clone(),
                };
                true
            } else {
                false
            }
        };
        if !newly_failed {
            debug!("worker exit observed after shutdown");
            return;
        }
        warn!("worker crashed: {status_text}");
        self.correlator.fail_all(&Error::Crash(details.clone()));
        self.registry.clear();
        self.publish_fault(Fault::Crash { details });
    }

    fn publish_fault(&self, fault: Fault) {
        if self.faults_tx.send(fault).is_err() {
            debug!("fault receiver dropped, notification discarded");
        }
    }
}

/// Consume worker stdout until end of stream, routing every frame
async fn run_reader(shared: Arc<SupervisorShared>, mut reader: FrameReader<ChildStdout>) {
    loop {
        match reader.next_message().await {
            Ok(Some(message)) => shared.route(message),
            Ok(None) => break,
            Err(ProtocolError::Io(error)) if !shared.is_running() => {
                debug!("worker stdout closed: {error}");
                break;
            }
            Err(error) => {
                // Covers undecodable bytes as well as read failures: with
                // the worker still considered live, an unreadable stream
                // leaves every pending request unresolvable
                shared.fail_protocol(error.to_string());
                break;
            }
        }
    }
    debug!("reader task finished");
}

/// Hold the child handle, reap it, and classify how it went away
async fn run_monitor(shared: Arc<SupervisorShared>, mut child: Child) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = shared.shutdown.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            debug!("worker terminated after shutdown");
            return;
        }
    };

    let status_text = match status {
        Ok(status) => status.to_string(),
        Err(error) => format!("wait failed: {error}"),
    };
    shared.fail_crashed(status_text).await;
}

/// Accumulate worker stderr for diagnostics, newest output wins
async fn capture_stderr(
    stderr: ChildStderr,
    tail: Arc<Mutex<String>>,
    done: watch::Sender<bool>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("worker stderr: {line}");
        append_bounded(&mut lock(&tail), &line);
    }
    let _ = done.send(true);
}

fn append_bounded(tail: &mut String, line: &str) {
    tail.push_str(line);
    tail.push('\n');
    if tail.len() > STDERR_TAIL_LIMIT {
        let mut cut = tail.len() - STDERR_TAIL_LIMIT;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}

/// Wait for the readiness marker, classifying everything else as a failed
/// start: a reported initialization error, silent exit, or noise
async fn await_ready(
    reader: &mut FrameReader<ChildStdout>,
    child: &mut Child,
    stderr_tail: &Mutex<String>,
    stderr_done: &watch::Receiver<bool>,
) -> Result<()> {
    match reader.next_line().await {
        Ok(Some(line)) if line == READY_MARKER => Ok(()),
        Ok(Some(line)) => match decode_worker_message(&line) {
            Ok(WorkerMessage::WatcherError { description }) => Err(Error::spawn(format!(
                "worker failed to initialize: {description}"
            ))),
            _ => Err(Error::spawn(format!(
                "unexpected worker output before readiness: {line:?}"
            ))),
        },
        Ok(None) => {
            let status = child.wait().await.ok();
            let stderr = stderr_snapshot(stderr_tail, stderr_done).await;
            Err(Error::spawn(startup_exit_details(status, &stderr)))
        }
        Err(error) => Err(Error::spawn(format!(
            "worker stdout failed before readiness: {error}"
        ))),
    }
}

fn startup_exit_details(status: Option<ExitStatus>, stderr: &str) -> String {
    let status_text = match status {
        Some(status) => status.to_string(),
        None => "unknown exit status".to_string(),
    };
    if stderr.is_empty() {
        format!("worker exited before announcing readiness ({status_text})")
    } else {
        format!("worker exited before announcing readiness ({status_text}):\n{stderr}")
    }
}

/// Snapshot of captured stderr, giving the capture task a moment to drain
/// the pipe first
async fn stderr_snapshot(tail: &Mutex<String>, done: &watch::Receiver<bool>) -> String {
    let mut done = done.clone();
    let _ = timeout(STDERR_DRAIN_WAIT, done.wait_for(|finished| *finished)).await;
    lock(tail).clone()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
