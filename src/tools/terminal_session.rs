use crate::error::AppError;
use crate::tools::callback::{CallbackDefinition, CallbackInvoker, SessionScope, TerminalEvent};
use crate::tools::process_handle::{wait_for_exit, ExitReason, LineReader, ProcessHandle, LINE_TERMINATOR};
use crate::tools::terminal_registry::Registry;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type TerminalRegistry = Registry<TerminalSession>;

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub name: String,
    pub pid: Option<u32>,
    pub working_directory: String,
    pub start_time_iso: String,
    pub runtime_ms: u128,
    pub has_output_callback: bool,
    pub has_error_callback: bool,
}

/// One named shell. Owns the stdin writer and the execution scope; the child itself
/// belongs to the exit watcher task once [`TerminalSession::start`] runs.
#[derive(Debug)]
pub struct TerminalSession {
    name: String,
    working_directory: PathBuf,
    pid: Option<u32>,
    start_time: Instant,
    start_time_system: SystemTime,
    on_output: Option<CallbackDefinition>,
    on_error: Option<CallbackDefinition>,
    scope: SessionScope,
    stdin: TokioMutex<Option<ChildStdin>>,
    kill: StdMutex<Option<oneshot::Sender<()>>>,
    watcher: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TerminalSession {
    pub fn new(
        name: String,
        working_directory: PathBuf,
        process: &mut ProcessHandle,
        scope: SessionScope,
        on_output: Option<CallbackDefinition>,
        on_error: Option<CallbackDefinition>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (kill_tx, kill_rx) = oneshot::channel();
        let session = Self {
            name,
            working_directory,
            pid: process.pid,
            start_time: Instant::now(),
            start_time_system: SystemTime::now(),
            on_output,
            on_error,
            scope,
            stdin: TokioMutex::new(process.take_stdin()),
            kill: StdMutex::new(Some(kill_tx)),
            watcher: StdMutex::new(None),
            closed: AtomicBool::new(false),
        };
        (session, kill_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            name: self.name.clone(),
            pid: self.pid,
            working_directory: self.working_directory.display().to_string(),
            start_time_iso: chrono::DateTime::<Utc>::from(self.start_time_system).to_rfc3339(),
            runtime_ms: self.start_time.elapsed().as_millis(),
            has_output_callback: self.on_output.is_some(),
            has_error_callback: self.on_error.is_some(),
        }
    }

    /// Starts the stdout/stderr pumps and the exit watcher. Call only once the
    /// session is visible in `registry`.
    pub fn start(
        self: &Arc<Self>,
        mut process: ProcessHandle,
        kill_rx: oneshot::Receiver<()>,
        registry: Arc<TerminalRegistry>,
        invoker: Arc<CallbackInvoker>,
        drain_timeout: Duration,
    ) {
        let stop_reading = CancellationToken::new();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = process.take_stdout() {
            pumps.push(tokio::spawn(pump(
                self.clone(),
                invoker.clone(),
                stdout,
                TerminalEvent::Output,
                stop_reading.clone(),
            )));
        }
        if let Some(stderr) = process.take_stderr() {
            pumps.push(tokio::spawn(pump(
                self.clone(),
                invoker.clone(),
                stderr,
                TerminalEvent::Error,
                stop_reading.clone(),
            )));
        }

        let watcher = tokio::spawn(watch_exit(
            self.clone(),
            process,
            kill_rx,
            pumps,
            stop_reading,
            registry,
            invoker,
            drain_timeout,
        ));
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);
    }

    /// Routes an event to the matching callback. Exit goes to the output callback
    /// with forced delivery; nothing but the exit event is delivered once the session is closed.
    pub async fn dispatch(&self, invoker: &CallbackInvoker, event: TerminalEvent) -> bool {
        let (definition, force_deliver_empty) = match &event {
            TerminalEvent::Output(_) => (self.on_output.as_ref(), false),
            TerminalEvent::Error(_) => (self.on_error.as_ref(), false),
            TerminalEvent::Exited => (self.on_output.as_ref(), true),
        };
        if event != TerminalEvent::Exited && self.closed.load(Ordering::Acquire) {
            return false;
        }
        let Some(definition) = definition else {
            return false;
        };
        invoker
            .invoke(&self.scope, &self.name, event.kind(), definition, event.text(), force_deliver_empty)
            .await
    }

    /// Writes `command` plus the platform line terminator to the shell's stdin.
    pub async fn write_line(&self, command: &str) -> Result<(), AppError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| AppError::NotFound(self.name.clone()))?;
        let mut payload = String::with_capacity(command.len() + LINE_TERMINATOR.len());
        payload.push_str(command);
        payload.push_str(LINE_TERMINATOR);
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    pub fn release_scope(&self) -> bool {
        self.scope.release()
    }

    /// Kills the process, waits up to `kill_timeout` for the exit watcher to finish
    /// its cleanup, then releases the scope. Safe to call more than once.
    pub async fn shutdown(&self, kill_timeout: Duration) {
        let kill = self.kill.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(kill) = kill {
            if kill.send(()).is_err() {
                debug!(session = %self.name, "Shell already exited; kill signal not needed");
            }
        }
        self.close_stdin().await;

        let watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(watcher) = watcher {
            if timeout(kill_timeout, watcher).await.is_err() {
                warn!(session = %self.name, pid = ?self.pid, "Exit watcher did not finish before kill timeout");
            }
        }
        self.release_scope();
    }
}

/// Reads `stream` line by line and dispatches each line. Once `stop_reading` fires the
/// pump still consumes whatever the stream has ready, and stops at the first read that
/// would wait. A dispatch in progress is never interrupted.
async fn pump<R>(
    session: Arc<TerminalSession>,
    invoker: Arc<CallbackInvoker>,
    stream: R,
    to_event: fn(String) -> TerminalEvent,
    stop_reading: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = LineReader::new(stream);
    loop {
        let next = tokio::select! {
            biased;
            next = reader.next_line() => next,
            _ = stop_reading.cancelled() => {
                debug!(session = %session.name, "Stream idle after exit; stopping pump");
                break;
            }
        };
        match next {
            Ok(Some(line)) => {
                session.dispatch(&invoker, to_event(line)).await;
            }
            Ok(None) => break,
            Err(e) => {
                debug!(session = %session.name, error = %e, "Stream read failed; stopping pump");
                break;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn watch_exit(
    session: Arc<TerminalSession>,
    process: ProcessHandle,
    kill_rx: oneshot::Receiver<()>,
    mut pumps: Vec<JoinHandle<()>>,
    stop_reading: CancellationToken,
    registry: Arc<TerminalRegistry>,
    invoker: Arc<CallbackInvoker>,
    drain_timeout: Duration,
) {
    match wait_for_exit(process.into_child(), kill_rx).await {
        ExitReason::Exited(code) => info!(session = %session.name, pid = ?session.pid, exit_code = ?code, "Shell exited"),
        ExitReason::Killed => info!(session = %session.name, pid = ?session.pid, "Shell killed"),
        ExitReason::WaitFailed(e) => warn!(session = %session.name, pid = ?session.pid, error = %e, "Failed to wait for shell"),
    }

    // A pipe can outlive the shell when a background job inherited it. After the grace
    // period the pumps stop waiting for new data, but every line already written is
    // still delivered and running callbacks finish.
    let drained = timeout(drain_timeout, join_pumps(&mut pumps)).await;
    if drained.is_err() {
        warn!(session = %session.name, "Output still open after exit; no longer waiting for new lines");
        stop_reading.cancel();
        join_pumps(&mut pumps).await;
    }
    session.closed.store(true, Ordering::Release);

    if registry.remove_if_same(&session.name, &session) {
        debug!(session = %session.name, "Removed exited session from registry");
    }
    session.dispatch(&invoker, TerminalEvent::Exited).await;
    session.close_stdin().await;
    session.release_scope();
}

/// Awaits every pump still running. Safe to call again after a timed-out attempt.
async fn join_pumps(pumps: &mut Vec<JoinHandle<()>>) {
    while let Some(handle) = pumps.last_mut() {
        if let Err(e) = handle.await {
            warn!(error = %e, "Output pump ended abnormally");
        }
        pumps.pop();
    }
}
