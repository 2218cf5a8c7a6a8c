#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use shell_session_registry::config::Config;
use shell_session_registry::tools::callback::{
    CallbackDefinition, CallbackEngine, CallbackInvocation, CallbackInvoker, EventKind, ExecutionScope, ScopeFactory,
    TracingFaultReporter,
};
use shell_session_registry::tools::terminal_session::TerminalRegistry;
use shell_session_registry::tools::terminal_tool::{CreateTerminalParams, TerminalManager, WriteTerminalParams};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub session: String,
    pub kind: EventKind,
    pub program: String,
    pub argument: Value,
}

/// Records every invocation; fails (after recording) when the delivered text is `boom`.
/// With a delay, each invocation sleeps before it is recorded as finished.
#[derive(Default)]
pub struct RecordingEngine {
    seen: Mutex<Vec<Delivered>>,
    started: Mutex<Vec<Value>>,
    delay: Duration,
}

#[async_trait]
impl CallbackEngine for RecordingEngine {
    async fn execute(&self, _scope: &dyn ExecutionScope, invocation: CallbackInvocation) -> anyhow::Result<()> {
        let argument = invocation.definition.arguments.last().cloned().unwrap_or(Value::Null);
        self.started.lock().unwrap().push(argument.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fail = argument == Value::from("boom");
        self.seen.lock().unwrap().push(Delivered {
            session: invocation.session,
            kind: invocation.kind,
            program: invocation.definition.program,
            argument,
        });
        if fail {
            anyhow::bail!("boom requested");
        }
        Ok(())
    }
}

impl RecordingEngine {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Arguments of invocations that began, finished or not.
    pub fn started(&self) -> Vec<Value> {
        self.started.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.seen.lock().unwrap().clone()
    }

    pub fn for_session(&self, session: &str) -> Vec<Delivered> {
        self.delivered().into_iter().filter(|d| d.session == session).collect()
    }

    pub fn has_line(&self, session: &str, kind: EventKind, text: &str) -> bool {
        self.for_session(session)
            .iter()
            .any(|d| d.kind == kind && d.argument == Value::from(text))
    }

    pub fn has_exit(&self, session: &str) -> bool {
        self.for_session(session).iter().any(|d| d.kind == EventKind::Exited)
    }
}

#[derive(Default)]
pub struct CountingScopes {
    pub created: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

struct CountingScope {
    released: Arc<AtomicUsize>,
    count_release: bool,
}

impl ExecutionScope for CountingScope {
    fn id(&self) -> String {
        "counting".to_string()
    }

    fn create_child(&self) -> Box<dyn ExecutionScope> {
        Box::new(CountingScope {
            released: self.released.clone(),
            count_release: false,
        })
    }

    fn release(&self) {
        if self.count_release {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl ScopeFactory for CountingScopes {
    fn new_scope(&self) -> Box<dyn ExecutionScope> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(CountingScope {
            released: self.released.clone(),
            count_release: true,
        })
    }
}

impl CountingScopes {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub manager: Arc<TerminalManager>,
    pub engine: Arc<RecordingEngine>,
    pub scopes: Arc<CountingScopes>,
    pub root: TempDir,
}

pub fn harness() -> Harness {
    harness_with_engine(Arc::new(RecordingEngine::default()))
}

pub fn harness_with_engine(engine: Arc<RecordingEngine>) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::new(dunce::canonicalize(root.path()).unwrap())
        .with_blocked_commands("sudo")
        .unwrap();
    config.exit_drain_timeout = Duration::from_millis(500);
    let config = Arc::new(config);

    let scopes = Arc::new(CountingScopes::default());
    let invoker = Arc::new(CallbackInvoker::new(engine.clone(), Arc::new(TracingFaultReporter)));
    let manager = Arc::new(TerminalManager::new(
        config.clone(),
        Arc::new(TerminalRegistry::new()),
        config,
        scopes.clone(),
        invoker,
    ));

    Harness {
        manager,
        engine,
        scopes,
        root,
    }
}

pub fn create_params(name: &str, on_output: Option<&str>, on_error: Option<&str>) -> CreateTerminalParams {
    CreateTerminalParams {
        name: name.to_string(),
        working_folder: None,
        on_output: on_output.map(CallbackDefinition::new),
        on_error: on_error.map(CallbackDefinition::new),
    }
}

pub fn write_params(name: &str, command: &str) -> WriteTerminalParams {
    WriteTerminalParams {
        name: name.to_string(),
        command: command.to_string(),
    }
}

/// Polls `condition` every 20 ms until it holds or [`WAIT`] elapses.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
