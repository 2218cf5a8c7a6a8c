//! Callback dispatch for terminal session events.
//!
//! A [`CallbackDefinition`] is an opaque program template supplied when a
//! session is created. Every delivered line produces a fresh clone of that
//! template with the line appended as its last argument, which is then run by
//! the [`CallbackEngine`] inside a child of the session's [`ExecutionScope`].

use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

/// Opaque, cloneable callback program. The engine decides what `program` means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackDefinition {
    pub program: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl CallbackDefinition {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            arguments: Vec::new(),
        }
    }

    /// Returns a copy of this template with `argument` appended; `self` is left untouched.
    pub fn with_argument(&self, argument: Value) -> Self {
        let mut invocation = self.clone();
        invocation.arguments.push(argument);
        invocation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Output,
    Error,
    Exited,
}

/// Everything a session can report, delivered through one dispatch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Output(String),
    Error(String),
    Exited,
}

impl TerminalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TerminalEvent::Output(_) => EventKind::Output,
            TerminalEvent::Error(_) => EventKind::Error,
            TerminalEvent::Exited => EventKind::Exited,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            TerminalEvent::Output(line) | TerminalEvent::Error(line) => Some(line),
            TerminalEvent::Exited => None,
        }
    }
}

/// One ready-to-run callback: the cloned definition plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackInvocation {
    pub session: String,
    pub kind: EventKind,
    pub definition: CallbackDefinition,
}

/// Isolated context a callback runs in.
pub trait ExecutionScope: Send + Sync {
    fn id(&self) -> String;

    /// A fresh sub-context; the invoker releases it after a single invocation.
    fn create_child(&self) -> Box<dyn ExecutionScope>;

    fn release(&self);
}

pub trait ScopeFactory: Send + Sync {
    fn new_scope(&self) -> Box<dyn ExecutionScope>;
}

/// Runs callback programs. Supplied by whatever embeds the registry.
#[async_trait]
pub trait CallbackEngine: Send + Sync {
    async fn execute(&self, scope: &dyn ExecutionScope, invocation: CallbackInvocation) -> anyhow::Result<()>;
}

/// Receives callback faults; they never reach the pump that triggered them.
pub trait FaultReporter: Send + Sync {
    fn report(&self, session: &str, fault: &AppError);
}

#[derive(Debug, Default)]
pub struct TracingFaultReporter;

impl FaultReporter for TracingFaultReporter {
    fn report(&self, session: &str, fault: &AppError) {
        error!(session = %session, error = %fault, "Callback failed");
    }
}

/// Releases the wrapped scope when the last holder drops it.
struct ScopeRelease(Box<dyn ExecutionScope>);

impl Drop for ScopeRelease {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A session's own execution scope. Released at most once; invocations already
/// running keep it alive until they finish, later ones become no-ops.
pub struct SessionScope {
    slot: Mutex<Option<Arc<ScopeRelease>>>,
}

impl SessionScope {
    pub fn new(scope: Box<dyn ExecutionScope>) -> Self {
        Self {
            slot: Mutex::new(Some(Arc::new(ScopeRelease(scope)))),
        }
    }

    fn acquire(&self) -> Option<Arc<ScopeRelease>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_released(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Returns `true` only for the call that actually detached the scope.
    pub fn release(&self) -> bool {
        let taken = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        taken.is_some()
    }
}

impl fmt::Debug for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionScope")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Child scope for exactly one invocation.
struct ChildScope(Box<dyn ExecutionScope>);

impl Drop for ChildScope {
    fn drop(&mut self) {
        self.0.release();
    }
}

pub struct CallbackInvoker {
    engine: Arc<dyn CallbackEngine>,
    faults: Arc<dyn FaultReporter>,
}

impl fmt::Debug for CallbackInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackInvoker").finish_non_exhaustive()
    }
}

impl CallbackInvoker {
    pub fn new(engine: Arc<dyn CallbackEngine>, faults: Arc<dyn FaultReporter>) -> Self {
        Self { engine, faults }
    }

    /// Runs `definition` with `text` as its argument. Returns whether the engine was called.
    ///
    /// Empty or absent text is skipped unless `force_deliver_empty` is set, in which
    /// case absent text is passed as JSON `null`.
    pub async fn invoke(
        &self,
        scope: &SessionScope,
        session: &str,
        kind: EventKind,
        definition: &CallbackDefinition,
        text: Option<&str>,
        force_deliver_empty: bool,
    ) -> bool {
        let argument = match text {
            Some(line) if !line.is_empty() => Value::String(line.to_string()),
            Some(_) if force_deliver_empty => Value::String(String::new()),
            None if force_deliver_empty => Value::Null,
            _ => return false,
        };

        let Some(session_scope) = scope.acquire() else {
            debug!(session = %session, ?kind, "Scope already released; dropping event");
            return false;
        };
        let child = ChildScope(session_scope.0.create_child());

        let invocation = CallbackInvocation {
            session: session.to_string(),
            kind,
            definition: definition.with_argument(argument),
        };

        if let Err(e) = self.engine.execute(child.0.as_ref(), invocation).await {
            let fault = AppError::CallbackFault(format!("{:#}", e));
            self.faults.report(session, &fault);
        }
        drop(child);
        true
    }
}
