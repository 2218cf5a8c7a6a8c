use crate::tools::callback::{CallbackEngine, CallbackInvocation, ExecutionScope, ScopeFactory};
use anyhow::anyhow;
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::CustomNotification;
use rust_mcp_sdk::McpServer;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::trace;
use uuid::Uuid;

pub const CALLBACK_NOTIFICATION: &str = "notifications/terminal/callback";

/// UUID-tagged scope. Children remember their parent so notifications can be traced back.
#[derive(Debug)]
pub struct HostScope {
    id: Uuid,
    parent: Option<Uuid>,
}

impl HostScope {
    pub fn root() -> Self {
        Self {
            id: Uuid::new_v4(),
            parent: None,
        }
    }
}

impl ExecutionScope for HostScope {
    fn id(&self) -> String {
        self.id.to_string()
    }

    fn create_child(&self) -> Box<dyn ExecutionScope> {
        Box::new(HostScope {
            id: Uuid::new_v4(),
            parent: Some(self.id),
        })
    }

    fn release(&self) {
        trace!(scope = %self.id, parent = ?self.parent, "Execution scope released");
    }
}

#[derive(Debug, Default)]
pub struct HostScopeFactory;

impl ScopeFactory for HostScopeFactory {
    fn new_scope(&self) -> Box<dyn ExecutionScope> {
        Box::new(HostScope::root())
    }
}

/// Builds the notification announcing one callback invocation.
pub fn callback_notification(invocation: CallbackInvocation, scope: String) -> anyhow::Result<CustomNotification> {
    let mut params = Map::new();
    params.insert("session".to_string(), Value::String(invocation.session));
    params.insert("event".to_string(), serde_json::to_value(invocation.kind)?);
    params.insert("program".to_string(), Value::String(invocation.definition.program));
    params.insert("arguments".to_string(), Value::Array(invocation.definition.arguments));
    params.insert("scope".to_string(), Value::String(scope));
    Ok(CustomNotification {
        method: CALLBACK_NOTIFICATION.to_string(),
        params: Some(params),
    })
}

/// Runs callbacks by sending them to the client as MCP notifications.
///
/// The server runtime only exists once the transport is up, so it is attached
/// after construction; invocations before that fail.
#[derive(Default)]
pub struct NotificationEngine {
    runtime: OnceLock<Arc<dyn McpServer>>,
}

impl NotificationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, runtime: Arc<dyn McpServer>) {
        if self.runtime.set(runtime).is_ok() {
            trace!("Server runtime attached to notification engine");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.runtime.get().is_some()
    }
}

#[async_trait]
impl CallbackEngine for NotificationEngine {
    async fn execute(&self, scope: &dyn ExecutionScope, invocation: CallbackInvocation) -> anyhow::Result<()> {
        let runtime = self
            .runtime
            .get()
            .ok_or_else(|| anyhow!("No MCP client connected"))?;
        let notification = callback_notification(invocation, scope.id())?;
        runtime
            .notify_custom(notification)
            .await
            .map_err(|e| anyhow!("Failed to send callback notification: {}", e))
    }
}
