use crate::config::Config;
use crate::error::AppError;
use crate::mcp::notifier::NotificationEngine;
use crate::mcp::schemas::*;
use crate::tools::callback::{CallbackEngine, CallbackInvoker, FaultReporter, ScopeFactory};
use crate::tools::os_tool::{self, MatchesPlatformParams};
use crate::tools::process_tool::{ExecuteParams, OneShotExecutor};
use crate::tools::terminal_session::TerminalRegistry;
use crate::tools::terminal_tool::{CreateTerminalParams, DestroyTerminalParams, TerminalManager, WriteTerminalParams};
use crate::utils::audit_logger::AuditLogger;

use async_trait::async_trait;
use rust_mcp_schema::{
    schema_utils::CallToolError, CallToolRequestParams, CallToolResult, ListToolsResult, PaginatedRequestParams,
    RpcError, TextContent, Tool, ToolInputSchema,
};
use rust_mcp_sdk::mcp_server::ServerHandler;
use rust_mcp_sdk::McpServer;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, instrument};

// Define a struct to hold all managers, initialized with the config
pub struct AppManagers {
    config: Arc<Config>,
    terminal_manager: Arc<TerminalManager>,
    executor: Arc<OneShotExecutor>,
    audit_logger: Arc<AuditLogger>,
}

impl AppManagers {
    pub fn new(
        config: Arc<Config>,
        scopes: Arc<dyn ScopeFactory>,
        engine: Arc<dyn CallbackEngine>,
        faults: Arc<dyn FaultReporter>,
    ) -> Self {
        let registry = Arc::new(TerminalRegistry::new());
        let invoker = Arc::new(CallbackInvoker::new(engine, faults));
        let terminal_manager = Arc::new(TerminalManager::new(
            config.clone(),
            registry,
            config.clone(),
            scopes,
            invoker,
        ));
        let executor = Arc::new(OneShotExecutor::new(config.clone()));
        let audit_logger = Arc::new(AuditLogger::new(&config));

        Self {
            config,
            terminal_manager,
            executor,
            audit_logger,
        }
    }

    /// Destroys every live terminal; called once the client disconnects.
    pub async fn shutdown(&self) {
        let destroyed = self.terminal_manager.destroy_all().await;
        info!(destroyed, "Terminal sessions shut down");
    }
}

fn tool(name: &str, description: &str, input_schema: ToolInputSchema) -> Tool {
    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema,
        annotations: None,
        execution: None,
        icons: vec![],
        meta: None,
        output_schema: None,
        title: None,
    }
}

/// Serializes a tool result as JSON text; objects are also attached as structured content.
fn json_result<T: Serialize>(result: &T) -> Result<CallToolResult, AppError> {
    let value = serde_json::to_value(result)?;
    let text = serde_json::to_string(&value)?;
    let mut call_result = CallToolResult::text_content(vec![TextContent::new(text, None, None)]);
    if let Value::Object(map) = value {
        call_result.structured_content = Some(map);
    }
    Ok(call_result)
}

pub struct TerminalServerHandler {
    managers: Arc<AppManagers>,
    notifier: Arc<NotificationEngine>,
}

impl TerminalServerHandler {
    pub fn new(managers: Arc<AppManagers>, notifier: Arc<NotificationEngine>) -> Self {
        Self { managers, notifier }
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        vec![
            tool("get_config", "Get current server configuration.", empty_schema()),
            // Terminal
            tool("terminal_create", "Start a named interactive shell.", terminal_create_schema()),
            tool("terminal_write", "Send a command line to a named shell.", terminal_write_schema()),
            tool("terminal_destroy", "Kill a named shell and release it.", terminal_destroy_schema()),
            tool("terminal_list", "List live shells.", empty_schema()),
            // Process
            tool("process_execute", "Run a program to completion and return its output.", process_execute_schema()),
            // OS
            tool("os_describe", "Describe the host operating system.", empty_schema()),
            tool("os_matches_platform", "Check whether the host runs the given platform.", os_matches_platform_schema()),
        ]
    }

    #[instrument(skip(self, args))]
    pub async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<CallToolResult, CallToolError> {
        info!("Handling call_tool request for: {}", name);
        self.managers
            .audit_logger
            .log_tool_call(name, &Value::Object(args.clone()))
            .await;

        // Helper macro to parse args and call manager method
        macro_rules! handle_tool {
            ($manager_field:ident . $method:ident :: <$param_type:ty> ()) => {{
                let params: $param_type = serde_json::from_value(Value::Object(args)).map_err(AppError::from)?;
                let result = self.managers.$manager_field.$method(&params).await?;
                Ok(json_result(&result)?)
            }};
            ($manager_field:ident . $method:ident ()) => {{
                let result = self.managers.$manager_field.$method().await?;
                Ok(json_result(&result)?)
            }};
        }

        match name {
            "get_config" => Ok(json_result(&self.managers.config.view())?),
            // Terminal
            "terminal_create" => handle_tool!(terminal_manager.create::<CreateTerminalParams>()),
            "terminal_write" => handle_tool!(terminal_manager.write::<WriteTerminalParams>()),
            "terminal_destroy" => handle_tool!(terminal_manager.destroy::<DestroyTerminalParams>()),
            "terminal_list" => handle_tool!(terminal_manager.list_sessions()),
            // Process
            "process_execute" => {
                let params: ExecuteParams = serde_json::from_value(Value::Object(args)).map_err(AppError::from)?;
                let run = self.managers.executor.execute(&params);
                let result = match params.timeout_ms {
                    // Dropping the future kills the child (kill_on_drop).
                    Some(ms) => timeout(Duration::from_millis(ms), run).await.map_err(|_| {
                        AppError::TimeoutError(format!("'{}' did not finish within {} ms", params.command_line, ms))
                    })??,
                    None => run.await?,
                };
                Ok(json_result(&result)?)
            }
            // OS
            "os_describe" => Ok(json_result(&os_tool::describe())?),
            "os_matches_platform" => {
                let params: MatchesPlatformParams =
                    serde_json::from_value(Value::Object(args)).map_err(AppError::from)?;
                Ok(json_result(&os_tool::matches(&params))?)
            }
            _ => {
                error!("Unknown tool called: {}", name);
                Err(CallToolError::unknown_tool(name))
            }
        }
    }
}

#[async_trait]
impl ServerHandler for TerminalServerHandler {
    async fn on_initialized(&self, runtime: Arc<dyn McpServer>) {
        self.notifier.attach(runtime);
        info!("Client initialized; callback notifications enabled");
    }

    #[instrument(skip(self, _params, _runtime))]
    async fn handle_list_tools_request(
        &self,
        _params: Option<PaginatedRequestParams>,
        _runtime: Arc<dyn McpServer>,
    ) -> Result<ListToolsResult, RpcError> {
        info!("Handling list_tools request");
        Ok(ListToolsResult {
            tools: self.list_tools(),
            meta: None,
            next_cursor: None,
        })
    }

    #[instrument(skip(self, params, runtime), fields(tool_name = %params.name))]
    async fn handle_call_tool_request(
        &self,
        params: CallToolRequestParams,
        runtime: Arc<dyn McpServer>,
    ) -> Result<CallToolResult, CallToolError> {
        // Clients that skip `notifications/initialized` still get callbacks.
        self.notifier.attach(runtime);
        self.call_tool(&params.name, params.arguments.unwrap_or_default()).await
    }
}
