use anyhow::{Context, Result};
use rust_mcp_schema::{
    Implementation, InitializeResult, ServerCapabilities, ServerCapabilitiesTools, LATEST_PROTOCOL_VERSION,
};
use rust_mcp_sdk::error::McpSdkError;
use rust_mcp_sdk::mcp_server::{server_runtime, McpServerOptions, ServerRuntime};
use rust_mcp_sdk::{McpServer, ToMcpServerHandler};
use rust_mcp_transport::{StdioTransport, TransportOptions};
use shell_session_registry::config::Config;
use shell_session_registry::mcp::handler::{AppManagers, TerminalServerHandler};
use shell_session_registry::mcp::notifier::{HostScopeFactory, NotificationEngine};
use shell_session_registry::tools::callback::TracingFaultReporter;
use shell_session_registry::tools::process_handle::ShellCommand;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) -> Result<()> {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shell_session_registry={}", level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

fn get_server_details() -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: "shell-session-registry".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Shell Session Registry".to_string()),
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: Some(
            "Named shell sessions with callback delivery. Create a terminal with `terminal_create`, \
            feed it lines with `terminal_write`, and receive each output line as a \
            `notifications/terminal/callback` notification. Relative working folders resolve against FILES_ROOT. \
            Use `process_execute` for one-shot commands."
                .to_string(),
        ),
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

fn map_mcp_sdk_error(err: McpSdkError) -> anyhow::Error {
    anyhow::anyhow!("MCP SDK Error: {:?}", err)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::load().context("Failed to load initial configuration.")?);
    setup_logging(&config.log_level)?;

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), root = %config.files_root.display(), "Starting shell-session-registry");
    tracing::debug!("Loaded configuration: {:?}", config);

    let shell = ShellCommand::for_host(config.default_shell.as_deref());
    if which::which(&shell.program).is_err() {
        tracing::warn!(shell = %shell.program, "Session shell is not installed or not in PATH. `terminal_create` will fail.");
    }

    let notifier = Arc::new(NotificationEngine::new());
    let managers = Arc::new(AppManagers::new(
        config.clone(),
        Arc::new(HostScopeFactory),
        notifier.clone(),
        Arc::new(TracingFaultReporter),
    ));
    let handler = TerminalServerHandler::new(managers.clone(), notifier);

    tracing::info!("Using STDIO transport mode.");
    let transport = StdioTransport::new(TransportOptions::default())
        .map_err(|e| anyhow::anyhow!("Failed to create StdioTransport: {}", e))?;
    let server: Arc<ServerRuntime> = server_runtime::create_server(McpServerOptions {
        server_details: get_server_details(),
        transport,
        handler: handler.to_mcp_server_handler(),
        task_store: None,
        client_task_store: None,
    });
    let served = server.start().await.map_err(map_mcp_sdk_error);

    // Sessions outlive the transport otherwise; tear them down before reporting.
    managers.shutdown().await;
    served?;

    tracing::info!("Server shutdown.");
    Ok(())
}
