use crate::config::Config;
use crate::error::AppError;
use crate::tools::callback::{CallbackDefinition, CallbackInvoker, ScopeFactory, SessionScope};
use crate::tools::process_handle::{ProcessHandle, ShellCommand};
use crate::tools::terminal_session::{SessionInfo, TerminalRegistry, TerminalSession};
use crate::utils::path_utils::{resolve_working_folder, RootResolver};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
pub struct CreateTerminalParams {
    pub name: String,
    pub working_folder: Option<String>,
    pub on_output: Option<CallbackDefinition>,
    pub on_error: Option<CallbackDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct WriteTerminalParams {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct DestroyTerminalParams {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct WriteTerminalResult {
    pub name: String,
    pub written: bool,
}

#[derive(Debug, Serialize)]
pub struct DestroyTerminalResult {
    pub name: String,
    pub destroyed: bool,
    pub message: String,
}

/// Creates, feeds and tears down named shell sessions held in a shared [`TerminalRegistry`].
pub struct TerminalManager {
    config: Arc<Config>,
    registry: Arc<TerminalRegistry>,
    root: Arc<dyn RootResolver>,
    scopes: Arc<dyn ScopeFactory>,
    invoker: Arc<CallbackInvoker>,
}

impl std::fmt::Debug for TerminalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalManager")
            .field("sessions", &self.registry.names())
            .finish_non_exhaustive()
    }
}

impl TerminalManager {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<TerminalRegistry>,
        root: Arc<dyn RootResolver>,
        scopes: Arc<dyn ScopeFactory>,
        invoker: Arc<CallbackInvoker>,
    ) -> Self {
        Self {
            config,
            registry,
            root,
            scopes,
            invoker,
        }
    }

    pub fn registry(&self) -> &Arc<TerminalRegistry> {
        &self.registry
    }

    #[instrument(skip(self, params), fields(name = %params.name))]
    pub async fn create(&self, params: &CreateTerminalParams) -> Result<SessionInfo, AppError> {
        let name = params.name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidArgument("Terminal name is required".to_string()));
        }
        if self.registry.lookup(name).is_some() {
            return Err(AppError::InvalidArgument(format!(
                "A terminal named '{}' already exists",
                name
            )));
        }

        let working_directory = resolve_working_folder(params.working_folder.as_deref(), self.root.as_ref())?;
        let shell = ShellCommand::for_host(self.config.default_shell.as_deref());

        let scope = SessionScope::new(self.scopes.new_scope());
        let mut process = match ProcessHandle::spawn_shell(&shell, &working_directory) {
            Ok(process) => process,
            Err(e) => {
                scope.release();
                return Err(e);
            }
        };

        let (session, kill_rx) = TerminalSession::new(
            name.to_string(),
            working_directory,
            &mut process,
            scope,
            params.on_output.clone(),
            params.on_error.clone(),
        );
        let session = Arc::new(session);

        if !self.registry.try_register(name, session.clone()) {
            warn!(name = %name, pid = ?session.pid(), "Lost registration race; terminating new shell");
            session.release_scope();
            process.terminate().await;
            return Err(AppError::InvalidArgument(format!(
                "A terminal named '{}' already exists",
                name
            )));
        }

        session.start(
            process,
            kill_rx,
            self.registry.clone(),
            self.invoker.clone(),
            self.config.exit_drain_timeout,
        );
        info!(name = %name, pid = ?session.pid(), shell = %shell.program, cwd = %session.working_directory().display(), "Terminal created");
        Ok(session.info())
    }

    /// Sends one command line to the named shell without waiting for it to run.
    #[instrument(skip(self, params), fields(name = %params.name))]
    pub async fn write(&self, params: &WriteTerminalParams) -> Result<WriteTerminalResult, AppError> {
        if params.name.trim().is_empty() {
            return Err(AppError::InvalidArgument("Terminal name is required".to_string()));
        }
        if params.command.trim().is_empty() {
            return Err(AppError::InvalidArgument("Command is required".to_string()));
        }
        if self.config.is_command_blocked(&params.command) {
            warn!(command = %params.command, "Command blocked");
            return Err(AppError::CommandBlocked(params.command.clone()));
        }

        let session = self
            .registry
            .lookup(params.name.trim())
            .ok_or_else(|| AppError::NotFound(params.name.trim().to_string()))?;
        session.write_line(&params.command).await?;
        debug!(name = %session.name(), "Command written");

        Ok(WriteTerminalResult {
            name: session.name().to_string(),
            written: true,
        })
    }

    /// Unknown names are a no-op: the shell may already have exited and cleaned up.
    #[instrument(skip(self, params), fields(name = %params.name))]
    pub async fn destroy(&self, params: &DestroyTerminalParams) -> Result<DestroyTerminalResult, AppError> {
        let name = params.name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidArgument("Terminal name is required".to_string()));
        }

        match self.registry.try_remove(name) {
            Some(session) => {
                session.shutdown(self.config.kill_timeout).await;
                info!(name = %name, pid = ?session.pid(), "Terminal destroyed");
                Ok(DestroyTerminalResult {
                    name: name.to_string(),
                    destroyed: true,
                    message: "Terminal destroyed.".to_string(),
                })
            }
            None => {
                debug!(name = %name, "No terminal to destroy");
                Ok(DestroyTerminalResult {
                    name: name.to_string(),
                    destroyed: false,
                    message: "No terminal with that name; nothing to do.".to_string(),
                })
            }
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, AppError> {
        let mut infos: Vec<SessionInfo> = self.registry.sessions().iter().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    pub async fn destroy_all(&self) -> usize {
        let mut destroyed = 0;
        for name in self.registry.names() {
            if let Some(session) = self.registry.try_remove(&name) {
                session.shutdown(self.config.kill_timeout).await;
                destroyed += 1;
            }
        }
        if destroyed > 0 {
            info!(count = destroyed, "Destroyed all terminals");
        }
        destroyed
    }
}
