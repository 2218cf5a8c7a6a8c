use crate::config::Config;
use crate::error::AppError;
use crate::tools::process_handle::{LineReader, ProcessHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
pub struct ExecuteParams {
    pub command_line: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ExecuteResult {
    pub output: String,
    pub error_output: String,
    pub exit_code: Option<i32>,
}

/// Runs a program to completion and collects what it printed. Independent of the terminal registry.
#[derive(Debug)]
pub struct OneShotExecutor {
    config: Arc<Config>,
}

/// Splits a command line into program and arguments on whitespace. Double quotes group
/// words and are removed; there is no other escaping.
pub fn split_command_line(command_line: &str) -> Option<(String, Vec<String>)> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in command_line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }

    let mut tokens = tokens.into_iter();
    let program = tokens.next().filter(|p| !p.is_empty())?;
    Some((program, tokens.collect()))
}

async fn collect_lines<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<String> {
    let Some(stream) = stream else {
        return Vec::new();
    };
    let mut reader = LineReader::new(stream);
    let mut lines = Vec::new();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => lines.push(line),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed reading process output");
                break;
            }
        }
    }
    lines
}

impl OneShotExecutor {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Blocks the calling task until the program closes stdout, then reaps it.
    /// No timeout is applied here.
    #[instrument(skip(self, params), fields(command_line = %params.command_line))]
    pub async fn execute(&self, params: &ExecuteParams) -> Result<ExecuteResult, AppError> {
        let command_line = params.command_line.trim();
        if command_line.is_empty() {
            return Err(AppError::InvalidArgument("Command line is required".to_string()));
        }
        if self.config.is_command_blocked(command_line) {
            warn!(command = %command_line, "Command execution blocked");
            return Err(AppError::CommandBlocked(command_line.to_string()));
        }
        let (program, args) = split_command_line(command_line)
            .ok_or_else(|| AppError::InvalidArgument("Command line has no program".to_string()))?;

        let mut process = ProcessHandle::spawn_program(&program, &args, &self.config.files_root)?;
        debug!(program = %program, pid = ?process.pid, "One-shot process started");

        // stderr is drained alongside stdout so the child never stalls on a full pipe
        let (stdout_lines, stderr_lines) = tokio::join!(
            collect_lines(process.take_stdout()),
            collect_lines(process.take_stderr())
        );
        let exit_code = process.wait().await?.code();
        info!(program = %program, exit_code = ?exit_code, "One-shot process finished");

        Ok(ExecuteResult {
            output: stdout_lines.join("\n"),
            error_output: stderr_lines.join("\n"),
            exit_code,
        })
    }
}
