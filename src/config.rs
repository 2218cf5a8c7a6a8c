use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::path_utils::RootResolver;

const DEFAULT_BLOCKED_COMMANDS: &str =
    "sudo,su,mkfs,fdisk,dd,reboot,shutdown,poweroff,halt,format,mount,umount,passwd,adduser,useradd,usermod,groupadd";

#[derive(Debug, Clone)]
pub struct Config {
    pub files_root: PathBuf,
    pub blocked_commands: Vec<Regex>,
    pub default_shell: Option<String>,
    pub log_level: String,
    pub audit_log_file: PathBuf,
    pub audit_log_max_size_bytes: u64,
    pub exit_drain_timeout: Duration,
    pub kill_timeout: Duration,
}

/// Serializable snapshot of [`Config`] returned by the `get_config` tool.
#[derive(Debug, Serialize)]
pub struct ConfigView {
    pub files_root: String,
    pub blocked_commands: Vec<String>,
    pub default_shell: Option<String>,
    pub log_level: String,
    pub audit_log_file: String,
    pub audit_log_max_size_bytes: u64,
    pub exit_drain_timeout_ms: u128,
    pub kill_timeout_ms: u128,
}

/// Expands `~` and `$VAR` references; an unset variable is an error.
fn expand_path(path_str: &str) -> Result<PathBuf> {
    shellexpand::full(path_str)
        .map(|cow| PathBuf::from(cow.as_ref()))
        .map_err(|e| anyhow::anyhow!("Failed to expand path '{}': {}", path_str, e))
}

/// Each entry matches when it is the program word, possibly preceded by `VAR=value` assignments.
pub fn compile_blocked_commands(list: &str) -> Result<Vec<Regex>> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            Regex::new(&format!(
                r"^(?:[a-zA-Z_][a-zA-Z0-9_]*=[^ ]* )*{}(?:\s.*|$)",
                regex::escape(s)
            ))
            .context(format!("Invalid regex for blocked command: {}", s))
        })
        .collect()
}

fn env_millis(key: &str, default_ms: u64) -> Result<Duration> {
    let ms = std::env::var(key)
        .unwrap_or_else(|_| default_ms.to_string())
        .parse::<u64>()
        .context(format!("Invalid {}", key))?;
    Ok(Duration::from_millis(ms))
}

impl Config {
    /// Builds a configuration rooted at `files_root` with every other setting at its default.
    pub fn new(files_root: impl Into<PathBuf>) -> Self {
        let files_root = files_root.into();
        let audit_log_file = files_root.join(".session-logs").join("tool_calls.log");
        Self {
            blocked_commands: compile_blocked_commands(DEFAULT_BLOCKED_COMMANDS).unwrap_or_default(),
            default_shell: None,
            log_level: "info".to_string(),
            audit_log_file,
            audit_log_max_size_bytes: 10 * 1024 * 1024,
            exit_drain_timeout: Duration::from_millis(500),
            kill_timeout: Duration::from_millis(2000),
            files_root,
        }
    }

    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let files_root_str = std::env::var("FILES_ROOT")
            .context("FILES_ROOT environment variable must be set")?;
        let files_root = dunce::canonicalize(expand_path(&files_root_str)?)
            .context(format!("Failed to canonicalize FILES_ROOT: {}", files_root_str))?;
        if !files_root.is_dir() {
            anyhow::bail!("FILES_ROOT is not a valid directory: {:?}", files_root);
        }

        let blocked_commands_str = std::env::var("BLOCKED_COMMANDS")
            .unwrap_or_else(|_| DEFAULT_BLOCKED_COMMANDS.to_string());
        let blocked_commands = compile_blocked_commands(&blocked_commands_str)?;

        let default_shell = std::env::var("DEFAULT_SHELL").ok().filter(|s| !s.is_empty());

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_dir_base = std::env::var("AUDIT_LOG_DIR")
            .ok()
            .and_then(|s| expand_path(&s).ok())
            .unwrap_or_else(|| files_root.join(".session-logs"));
        let audit_log_file = log_dir_base.join("tool_calls.log");
        let audit_log_max_size_bytes = std::env::var("AUDIT_LOG_MAX_SIZE_MB")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or(10 * 1024 * 1024);

        let exit_drain_timeout = env_millis("EXIT_DRAIN_TIMEOUT_MS", 500)?;
        let kill_timeout = env_millis("KILL_TIMEOUT_MS", 2000)?;

        Ok(Config {
            files_root,
            blocked_commands,
            default_shell,
            log_level,
            audit_log_file,
            audit_log_max_size_bytes,
            exit_drain_timeout,
            kill_timeout,
        })
    }

    pub fn with_blocked_commands(mut self, list: &str) -> Result<Self> {
        self.blocked_commands = compile_blocked_commands(list)?;
        Ok(self)
    }

    /// True when the program word of `command` matches a blocked pattern.
    pub fn is_command_blocked(&self, command: &str) -> bool {
        let effective_command = command
            .trim_start()
            .split_whitespace()
            .find(|s| !s.contains('=')) // Skip leading VAR=val assignments
            .unwrap_or("");

        self.blocked_commands
            .iter()
            .any(|regex| regex.is_match(effective_command))
    }

    pub fn view(&self) -> ConfigView {
        ConfigView {
            files_root: self.files_root.display().to_string(),
            blocked_commands: self.blocked_commands.iter().map(|r| r.as_str().to_string()).collect(),
            default_shell: self.default_shell.clone(),
            log_level: self.log_level.clone(),
            audit_log_file: self.audit_log_file.display().to_string(),
            audit_log_max_size_bytes: self.audit_log_max_size_bytes,
            exit_drain_timeout_ms: self.exit_drain_timeout.as_millis(),
            kill_timeout_ms: self.kill_timeout.as_millis(),
        }
    }
}

impl RootResolver for Config {
    fn resolve_root(&self) -> PathBuf {
        self.files_root.clone()
    }
}
