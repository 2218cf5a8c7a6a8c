use crate::error::AppError;
use std::path::Path;
use std::process::Stdio as StdProcessStdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

#[cfg(windows)]
pub const LINE_TERMINATOR: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_TERMINATOR: &str = "\n";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Program and arguments used to start an interactive session shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    /// The shell for this host: `cmd.exe` on Windows, otherwise `default_shell` or `/bin/sh`.
    pub fn for_host(default_shell: Option<&str>) -> Self {
        if cfg!(windows) {
            ShellCommand {
                program: "cmd.exe".to_string(),
                args: vec!["/Q".to_string()],
            }
        } else {
            ShellCommand {
                program: default_shell.unwrap_or("/bin/sh").to_string(),
                args: Vec::new(),
            }
        }
    }
}

/// How a child process ended, as seen by [`wait_for_exit`].
#[derive(Debug)]
pub enum ExitReason {
    Exited(Option<i32>),
    Killed,
    WaitFailed(std::io::Error),
}

/// A spawned child with its standard streams split out so each can be owned separately.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ProcessHandle {
    /// Starts `shell` in `working_dir` with all three streams piped.
    pub fn spawn_shell(shell: &ShellCommand, working_dir: &Path) -> Result<Self, AppError> {
        let mut command = TokioCommand::new(&shell.program);
        command.args(&shell.args);
        command.stdin(StdProcessStdio::piped());
        Self::spawn(command, &shell.program, working_dir)
    }

    /// Starts `program` directly, no shell, with stdin closed.
    pub fn spawn_program(program: &str, args: &[String], working_dir: &Path) -> Result<Self, AppError> {
        let mut command = TokioCommand::new(program);
        command.args(args);
        command.stdin(StdProcessStdio::null());
        Self::spawn(command, program, working_dir)
    }

    fn spawn(mut command: TokioCommand, program: &str, working_dir: &Path) -> Result<Self, AppError> {
        command.current_dir(working_dir);
        command.stdout(StdProcessStdio::piped());
        command.stderr(StdProcessStdio::piped());
        command.kill_on_drop(true);
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        debug!(program = %program, cwd = %working_dir.display(), "Spawning process");
        let mut child = command.spawn().map_err(|e| {
            error!(error = %e, program = %program, "Failed to spawn process");
            AppError::ProcessSpawnFailure(format!("'{}': {}", program, e))
        })?;

        Ok(Self {
            pid: child.id(),
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
        })
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Kills the child and reaps it, closing any streams still held here.
    pub async fn terminate(mut self) {
        self.stdin.take();
        if let Err(e) = self.child.kill().await {
            warn!(pid = ?self.pid, error = %e, "Failed to kill process");
        }
    }

    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    pub fn into_child(self) -> Child {
        self.child
    }
}

/// Reads a child output stream one line at a time, without the trailing `\n` or `\r\n`.
/// Bytes that are not valid UTF-8 are replaced rather than ending the stream.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            inner: BufReader::new(stream),
            buf: Vec::new(),
        }
    }

    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

/// Waits for `child` to exit on its own, or kills it once `kill` fires (or its sender is dropped).
pub async fn wait_for_exit(mut child: Child, kill: oneshot::Receiver<()>) -> ExitReason {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ExitReason::Exited(status.code()),
            Err(e) => ExitReason::WaitFailed(e),
        },
        _ = kill => {
            if let Err(e) = child.start_kill() {
                warn!(pid = ?child.id(), error = %e, "Failed to send kill signal");
            }
            match child.wait().await {
                Ok(_) => ExitReason::Killed,
                Err(e) => ExitReason::WaitFailed(e),
            }
        }
    }
}
