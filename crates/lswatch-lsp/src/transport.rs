//! Child process plumbing for stdio servers.
//!
//! The server's stderr is drained into the log under the `lswatch::server`
//! target; stdin and stdout are handed back for the rpc layer.

use crate::types::{LspError, LspServerConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A running server process. The process is killed when this is dropped.
pub struct StdioTransport {
    child: Child,
    config: LspServerConfig,
    stderr_task: Option<JoinHandle<()>>,
}

impl StdioTransport {
    /// Launch `config.command` with piped stdio.
    pub fn spawn(config: LspServerConfig) -> Result<(Self, ChildStdin, ChildStdout), LspError> {
        let program = Self::resolve_command(&config.command)?;
        info!(
            server = %config.server_name,
            program = %program.display(),
            "Spawning server"
        );

        let mut command = Command::new(&program);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_directory {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            LspError::ServerStartFailed(format!("{}: {e}", program.display()))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(LspError::ServerStartFailed(format!(
                "{}: stdio was not piped",
                config.server_name
            )));
        };
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(config.server_name.clone(), stderr)));

        debug!(server = %config.server_name, pid = ?child.id(), "Server process started");
        Ok((
            Self {
                child,
                config,
                stderr_task,
            },
            stdin,
            stdout,
        ))
    }

    /// An absolute path must exist; anything else is looked up on `PATH`.
    pub fn resolve_command(command: &str) -> Result<PathBuf, LspError> {
        let path = Path::new(command);
        let resolved = if path.is_absolute() {
            path.exists().then(|| path.to_path_buf())
        } else {
            which::which(command).ok()
        };
        resolved.ok_or_else(|| LspError::ExecutableNotFound(command.to_string()))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the process has not exited yet.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub async fn kill(&mut self) -> Result<(), LspError> {
        info!(server = %self.config.server_name, pid = ?self.child.id(), "Killing server");
        Ok(self.child.kill().await?)
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        debug!(server = %self.config.server_name, pid = ?self.child.id(), "Transport dropped");
    }
}

async fn forward_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "lswatch::server", server = %server, "{}", line);
    }
}
