//! Errors and launch settings shared by the transport, rpc and client layers.

use lswatch_config::BackendCommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum LspError {
    /// The peer closed its end, or the reader task ended.
    #[error("Server connection is closed")]
    ConnectionClosed,

    #[error("Failed to start server: {0}")]
    ServerStartFailed(String),

    /// No response within the configured timeout, in milliseconds.
    #[error("Request timed out after {0}ms")]
    RequestTimeout(u64),

    /// The server answered with an `error` object.
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpcError { code: i64, message: String },

    /// Bad `Content-Length` framing or an unparseable message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Path cannot be expressed as a file URI: {0}")]
    InvalidPath(String),

    /// Neither an existing absolute path nor a name found on `PATH`.
    #[error("Server executable not found: {0}")]
    ExecutableNotFound(String),

    /// The `initialize` request was rejected.
    #[error("Server initialization failed: {0}")]
    InitializationFailed(String),
}

/// Everything needed to launch one stdio server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspServerConfig {
    /// Label for log lines, e.g. `Rich` or `native-locator`.
    pub server_name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
    /// Defaults to the first workspace folder when a session starts.
    pub working_directory: Option<PathBuf>,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl LspServerConfig {
    pub fn new(server_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout_ms: default_request_timeout_ms(),
            working_directory: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Launch settings for a `[backends.*]` entry.
    pub fn from_backend(server_name: impl Into<String>, backend: &BackendCommand) -> Self {
        Self {
            args: backend.args.clone(),
            env: backend.env.clone(),
            timeout_ms: backend.timeout_ms,
            ..Self::new(server_name, backend.command.clone())
        }
    }
}

/// `file://` URI for `path`, resolved against the current directory.
pub fn path_to_uri(path: &Path) -> Result<Url, LspError> {
    let resolved = match path.is_absolute() {
        true => path.to_path_buf(),
        false => std::env::current_dir()?.join(path),
    };
    Url::from_file_path(&resolved).map_err(|()| LspError::InvalidPath(resolved.display().to_string()))
}
