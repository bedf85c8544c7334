//! Client for a single language server connection.
//!
//! `LspClient` owns the server process, performs the initialize handshake for
//! a set of workspace folders, and shuts the server down again. Everything
//! the server publishes afterwards is logged.

use crate::rpc::{Notification, RpcConnection};
use crate::transport::StdioTransport;
use crate::types::{path_to_uri, LspError, LspServerConfig};
use lsp_types::{
    ClientCapabilities, InitializeParams, InitializeResult, InitializedParams,
    ServerCapabilities, WindowClientCapabilities, WorkspaceClientCapabilities,
};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A running, initialized language server.
pub struct LspClient {
    config: LspServerConfig,
    transport: StdioTransport,
    rpc: RpcConnection,
    server_capabilities: ServerCapabilities,
    notification_task: JoinHandle<()>,
}

impl LspClient {
    /// Spawn the server and perform the initialization handshake.
    ///
    /// `folders` become the session's workspace folders; the first one is
    /// also sent as the root URI for servers that predate workspace folders.
    pub async fn start(
        config: LspServerConfig,
        folders: &[PathBuf],
        initialization_options: Value,
    ) -> Result<Self, LspError> {
        let workspace_folders = folders
            .iter()
            .map(|folder| {
                Ok(lsp_types::WorkspaceFolder {
                    uri: path_to_uri(folder)?,
                    name: folder
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| folder.display().to_string()),
                })
            })
            .collect::<Result<Vec<_>, LspError>>()?;

        info!(
            server = %config.server_name,
            folders = workspace_folders.len(),
            "Starting language server client"
        );

        let (transport, stdin, stdout) = StdioTransport::spawn(config.clone())?;
        let (rpc, notifications) =
            RpcConnection::new(stdout, stdin, Duration::from_millis(config.timeout_ms));
        let notification_task =
            tokio::spawn(log_notifications(config.server_name.clone(), notifications));

        #[allow(deprecated)]
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: workspace_folders.first().map(|folder| folder.uri.clone()),
            initialization_options: Some(initialization_options),
            capabilities: client_capabilities(),
            workspace_folders: Some(workspace_folders),
            client_info: Some(lsp_types::ClientInfo {
                name: "lswatch".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        };

        debug!("Sending initialize request");
        let result: InitializeResult = match rpc.request("initialize", params).await {
            Ok(result) => result,
            Err(e) => {
                notification_task.abort();
                return Err(LspError::InitializationFailed(e.to_string()));
            }
        };

        debug!("Sending initialized notification");
        rpc.notify("initialized", InitializedParams {}).await?;

        info!(
            server = %config.server_name,
            name = result.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
            "Language server initialized"
        );
        debug!(capabilities = ?result.capabilities, "Server capabilities");

        Ok(Self {
            config,
            transport,
            rpc,
            server_capabilities: result.capabilities,
            notification_task,
        })
    }

    /// Gracefully shut the server down, killing it if it lingers.
    pub async fn shutdown(mut self) -> Result<(), LspError> {
        info!(server = %self.config.server_name, "Shutting down language server");

        if let Err(e) = self.rpc.request::<_, ()>("shutdown", ()).await {
            warn!(error = %e, "Shutdown request failed");
        }

        if let Err(e) = self.rpc.notify("exit", ()).await {
            warn!(error = %e, "Exit notification failed");
        }

        self.rpc.close();
        self.notification_task.abort();

        if self.transport.is_running() {
            self.transport.kill().await?;
        }

        Ok(())
    }

    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.server_capabilities
    }

    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    pub fn pid(&self) -> Option<u32> {
        self.transport.pid()
    }

    /// Whether the server's output stream is still open.
    pub fn is_connected(&self) -> bool {
        self.rpc.is_open()
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        self.notification_task.abort();
    }
}

fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        workspace: Some(WorkspaceClientCapabilities {
            configuration: Some(true),
            workspace_folders: Some(true),
            ..Default::default()
        }),
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(false),
            show_message: None,
            show_document: None,
        }),
        ..Default::default()
    }
}

async fn log_notifications(server: String, mut notifications: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = notifications.recv().await {
        match notification.method.as_str() {
            "window/logMessage" | "window/showMessage" => {
                let message = notification
                    .params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                // MessageType: 1 = error, 2 = warning
                match notification.params.get("type").and_then(Value::as_i64) {
                    Some(1) => warn!(target: "lswatch::server", server = %server, "{}", message),
                    Some(2) => info!(target: "lswatch::server", server = %server, "{}", message),
                    _ => debug!(target: "lswatch::server", server = %server, "{}", message),
                }
            }
            method => trace!(server = %server, method, "Ignoring server notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_with_missing_executable() {
        let config = LspServerConfig::new("Rich", "definitely-not-a-real-server-12345");
        let result = LspClient::start(config, &[PathBuf::from("/work/app")], Value::Null).await;
        assert!(matches!(result, Err(LspError::ExecutableNotFound(_))));
    }

    #[test]
    fn test_client_capabilities_advertise_workspace_support() {
        let capabilities = client_capabilities();
        let workspace = capabilities.workspace.unwrap();
        assert_eq!(workspace.configuration, Some(true));
        assert_eq!(workspace.workspace_folders, Some(true));
    }
}
