//! Probe that runs an external discovery server over stdio JSON-RPC.
//!
//! The server is sent a `configure` request followed by `refresh`. While the
//! refresh runs it publishes `environment` and `manager` notifications; the
//! refresh response marks the end of the search.

use crate::error::DiscoveryError;
use crate::finder::{FinderEvent, NativeEnvInfo, NativeEnvManagerInfo, PythonFinder};
use async_trait::async_trait;
use lswatch_config::DiscoveryConfig;
use lswatch_lsp::{LspError, LspServerConfig, Notification, RpcConnection, StdioTransport};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A full refresh can walk large directory trees.
const REFRESH_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureParams {
    pub workspace_directories: Vec<PathBuf>,
    pub environment_directories: Vec<PathBuf>,
}

pub struct ProcessFinder {
    server: LspServerConfig,
    params: ConfigureParams,
}

impl ProcessFinder {
    pub fn new(server: LspServerConfig, params: ConfigureParams) -> Self {
        Self { server, params }
    }

    /// Probe configured by `[discovery]`, searching `workspace_directories`.
    pub fn from_config(
        config: &DiscoveryConfig,
        workspace_directories: Vec<PathBuf>,
    ) -> Result<Self, DiscoveryError> {
        if !config.enabled {
            return Err(DiscoveryError::Disabled);
        }
        let server = LspServerConfig::new("native-locator", config.probe.clone())
            .with_args(config.args.clone())
            .with_timeout(REFRESH_TIMEOUT_MS);
        Ok(Self::new(
            server,
            ConfigureParams {
                workspace_directories,
                environment_directories: config.environment_directories.clone(),
            },
        ))
    }
}

#[async_trait]
impl PythonFinder for ProcessFinder {
    async fn search(
        &self,
        events: mpsc::UnboundedSender<FinderEvent>,
    ) -> Result<(), DiscoveryError> {
        let (mut transport, stdin, stdout) = StdioTransport::spawn(self.server.clone())?;
        let (rpc, notifications) = RpcConnection::new(
            stdout,
            stdin,
            Duration::from_millis(self.server.timeout_ms),
        );

        let result = run_search(rpc, notifications, &self.params, events).await;

        if transport.is_running() {
            if let Err(e) = transport.kill().await {
                warn!(error = %e, "Failed to stop discovery probe");
            }
        }
        result
    }
}

/// Drive one configure/refresh exchange and forward what the probe reports.
pub async fn run_search(
    rpc: RpcConnection,
    notifications: mpsc::UnboundedReceiver<Notification>,
    params: &ConfigureParams,
    events: mpsc::UnboundedSender<FinderEvent>,
) -> Result<(), DiscoveryError> {
    let forwarder = tokio::spawn(forward(notifications, events));

    let result = refresh(&rpc, params).await;

    // Dropping the connection stops its reader; the forwarder then drains
    // what was already received and exits.
    drop(rpc);
    if let Err(e) = forwarder.await {
        debug!(error = %e, "Discovery forwarder did not finish");
    }
    result
}

async fn refresh(rpc: &RpcConnection, params: &ConfigureParams) -> Result<(), DiscoveryError> {
    match rpc.request::<_, Value>("configure", params).await {
        Ok(_) => {}
        Err(LspError::JsonRpcError { message, .. }) => {
            return Err(DiscoveryError::Configure(message))
        }
        Err(e) => return Err(e.into()),
    }

    let summary: Value = rpc.request("refresh", Value::Null).await?;
    info!(summary = %summary, "Discovery probe finished refreshing");
    Ok(())
}

async fn forward(
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    events: mpsc::UnboundedSender<FinderEvent>,
) {
    while let Some(notification) = notifications.recv().await {
        let event = match notification.method.as_str() {
            "environment" => serde_json::from_value::<NativeEnvInfo>(notification.params)
                .map(FinderEvent::Environment),
            "manager" => serde_json::from_value::<NativeEnvManagerInfo>(notification.params)
                .map(FinderEvent::Manager),
            "log" => {
                log_probe_message(&notification.params);
                continue;
            }
            method => {
                debug!(method, "Ignoring discovery notification");
                continue;
            }
        };

        match event {
            Ok(event) => {
                if events.send(event).is_err() {
                    debug!("Discovery consumer went away");
                    return;
                }
            }
            Err(e) => error!(method = %notification.method, error = %e, "Invalid discovery notification"),
        }
    }
}

fn log_probe_message(params: &Value) {
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match params.get("level").and_then(Value::as_str) {
        Some("error") => error!(target: "lswatch::probe", "{}", message),
        Some("warning") => warn!(target: "lswatch::probe", "{}", message),
        Some("info") => info!(target: "lswatch::probe", "{}", message),
        _ => debug!(target: "lswatch::probe", "{}", message),
    }
}
