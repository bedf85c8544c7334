//! Stdio-backed implementation of the core proxy traits.

use crate::client::LspClient;
use crate::types::LspServerConfig;
use async_trait::async_trait;
use lswatch_config::Config;
use lswatch_core::{
    BackendType, LanguageServerError, LanguageServerProxy, ProxyFactory, StartRequest,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Runs one backend session as a child process speaking LSP over stdio.
pub struct StdioLanguageServerProxy {
    config: LspServerConfig,
    client: Mutex<Option<LspClient>>,
    disposed: AtomicBool,
}

impl StdioLanguageServerProxy {
    pub fn new(config: LspServerConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(LspClient::is_connected)
    }

    fn take_client(&self) -> Option<LspClient> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[async_trait]
impl LanguageServerProxy for StdioLanguageServerProxy {
    async fn start(&self, request: StartRequest) -> Result<(), LanguageServerError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(LanguageServerError::Cancelled);
        }

        let mut folders: Vec<PathBuf> = request
            .options
            .workspace_folders
            .iter()
            .map(|folder| folder.path.clone())
            .collect();
        if folders.is_empty() {
            folders.extend(request.workspace.path().map(PathBuf::from));
        }

        let mut config = self.config.clone();
        if config.working_directory.is_none() {
            config.working_directory = folders.first().cloned();
        }

        let client = LspClient::start(config, &folders, request.options.initialization_options)
            .await
            .map_err(|e| LanguageServerError::start_failed(request.backend, e))?;

        debug!(
            backend = %request.backend,
            workspace = %request.workspace,
            pid = ?client.pid(),
            "Backend session established"
        );

        let previous = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(client);
        if let Some(previous) = previous {
            shutdown_in_background(previous);
        }

        // Disposed while the handshake was in flight.
        if self.disposed.load(Ordering::SeqCst) {
            if let Some(client) = self.take_client() {
                shutdown_in_background(client);
            }
            return Err(LanguageServerError::Cancelled);
        }

        Ok(())
    }

    fn stop(&self) {
        if let Some(client) = self.take_client() {
            shutdown_in_background(client);
        }
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.stop();
    }
}

fn shutdown_in_background(client: LspClient) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                let name = client.server_name().to_string();
                if let Err(e) = client.shutdown().await {
                    warn!(server = %name, error = %e, "Failed to shut down language server");
                }
            });
        }
        // No runtime left; dropping the client kills the process.
        Err(_) => drop(client),
    }
}

/// Proxy for a backend that has no process.
struct InertProxy;

#[async_trait]
impl LanguageServerProxy for InertProxy {
    async fn start(&self, _request: StartRequest) -> Result<(), LanguageServerError> {
        Ok(())
    }

    fn stop(&self) {}

    fn dispose(&self) {}
}

/// Creates stdio proxies from the configured backend commands.
#[derive(Debug, Clone)]
pub struct StdioProxyFactory {
    rich: LspServerConfig,
    basic: LspServerConfig,
}

impl StdioProxyFactory {
    pub fn new(rich: LspServerConfig, basic: LspServerConfig) -> Self {
        Self { rich, basic }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            LspServerConfig::from_backend(BackendType::Rich.as_str(), &config.backends.rich),
            LspServerConfig::from_backend(BackendType::Basic.as_str(), &config.backends.basic),
        )
    }
}

impl ProxyFactory for StdioProxyFactory {
    fn create(&self, backend: BackendType) -> Arc<dyn LanguageServerProxy> {
        match backend {
            BackendType::Rich => Arc::new(StdioLanguageServerProxy::new(self.rich.clone())),
            BackendType::Basic => Arc::new(StdioLanguageServerProxy::new(self.basic.clone())),
            BackendType::Disabled => Arc::new(InertProxy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lswatch_core::{LanguageClientOptions, WorkspaceFolder, WorkspaceIdentity};
    use serde_json::json;

    fn request(backend: BackendType) -> StartRequest {
        StartRequest {
            backend,
            workspace: WorkspaceIdentity::from_folder("/work/app"),
            interpreter: None,
            options: LanguageClientOptions {
                initialization_options: json!({}),
                document_selector: Vec::new(),
                workspace_folders: vec![WorkspaceFolder::new("/work/app")],
            },
        }
    }

    #[tokio::test]
    async fn test_missing_executable_fails_start() {
        let proxy = StdioLanguageServerProxy::new(LspServerConfig::new(
            "Basic",
            "definitely-not-a-real-server-12345",
        ));

        let result = proxy.start(request(BackendType::Basic)).await;
        match result {
            Err(LanguageServerError::StartFailed { backend, message }) => {
                assert_eq!(backend, BackendType::Basic);
                assert!(message.contains("definitely-not-a-real-server-12345"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!proxy.is_running());
    }

    #[tokio::test]
    async fn test_start_after_dispose_is_cancelled() {
        let proxy = StdioLanguageServerProxy::new(LspServerConfig::new("Rich", "sh"));
        proxy.dispose();
        let result = proxy.start(request(BackendType::Rich)).await;
        assert!(matches!(result, Err(LanguageServerError::Cancelled)));
    }

    #[test]
    fn test_stop_and_dispose_without_start() {
        let proxy = StdioLanguageServerProxy::new(LspServerConfig::new("Rich", "sh"));
        proxy.stop();
        proxy.dispose();
        proxy.dispose();
        assert!(!proxy.is_running());
    }

    #[tokio::test]
    async fn test_factory_uses_configured_commands() {
        let config = Config::default();
        let factory = StdioProxyFactory::from_config(&config);
        assert_eq!(factory.rich.server_name, "Rich");
        assert_eq!(factory.rich.command, config.backends.rich.command);
        assert_eq!(factory.basic.command, config.backends.basic.command);

        let inert = factory.create(BackendType::Disabled);
        assert!(inert.start(request(BackendType::Disabled)).await.is_ok());
        inert.dispose();
    }
}
