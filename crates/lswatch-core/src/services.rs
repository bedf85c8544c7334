use crate::host::{
    ApplicationShell, CommandManager, ConfigurationService, ExtensionRegistry, InterpreterService,
    WorkspaceService,
};
use crate::integration::NotebookIntegration;
use crate::server::ProxyFactory;
use crate::telemetry::TelemetrySink;
use std::sync::Arc;

/// Host capabilities, injected once when the watcher is built.
#[derive(Clone)]
pub struct Services {
    pub configuration: Arc<dyn ConfigurationService>,
    pub extensions: Arc<dyn ExtensionRegistry>,
    pub workspace: Arc<dyn WorkspaceService>,
    pub interpreters: Arc<dyn InterpreterService>,
    pub shell: Arc<dyn ApplicationShell>,
    pub commands: Arc<dyn CommandManager>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub proxies: Arc<dyn ProxyFactory>,
    pub integration: Arc<NotebookIntegration>,
}
