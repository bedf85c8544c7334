use super::{LanguageServerExtensionManager, Lifecycle, ManagerState};
use crate::environment::PythonEnvironment;
use crate::error::LanguageServerError;
use crate::server::LanguageServer;
use crate::workspace::WorkspaceIdentity;
use async_trait::async_trait;
use lswatch_config::BackendType;
use std::sync::Arc;
use tracing::debug;

/// Handle with no session behind it.
#[derive(Debug, Default)]
pub struct InertLanguageServer;

impl LanguageServer for InertLanguageServer {
    fn connect(&self) {}

    fn disconnect(&self) {}

    fn is_connected(&self) -> bool {
        false
    }
}

/// Manager used when language features are turned off.
pub struct DisabledExtensionManager {
    lifecycle: Lifecycle,
    server: Arc<InertLanguageServer>,
}

impl DisabledExtensionManager {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            server: Arc::new(InertLanguageServer),
        }
    }
}

impl Default for DisabledExtensionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageServerExtensionManager for DisabledExtensionManager {
    fn backend_type(&self) -> BackendType {
        BackendType::Disabled
    }

    fn state(&self) -> ManagerState {
        self.lifecycle.state()
    }

    fn can_start_language_server(&self) -> bool {
        true
    }

    async fn start_language_server(
        &self,
        _workspace: &WorkspaceIdentity,
        _interpreter: Option<&PythonEnvironment>,
    ) -> Result<(), LanguageServerError> {
        self.lifecycle.begin_start()?;
        self.lifecycle.mark_started();
        Ok(())
    }

    async fn language_server_not_available(&self) {
        debug!("Disabled language server is always available");
    }

    fn stop_language_server(&self) {
        self.lifecycle.stop();
    }

    fn dispose(&self) {
        self.lifecycle.dispose();
    }

    fn get(&self) -> Arc<dyn LanguageServer> {
        self.server.clone()
    }
}
