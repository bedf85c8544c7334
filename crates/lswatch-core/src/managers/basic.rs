use super::{start_session, LanguageServerExtensionManager, Lifecycle, ManagerState};
use crate::environment::PythonEnvironment;
use crate::error::LanguageServerError;
use crate::host::ApplicationShell;
use crate::options::AnalysisOptions;
use crate::server::{ClientSession, LanguageServer, LanguageServerProxy, StartRequest};
use crate::telemetry::TelemetrySink;
use crate::workspace::WorkspaceIdentity;
use async_trait::async_trait;
use lswatch_config::BackendType;
use std::sync::Arc;
use tracing::debug;

/// Manager for the Basic backend. One instance serves one workspace folder.
pub struct BasicExtensionManager {
    proxy: Arc<dyn LanguageServerProxy>,
    shell: Arc<dyn ApplicationShell>,
    telemetry: Arc<dyn TelemetrySink>,
    options: Arc<AnalysisOptions>,
    session: Arc<ClientSession>,
    lifecycle: Lifecycle,
}

impl BasicExtensionManager {
    pub(crate) fn new(
        proxy: Arc<dyn LanguageServerProxy>,
        shell: Arc<dyn ApplicationShell>,
        telemetry: Arc<dyn TelemetrySink>,
        options: Arc<AnalysisOptions>,
    ) -> Self {
        Self {
            proxy,
            shell,
            telemetry,
            options,
            session: Arc::new(ClientSession::new()),
            lifecycle: Lifecycle::new(),
        }
    }
}

#[async_trait]
impl LanguageServerExtensionManager for BasicExtensionManager {
    fn backend_type(&self) -> BackendType {
        BackendType::Basic
    }

    fn state(&self) -> ManagerState {
        self.lifecycle.state()
    }

    fn can_start_language_server(&self) -> bool {
        true
    }

    async fn start_language_server(
        &self,
        workspace: &WorkspaceIdentity,
        interpreter: Option<&PythonEnvironment>,
    ) -> Result<(), LanguageServerError> {
        self.lifecycle.begin_start()?;

        let request = StartRequest {
            backend: BackendType::Basic,
            workspace: workspace.clone(),
            interpreter: interpreter.cloned(),
            options: self.options.basic(workspace, interpreter),
        };
        debug!(workspace = %workspace, "Starting Basic language server");

        start_session(
            &self.lifecycle,
            self.proxy.as_ref(),
            request,
            "0".to_string(),
            self.telemetry.as_ref(),
        )
        .await
    }

    async fn language_server_not_available(&self) {
        self.shell
            .show_warning_message("The Basic language server could not be started.");
    }

    fn stop_language_server(&self) {
        if self.lifecycle.stop() {
            self.proxy.stop();
        }
    }

    fn dispose(&self) {
        if self.lifecycle.dispose() {
            self.session.disconnect();
            self.proxy.dispose();
        }
    }

    fn get(&self) -> Arc<dyn LanguageServer> {
        self.session.clone()
    }
}
