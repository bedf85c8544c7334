use super::{start_session, LanguageServerExtensionManager, Lifecycle, ManagerState};
use crate::environment::PythonEnvironment;
use crate::error::LanguageServerError;
use crate::experiment::NotebookExperiment;
use crate::gate::{self, RICH_COMPANION_ID};
use crate::host::{ApplicationShell, ExtensionRegistry};
use crate::integration::NotebookIntegration;
use crate::options::AnalysisOptions;
use crate::poll::{poll_until, PollPolicy};
use crate::server::{ClientSession, LanguageServer, LanguageServerProxy, StartRequest};
use crate::telemetry::TelemetrySink;
use crate::workspace::WorkspaceIdentity;
use async_trait::async_trait;
use lswatch_config::BackendType;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const NOT_INSTALLED_MESSAGE: &str = "The Rich language server is selected but its extension \
     (ms-python.vscode-pylance) is not installed. Language features are unavailable.";

/// Manager for the Rich backend, shipped by the rich companion extension.
pub struct RichExtensionManager {
    proxy: Arc<dyn LanguageServerProxy>,
    extensions: Arc<dyn ExtensionRegistry>,
    shell: Arc<dyn ApplicationShell>,
    telemetry: Arc<dyn TelemetrySink>,
    experiment: Arc<NotebookExperiment>,
    integration: Arc<NotebookIntegration>,
    options: Arc<AnalysisOptions>,
    poll: PollPolicy,
    session: Arc<ClientSession>,
    lifecycle: Lifecycle,
    ls_version: Mutex<Option<String>>,
}

impl RichExtensionManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        proxy: Arc<dyn LanguageServerProxy>,
        extensions: Arc<dyn ExtensionRegistry>,
        shell: Arc<dyn ApplicationShell>,
        telemetry: Arc<dyn TelemetrySink>,
        experiment: Arc<NotebookExperiment>,
        integration: Arc<NotebookIntegration>,
        options: Arc<AnalysisOptions>,
        poll: PollPolicy,
    ) -> Self {
        Self {
            proxy,
            extensions,
            shell,
            telemetry,
            experiment,
            integration,
            options,
            poll,
            session: Arc::new(ClientSession::new()),
            lifecycle: Lifecycle::new(),
            ls_version: Mutex::new(None),
        }
    }

    /// Version of the rich companion the backend was started from.
    pub fn ls_version(&self) -> Option<String> {
        self.ls_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn register_python_path_function(&self) {
        if let Some(function) = self.integration.python_path_function() {
            self.session.register_python_path_function(function);
            return;
        }

        // The notebook companion registers its hook after activating.
        if !self.experiment.is_active()
            || !gate::is_notebook_companion_installed(self.extensions.as_ref())
        {
            return;
        }

        let integration = Arc::clone(&self.integration);
        let registered = tokio::select! {
            _ = self.lifecycle.cancellation().cancelled() => false,
            registered = poll_until(self.poll, || integration.python_path_function().is_some()) => registered,
        };

        match self.integration.python_path_function() {
            Some(function) if registered => self.session.register_python_path_function(function),
            _ => debug!("Notebook companion has not registered a python path function"),
        }
    }
}

#[async_trait]
impl LanguageServerExtensionManager for RichExtensionManager {
    fn backend_type(&self) -> BackendType {
        BackendType::Rich
    }

    fn state(&self) -> ManagerState {
        self.lifecycle.state()
    }

    fn can_start_language_server(&self) -> bool {
        gate::is_rich_companion_installed(self.extensions.as_ref())
    }

    async fn start_language_server(
        &self,
        workspace: &WorkspaceIdentity,
        interpreter: Option<&PythonEnvironment>,
    ) -> Result<(), LanguageServerError> {
        self.lifecycle.begin_start()?;

        let ls_version = self
            .extensions
            .extension(RICH_COMPANION_ID)
            .and_then(|info| info.version)
            .unwrap_or_else(|| "0".to_string());
        *self.ls_version.lock().unwrap_or_else(PoisonError::into_inner) = Some(ls_version.clone());

        self.register_python_path_function().await;

        let notebooks = self.experiment.is_active();
        let request = StartRequest {
            backend: BackendType::Rich,
            workspace: workspace.clone(),
            interpreter: interpreter.cloned(),
            options: self.options.rich(interpreter, notebooks),
        };
        debug!(ls_version = %ls_version, notebooks, "Starting Rich language server");

        start_session(
            &self.lifecycle,
            self.proxy.as_ref(),
            request,
            ls_version,
            self.telemetry.as_ref(),
        )
        .await
    }

    async fn language_server_not_available(&self) {
        info!("Rich language server is not installed, language features are inactive");
        self.shell.show_warning_message(NOT_INSTALLED_MESSAGE);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::NotebookExperiment;
    use crate::gate::NOTEBOOK_COMPANION_ID;
    use crate::managers::ManagerFactory;
    use crate::telemetry::TelemetryEvent;
    use crate::testing::{settings, settle, TestHost};
    use std::path::{Path, PathBuf};

    fn rich_host() -> TestHost {
        let host = TestHost::new(settings(BackendType::Rich), &["/work"]);
        host.extensions.install(RICH_COMPANION_ID, Some("2023.1.10"));
        host
    }

    fn rich_manager(host: &TestHost) -> Arc<dyn LanguageServerExtensionManager> {
        let services = host.services();
        let experiment = NotebookExperiment::new(&services);
        ManagerFactory::new(&services, experiment).create(BackendType::Rich)
    }

    #[tokio::test]
    async fn test_start_then_stop_and_dispose_once() {
        let host = rich_host();
        let manager = rich_manager(&host);
        let workspace = WorkspaceIdentity::from_folder("/work");

        assert!(manager.can_start_language_server());
        manager.start_language_server(&workspace, None).await.unwrap();
        assert_eq!(manager.state(), ManagerState::Started);

        manager.stop_language_server();
        manager.stop_language_server();
        manager.dispose();
        manager.dispose();

        let proxy = host.proxies.proxy(0);
        assert_eq!(proxy.starts(), 1);
        assert_eq!(proxy.stops(), 1);
        assert_eq!(proxy.disposes(), 1);
        assert_eq!(manager.state(), ManagerState::Disposed);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let host = rich_host();
        let manager = rich_manager(&host);
        let workspace = WorkspaceIdentity::Default;

        manager.start_language_server(&workspace, None).await.unwrap();
        let err = manager.start_language_server(&workspace, None).await.unwrap_err();
        assert!(matches!(err, LanguageServerError::AlreadyStarted));
        assert_eq!(host.proxies.proxy(0).starts(), 1);
    }

    #[tokio::test]
    async fn test_startup_telemetry_uses_companion_version() {
        let host = TestHost::new(settings(BackendType::Rich), &["/work"]);
        host.extensions.install(RICH_COMPANION_ID, None);
        let manager = rich_manager(&host);

        manager
            .start_language_server(&WorkspaceIdentity::Default, None)
            .await
            .unwrap();

        match host.telemetry.events().as_slice() {
            [TelemetryEvent::LanguageServerStartup {
                backend,
                ls_version,
                failed,
                ..
            }] => {
                assert_eq!(*backend, BackendType::Rich);
                assert_eq!(ls_version, "0");
                assert!(!failed);
            }
            events => panic!("unexpected telemetry: {events:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_start_reports_failure() {
        let host = rich_host();
        host.proxies.set_fail_starts(true);
        let manager = rich_manager(&host);

        let err = manager
            .start_language_server(&WorkspaceIdentity::Default, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LanguageServerError::StartFailed { .. }));
        assert_eq!(manager.state(), ManagerState::Created);
        assert!(matches!(
            host.telemetry.events().as_slice(),
            [TelemetryEvent::LanguageServerStartup { failed: true, .. }]
        ));
    }

    #[tokio::test]
    async fn test_dispose_cancels_pending_start() {
        let host = rich_host();
        host.proxies.set_hang_starts(true);
        let manager = rich_manager(&host);

        let pending = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .start_language_server(&WorkspaceIdentity::Default, None)
                    .await
            })
        };
        settle().await;
        manager.dispose();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(LanguageServerError::Cancelled)));
        assert_eq!(manager.state(), ManagerState::Disposed);
    }

    #[tokio::test]
    async fn test_not_available_warns() {
        let host = TestHost::new(settings(BackendType::Rich), &["/work"]);
        let manager = rich_manager(&host);

        assert!(!manager.can_start_language_server());
        manager.language_server_not_available().await;
        assert_eq!(host.shell.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_registers_notebook_python_path_hook() {
        let mut settings = settings(BackendType::Rich);
        settings.lsp_notebooks_enabled = true;
        let host = TestHost::new(settings, &["/work"]);
        host.extensions.install(RICH_COMPANION_ID, Some("2023.1.10"));
        host.extensions.install(NOTEBOOK_COMPANION_ID, Some("2023.1.0"));
        host.integration
            .register_python_path_function(Arc::new(|_| Some(PathBuf::from("/env/bin/python"))));

        let services = host.services();
        let experiment = NotebookExperiment::new(&services);
        experiment.activate();
        let manager = ManagerFactory::new(&services, experiment).create(BackendType::Rich);
        manager
            .start_language_server(&WorkspaceIdentity::Default, None)
            .await
            .unwrap();

        let server = manager.get();
        assert_eq!(
            server.resolve_notebook_interpreter(Path::new("/work/a.ipynb")),
            Some(PathBuf::from("/env/bin/python"))
        );
        let request = host.proxies.proxy(0).last_request().unwrap();
        assert_eq!(request.options.initialization_options["lspNotebooksSupport"], true);
    }
}
