//! The LSP notebooks experiment flag.
//!
//! The experiment is on only when the user opted in and both companion
//! extensions are installed at supporting versions. Once on, it stays on
//! until the process exits. The first Off -> On transition asks the bound
//! [`LanguageServerRestarter`] to restart the running backends so they pick
//! up notebook support.

use crate::gate;
use crate::host::{ConfigurationService, ExtensionRegistry};
use crate::integration::NotebookIntegration;
use crate::poll::{poll_until, PollPolicy};
use crate::services::Services;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentState {
    Undetermined,
    Off,
    On,
}

/// Receives the request to restart every running backend.
pub trait LanguageServerRestarter: Send + Sync {
    fn restart_language_servers(&self);
}

pub struct NotebookExperiment {
    configuration: Arc<dyn ConfigurationService>,
    extensions: Arc<dyn ExtensionRegistry>,
    integration: Arc<NotebookIntegration>,
    telemetry: Arc<dyn TelemetrySink>,
    poll: PollPolicy,
    state: Mutex<ExperimentState>,
    notebook_companion_installed: AtomicBool,
    telemetry_sent: AtomicBool,
    restarter: OnceLock<Weak<dyn LanguageServerRestarter>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl NotebookExperiment {
    /// Create the experiment. Must be called from within a tokio runtime.
    pub fn new(services: &Services) -> Arc<Self> {
        Self::with_poll_policy(services, PollPolicy::default())
    }

    pub fn with_poll_policy(services: &Services, poll: PollPolicy) -> Arc<Self> {
        let experiment = Arc::new(Self {
            configuration: Arc::clone(&services.configuration),
            extensions: Arc::clone(&services.extensions),
            integration: Arc::clone(&services.integration),
            telemetry: Arc::clone(&services.telemetry),
            poll,
            state: Mutex::new(ExperimentState::Undetermined),
            notebook_companion_installed: AtomicBool::new(gate::is_notebook_companion_installed(
                services.extensions.as_ref(),
            )),
            telemetry_sent: AtomicBool::new(false),
            restarter: OnceLock::new(),
            listener: Mutex::new(None),
        });

        if !gate::is_rich_companion_installed(experiment.extensions.as_ref()) {
            experiment.listen_for_rich_companion();
        }
        experiment
    }

    /// Bind the component restarted on an Off -> On transition.
    pub fn bind_restarter(&self, restarter: Weak<dyn LanguageServerRestarter>) {
        if self.restarter.set(restarter).is_err() {
            warn!("Notebook experiment restarter already bound");
        }
    }

    /// Evaluate the experiment for the first time.
    pub fn activate(&self) {
        self.update_experiment_support();
    }

    pub fn state(&self) -> ExperimentState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.state() == ExperimentState::On
    }

    /// Called by the host once the notebook companion has been installed.
    ///
    /// Waits a bounded time for the companion to register its python path
    /// hook, then re-evaluates. Later calls are no-ops.
    pub async fn on_notebook_companion_installed(&self) {
        if self.notebook_companion_installed.load(Ordering::SeqCst) {
            return;
        }

        if gate::notebook_companion_supports_experiment(self.extensions.as_ref()) {
            let integration = Arc::clone(&self.integration);
            let registered =
                poll_until(self.poll, || integration.python_path_function().is_some()).await;
            if !registered {
                debug!("Notebook companion did not register a python path function in time");
            }
            self.update_experiment_support();
        }

        self.notebook_companion_installed.store(true, Ordering::SeqCst);
    }

    /// Stop listening for extension changes.
    pub fn dispose(&self) {
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }

    fn listen_for_rich_companion(self: &Arc<Self>) {
        let mut changes = self.extensions.subscribe();
        let experiment = Arc::downgrade(self);

        let listener = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return,
                }
                let Some(experiment) = experiment.upgrade() else {
                    return;
                };
                if gate::is_rich_companion_installed(experiment.extensions.as_ref()) {
                    debug!("Rich companion installed, re-evaluating notebook experiment");
                    experiment.update_experiment_support();
                    return;
                }
            }
        });

        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn evaluate(&self) -> ExperimentState {
        let extensions = self.extensions.as_ref();

        if !self.configuration.settings(None).lsp_notebooks_enabled {
            info!("LSP Notebooks experiment is disabled -- not in treatment group");
        } else if !gate::is_notebook_companion_installed(extensions) {
            info!("LSP Notebooks experiment is disabled -- notebook companion disabled or not installed");
        } else if !gate::notebook_companion_supports_experiment(extensions) {
            info!("LSP Notebooks experiment is disabled -- notebook companion does not support experiment");
        } else if !gate::is_rich_companion_installed(extensions) {
            info!("LSP Notebooks experiment is disabled -- rich companion disabled or not installed");
        } else if !gate::rich_companion_supports_experiment(extensions) {
            info!("LSP Notebooks experiment is disabled -- rich companion does not support experiment");
        } else {
            info!("LSP Notebooks experiment is enabled");
            return ExperimentState::On;
        }
        ExperimentState::Off
    }

    fn update_experiment_support(&self) {
        let evaluated = self.evaluate();

        let (previous, next) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = *state;
            // On is sticky for the lifetime of the process.
            let next = if previous == ExperimentState::On {
                if evaluated != ExperimentState::On {
                    debug!("LSP Notebooks experiment stays enabled until reload");
                }
                ExperimentState::On
            } else {
                evaluated
            };
            *state = next;
            (previous, next)
        };

        if next == ExperimentState::On && !self.telemetry_sent.swap(true, Ordering::SeqCst) {
            self.telemetry.send(TelemetryEvent::NotebookExperimentEnabled);
        }

        if previous == ExperimentState::Off && next == ExperimentState::On {
            match self.restarter.get().and_then(Weak::upgrade) {
                Some(restarter) => restarter.restart_language_servers(),
                None => debug!("No language server restarter bound"),
            }
        }
    }
}

impl Drop for NotebookExperiment {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{NOTEBOOK_COMPANION_ID, RICH_COMPANION_ID};
    use crate::testing::{settings, settle, TestHost};
    use lswatch_config::BackendType;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingRestarter {
        restarts: AtomicUsize,
    }

    impl LanguageServerRestarter for CountingRestarter {
        fn restart_language_servers(&self) {
            self.restarts.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingRestarter {
        fn count(&self) -> usize {
            self.restarts.load(Ordering::SeqCst)
        }
    }

    fn opted_in_host() -> TestHost {
        let mut settings = settings(BackendType::Rich);
        settings.lsp_notebooks_enabled = true;
        TestHost::new(settings, &["/work"])
    }

    fn bind(experiment: &NotebookExperiment) -> Arc<CountingRestarter> {
        let restarter = Arc::new(CountingRestarter::default());
        let weak = Arc::downgrade(&restarter);
        let weak: Weak<dyn LanguageServerRestarter> = weak;
        experiment.bind_restarter(weak);
        restarter
    }

    fn register_python_path(host: &TestHost) {
        host.integration
            .register_python_path_function(Arc::new(|_| Some(PathBuf::from("/usr/bin/python3"))));
    }

    #[tokio::test]
    async fn test_first_evaluation_does_not_restart() {
        let host = opted_in_host();
        host.extensions.install(RICH_COMPANION_ID, Some("2023.1.10"));
        host.extensions.install(NOTEBOOK_COMPANION_ID, Some("2023.1.0"));

        let experiment = NotebookExperiment::new(&host.services());
        let restarter = bind(&experiment);
        assert_eq!(experiment.state(), ExperimentState::Undetermined);

        experiment.activate();
        assert!(experiment.is_active());
        assert_eq!(restarter.count(), 0);
        assert_eq!(host.telemetry.events(), vec![TelemetryEvent::NotebookExperimentEnabled]);
    }

    #[tokio::test]
    async fn test_not_opted_in_stays_off() {
        let host = TestHost::new(settings(BackendType::Rich), &["/work"]);
        host.extensions.install(RICH_COMPANION_ID, Some("2023.1.10"));
        host.extensions.install(NOTEBOOK_COMPANION_ID, Some("2023.1.0"));

        let experiment = NotebookExperiment::new(&host.services());
        let restarter = bind(&experiment);
        experiment.activate();

        assert_eq!(experiment.state(), ExperimentState::Off);
        assert_eq!(restarter.count(), 0);
        assert!(host.telemetry.events().is_empty());
    }

    #[tokio::test]
    async fn test_notebook_companion_arrival_turns_experiment_on() {
        let host = opted_in_host();
        host.extensions.install(RICH_COMPANION_ID, Some("2023.1.10"));

        let experiment = NotebookExperiment::new(&host.services());
        let restarter = bind(&experiment);
        experiment.activate();
        assert_eq!(experiment.state(), ExperimentState::Off);

        host.extensions.install(NOTEBOOK_COMPANION_ID, Some("2023.1.0"));
        register_python_path(&host);
        experiment.on_notebook_companion_installed().await;

        assert!(experiment.is_active());
        assert_eq!(restarter.count(), 1);

        // a second notification is ignored
        experiment.on_notebook_companion_installed().await;
        assert_eq!(restarter.count(), 1);
    }

    #[tokio::test]
    async fn test_experiment_never_turns_off() {
        let host = opted_in_host();
        host.extensions.install(RICH_COMPANION_ID, Some("2023.1.10"));
        host.extensions.install(NOTEBOOK_COMPANION_ID, Some("2023.1.0"));

        let experiment = NotebookExperiment::new(&host.services());
        let restarter = bind(&experiment);
        experiment.activate();
        assert!(experiment.is_active());

        host.extensions.uninstall(RICH_COMPANION_ID);
        host.configuration.update(|settings| settings.lsp_notebooks_enabled = false);
        experiment.activate();

        assert!(experiment.is_active());
        assert_eq!(restarter.count(), 0);
        assert_eq!(host.telemetry.events().len(), 1);
    }

    #[tokio::test]
    async fn test_rich_companion_install_reevaluates() {
        let host = opted_in_host();
        host.extensions.install(NOTEBOOK_COMPANION_ID, Some("2023.1.0"));

        let experiment = NotebookExperiment::new(&host.services());
        let restarter = bind(&experiment);
        experiment.activate();
        assert_eq!(experiment.state(), ExperimentState::Off);

        host.extensions.install(RICH_COMPANION_ID, Some("2022.5.1-pre.1"));
        settle().await;

        assert!(experiment.is_active());
        assert_eq!(restarter.count(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_rich_companion_keeps_experiment_off() {
        let host = opted_in_host();
        host.extensions.install(NOTEBOOK_COMPANION_ID, Some("2023.1.0"));
        host.extensions.install(RICH_COMPANION_ID, Some("2022.4.0"));

        let experiment = NotebookExperiment::new(&host.services());
        experiment.activate();
        assert_eq!(experiment.state(), ExperimentState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_python_path_hook_times_out() {
        let host = opted_in_host();
        host.extensions.install(RICH_COMPANION_ID, Some("2023.1.10"));

        let experiment = NotebookExperiment::new(&host.services());
        let restarter = bind(&experiment);
        experiment.activate();

        host.extensions.install(NOTEBOOK_COMPANION_ID, Some("2023.1.0"));
        let started = tokio::time::Instant::now();
        experiment.on_notebook_companion_installed().await;

        assert!(started.elapsed() >= std::time::Duration::from_secs(10));
        assert!(experiment.is_active());
        assert_eq!(restarter.count(), 1);
    }
}
