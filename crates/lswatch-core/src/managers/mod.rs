//! Backend lifecycle managers.
//!
//! One manager drives one backend session: Rich (a singleton serving every
//! folder), Basic (one per folder) or Disabled (an inert singleton).

mod basic;
mod disabled;
mod rich;

pub use basic::BasicExtensionManager;
pub use disabled::{DisabledExtensionManager, InertLanguageServer};
pub use rich::RichExtensionManager;

use crate::environment::PythonEnvironment;
use crate::error::LanguageServerError;
use crate::experiment::NotebookExperiment;
use crate::host::{ApplicationShell, ExtensionRegistry};
use crate::integration::NotebookIntegration;
use crate::options::AnalysisOptions;
use crate::poll::PollPolicy;
use crate::server::{LanguageServer, LanguageServerProxy, ProxyFactory, StartRequest};
use crate::services::Services;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::workspace::WorkspaceIdentity;
use async_trait::async_trait;
use lswatch_config::BackendType;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    Started,
    Stopped,
    Disposed,
}

impl ManagerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ManagerState::Created,
            1 => ManagerState::Started,
            2 => ManagerState::Stopped,
            _ => ManagerState::Disposed,
        }
    }
}

#[async_trait]
pub trait LanguageServerExtensionManager: Send + Sync {
    fn backend_type(&self) -> BackendType;

    fn state(&self) -> ManagerState;

    /// Whether the backend can be started at all.
    fn can_start_language_server(&self) -> bool;

    /// Start the backend for `workspace`. Fails with
    /// [`LanguageServerError::AlreadyStarted`] on a second call.
    async fn start_language_server(
        &self,
        workspace: &WorkspaceIdentity,
        interpreter: Option<&PythonEnvironment>,
    ) -> Result<(), LanguageServerError>;

    /// Tell the user the backend can't start.
    async fn language_server_not_available(&self);

    /// Stop the backend. A no-op unless started.
    fn stop_language_server(&self);

    /// Release the manager, cancelling a start still in flight.
    fn dispose(&self);

    fn get(&self) -> Arc<dyn LanguageServer>;
}

/// State and cancellation shared by every manager variant.
pub(crate) struct Lifecycle {
    state: AtomicU8,
    start_requested: AtomicBool,
    cancel: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ManagerState::Created as u8),
            start_requested: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn begin_start(&self) -> Result<(), LanguageServerError> {
        if self.cancel.is_cancelled() {
            return Err(LanguageServerError::Cancelled);
        }
        if self.start_requested.swap(true, Ordering::SeqCst) {
            return Err(LanguageServerError::AlreadyStarted);
        }
        Ok(())
    }

    pub(crate) fn mark_started(&self) {
        let _ = self.transition(ManagerState::Created, ManagerState::Started);
    }

    /// Started -> Stopped. Returns whether this call stopped it.
    pub(crate) fn stop(&self) -> bool {
        self.transition(ManagerState::Started, ManagerState::Stopped)
    }

    /// Returns whether this call disposed it.
    pub(crate) fn dispose(&self) -> bool {
        self.cancel.cancel();
        self.state.swap(ManagerState::Disposed as u8, Ordering::SeqCst)
            != ManagerState::Disposed as u8
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn transition(&self, from: ManagerState, to: ManagerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Run `proxy.start` under the lifecycle's cancellation and report startup
/// telemetry.
pub(crate) async fn start_session(
    lifecycle: &Lifecycle,
    proxy: &dyn LanguageServerProxy,
    request: StartRequest,
    ls_version: String,
    telemetry: &dyn TelemetrySink,
) -> Result<(), LanguageServerError> {
    let backend = request.backend;
    let started_at = Instant::now();

    let result = tokio::select! {
        biased;
        _ = lifecycle.cancellation().cancelled() => Err(LanguageServerError::Cancelled),
        result = proxy.start(request) => result,
    };

    telemetry.send(TelemetryEvent::LanguageServerStartup {
        backend,
        ls_version,
        duration: started_at.elapsed(),
        failed: result.is_err(),
    });

    match result {
        Ok(()) => {
            lifecycle.mark_started();
            debug!(backend = %backend, "Language server started");
            Ok(())
        }
        Err(e) => {
            error!(backend = %backend, error = %e, "Language server failed to start");
            Err(e)
        }
    }
}

/// Builds managers for the watcher.
pub struct ManagerFactory {
    extensions: Arc<dyn ExtensionRegistry>,
    shell: Arc<dyn ApplicationShell>,
    telemetry: Arc<dyn TelemetrySink>,
    proxies: Arc<dyn ProxyFactory>,
    integration: Arc<NotebookIntegration>,
    experiment: Arc<NotebookExperiment>,
    options: Arc<AnalysisOptions>,
    poll: PollPolicy,
}

impl ManagerFactory {
    pub fn new(services: &Services, experiment: Arc<NotebookExperiment>) -> Self {
        Self {
            extensions: Arc::clone(&services.extensions),
            shell: Arc::clone(&services.shell),
            telemetry: Arc::clone(&services.telemetry),
            proxies: Arc::clone(&services.proxies),
            integration: Arc::clone(&services.integration),
            experiment,
            options: Arc::new(AnalysisOptions::new(Arc::clone(&services.workspace))),
            poll: PollPolicy::default(),
        }
    }

    pub fn create(&self, backend: BackendType) -> Arc<dyn LanguageServerExtensionManager> {
        match backend {
            BackendType::Rich => Arc::new(RichExtensionManager::new(
                self.proxies.create(BackendType::Rich),
                Arc::clone(&self.extensions),
                Arc::clone(&self.shell),
                Arc::clone(&self.telemetry),
                Arc::clone(&self.experiment),
                Arc::clone(&self.integration),
                Arc::clone(&self.options),
                self.poll,
            )),
            BackendType::Basic => Arc::new(BasicExtensionManager::new(
                self.proxies.create(BackendType::Basic),
                Arc::clone(&self.shell),
                Arc::clone(&self.telemetry),
                Arc::clone(&self.options),
            )),
            BackendType::Disabled => Arc::new(DisabledExtensionManager::new()),
        }
    }
}
