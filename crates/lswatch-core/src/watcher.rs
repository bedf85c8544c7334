//! The language server watcher.
//!
//! Owns the registry of backend managers and keeps it consistent with the
//! host: the selected backend type, the active interpreter per workspace,
//! workspace trust, open folders and installed extensions.
//!
//! All transitions are serialized by one async mutex over [`WatcherState`].
//! The registry sits behind its own short-lived lock so that status can be
//! read, and pending starts cancelled, while a transition is in flight.

use crate::debounce::Debouncer;
use crate::environment::PythonEnvironment;
use crate::error::LanguageServerError;
use crate::events::{ConfigurationChange, HostEvent, WorkspaceFoldersChange, LANGUAGE_SERVER_SETTING};
use crate::experiment::{LanguageServerRestarter, NotebookExperiment};
use crate::host::{
    CommandHandler, CommandManager, CommandRegistration, ConfigurationService, InterpreterService,
    WorkspaceService,
};
use crate::managers::{LanguageServerExtensionManager, ManagerFactory};
use crate::registry::{KeyState, ManagerStatus, Registry, RegistryEntry, RegistryKey};
use crate::server::LanguageServer;
use crate::services::Services;
use crate::workspace::WorkspaceIdentity;
use lswatch_config::BackendType;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Command that restarts every running backend.
pub const RESTART_COMMAND_ID: &str = "lswatch.restartLanguageServer";

const RESTART_DEBOUNCE: Duration = Duration::from_secs(1);

const UNTRUSTED_WORKSPACE_MESSAGE: &str =
    "Only the Rich language server is supported in untrusted workspaces. Language features are disabled.";

// The restart command is registered once per process. A new watcher
// replaces the registration of the previous one.
static RESTART_COMMAND: StdMutex<Option<CommandRegistration>> = StdMutex::new(None);

struct WatcherState {
    /// Backend type last applied.
    backend_type: BackendType,
    /// Interpreter each workspace's backend was started with.
    interpreters: HashMap<WorkspaceIdentity, Option<PythonEnvironment>>,
}

pub struct LanguageServerWatcher {
    this: Weak<Self>,
    configuration: Arc<dyn ConfigurationService>,
    workspace: Arc<dyn WorkspaceService>,
    interpreters: Arc<dyn InterpreterService>,
    factory: ManagerFactory,
    state: Mutex<WatcherState>,
    registry: StdMutex<Registry>,
    restart: Debouncer,
    watch_interpreter_changes: bool,
    extension_listener: StdMutex<Option<JoinHandle<()>>>,
}

impl LanguageServerWatcher {
    /// Build the watcher and register the restart command.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(services: &Services, experiment: Arc<NotebookExperiment>) -> Arc<Self> {
        let backend_type = services.configuration.settings(None).language_server;

        let watcher = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            configuration: Arc::clone(&services.configuration),
            workspace: Arc::clone(&services.workspace),
            interpreters: Arc::clone(&services.interpreters),
            factory: ManagerFactory::new(services, Arc::clone(&experiment)),
            state: Mutex::new(WatcherState {
                backend_type,
                interpreters: HashMap::new(),
            }),
            registry: StdMutex::new(Registry::new()),
            restart: Debouncer::new(RESTART_DEBOUNCE),
            watch_interpreter_changes: services.workspace.is_trusted(),
            extension_listener: StdMutex::new(None),
        });

        let weak = Arc::downgrade(&watcher);
        let restarter: Weak<dyn LanguageServerRestarter> = weak;
        experiment.bind_restarter(restarter);
        watcher.register_restart_command(services.commands.as_ref());
        watcher.listen_for_extension_changes(services.extensions.subscribe());
        watcher
    }

    /// Start the backend for `resource` with the current backend type.
    pub async fn activate(&self, resource: Option<&Path>) -> Result<(), LanguageServerError> {
        let mut state = self.state.lock().await;
        let backend = state.backend_type;
        self.start_and_get(&mut state, backend, resource).await?;
        Ok(())
    }

    /// Start `backend` for `resource`.
    pub async fn start_language_server(
        &self,
        backend: BackendType,
        resource: Option<&Path>,
    ) -> Result<(), LanguageServerError> {
        let mut state = self.state.lock().await;
        self.start_and_get(&mut state, backend, resource).await?;
        Ok(())
    }

    /// The backend serving `resource`, started on demand.
    pub async fn get(
        &self,
        resource: Option<&Path>,
    ) -> Result<Arc<dyn LanguageServer>, LanguageServerError> {
        let mut state = self.state.lock().await;
        let key = self.registry_key(resource, state.backend_type);

        let existing = self.registry().get(&key).map(|entry| Arc::clone(&entry.manager));
        let manager = match existing {
            Some(manager) => manager,
            None => {
                let backend = state.backend_type;
                self.start_and_get(&mut state, backend, resource).await?
            }
        };
        Ok(manager.get())
    }

    /// Restart every running backend after a quiet period.
    pub fn restart_language_servers(&self) {
        let this = self.this.clone();
        self.restart.call(move || async move {
            if let Some(watcher) = this.upgrade() {
                if let Err(e) = watcher.restart_all().await {
                    warn!(error = %e, "Failed to restart language servers");
                }
            }
        });
    }

    /// Tear down and restart every running backend now. Inert entries are
    /// left in place; they have nothing to restart.
    pub async fn restart_all(&self) -> Result<(), LanguageServerError> {
        let mut state = self.state.lock().await;
        let workspaces: BTreeSet<WorkspaceIdentity> =
            self.registry().drain_startable().into_iter().collect();
        info!(count = workspaces.len(), "Restarting language servers");

        let backend = state.backend_type;
        let mut first_error = None;
        for workspace in workspaces {
            if let Err(e) = self.start_and_get(&mut state, backend, workspace.path()).await {
                warn!(workspace = %workspace, error = %e, "Language server did not restart");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::ConfigurationChanged(change) => self.on_did_change_configuration(&change).await,
            HostEvent::InterpreterChanged { resource } => {
                self.on_did_change_interpreter(resource.as_deref()).await
            }
            HostEvent::WorkspaceFoldersChanged(change) => {
                self.on_did_change_workspace_folders(&change).await
            }
            HostEvent::AnalysisOptionsChanged | HostEvent::RestartRequested => {
                self.restart_language_servers()
            }
        }
    }

    /// Process host events until the sender is dropped.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            debug!(?event, "Host event");
            self.handle_event(event).await;
        }
        debug!("Host event stream closed");
    }

    pub async fn on_did_change_configuration(&self, change: &ConfigurationChange) {
        let folders = self.workspace.workspace_folders();
        let mut state = self.state.lock().await;

        if folders.is_empty() {
            if change.affects_globally(LANGUAGE_SERVER_SETTING) {
                if let Err(e) = self.refresh_language_server(&mut state, None).await {
                    error!(error = %e, "Failed to apply language server setting");
                }
            }
            return;
        }

        for folder in folders {
            if change.affects(LANGUAGE_SERVER_SETTING, &folder.path) {
                if let Err(e) = self.refresh_language_server(&mut state, Some(&folder.path)).await {
                    error!(folder = %folder.path.display(), error = %e, "Failed to apply language server setting");
                }
            }
        }
    }

    pub async fn on_did_change_interpreter(&self, resource: Option<&Path>) {
        if !self.watch_interpreter_changes {
            debug!("Ignoring interpreter change in untrusted workspace");
            return;
        }
        if let Err(e) = self.activate(resource).await {
            error!(error = %e, "Failed to restart language server for new interpreter");
        }
    }

    pub async fn on_did_change_extensions(&self) {
        let mut state = self.state.lock().await;
        let backend = self.configuration.settings(None).language_server;
        if backend != state.backend_type {
            if let Err(e) = self.refresh_language_server(&mut state, None).await {
                error!(error = %e, "Failed to apply language server after extension change");
            }
        }
    }

    pub async fn on_did_change_workspace_folders(&self, change: &WorkspaceFoldersChange) {
        let mut state = self.state.lock().await;
        if state.backend_type != BackendType::Basic {
            return;
        }
        for folder in &change.removed {
            let workspace = WorkspaceIdentity::from_folder(&folder.path);
            state.interpreters.remove(&workspace);
            if self.registry().remove(&RegistryKey::Workspace(workspace)) {
                info!(folder = %folder.path.display(), "Workspace folder removed, language server stopped");
            }
        }
    }

    /// Backend type last applied.
    pub async fn backend_type(&self) -> BackendType {
        self.state.lock().await.backend_type
    }

    pub fn status(&self) -> Vec<ManagerStatus> {
        self.registry().status()
    }

    pub fn key_state(&self, key: &RegistryKey) -> KeyState {
        self.registry().state(key)
    }

    /// Identity of the workspace `resource` belongs to. Without a resource
    /// the interpreter service's active folder is used.
    pub fn workspace_identity(&self, resource: Option<&Path>) -> WorkspaceIdentity {
        let folder = match resource {
            Some(resource) => self.workspace.workspace_folder(resource).map(|folder| folder.path),
            None => self.interpreters.active_workspace_folder(None),
        };
        folder
            .map(WorkspaceIdentity::from_folder)
            .unwrap_or(WorkspaceIdentity::Default)
    }

    /// Stop everything: pending restarts, the extension listener and every
    /// backend.
    pub async fn shutdown(&self) {
        self.restart.cancel();
        if let Some(listener) = self
            .extension_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }

        // Disposing first cancels a start still holding the state lock.
        self.registry().drain();
        let _state = self.state.lock().await;
        self.registry().drain();
        info!("Language servers shut down");
    }

    async fn start_and_get(
        &self,
        state: &mut WatcherState,
        requested: BackendType,
        resource: Option<&Path>,
    ) -> Result<Arc<dyn LanguageServerExtensionManager>, LanguageServerError> {
        let workspace = self.workspace_identity(resource);
        let interpreter = self.interpreters.active_interpreter(resource).await;

        let interpreter_changed = matches!(
            state.interpreters.get(&workspace),
            Some(Some(bound)) if interpreter.as_ref() != Some(bound)
        );
        if interpreter_changed {
            info!(workspace = %workspace, "Active interpreter changed, stopping language server");
            let removed = self.registry().remove_workspace(&workspace);
            debug!(workspace = %workspace, removed, "Stopped language servers bound to the old interpreter");
        }

        let backend = self.resolve_backend_type(requested, interpreter.as_ref());
        let key = RegistryKey::resolve(backend, &workspace);

        if backend.is_singleton() {
            let existing = self.registry().get(&key).map(|entry| Arc::clone(&entry.manager));
            if let Some(manager) = existing {
                if manager.backend_type() == backend {
                    return Ok(manager);
                }
                warn!(key = %key, "Replacing language server of a different type");
            }
            let other = match backend {
                BackendType::Rich => BackendType::Disabled,
                _ => BackendType::Rich,
            };
            self.registry().remove(&RegistryKey::Singleton(other));
        }

        let manager = self.factory.create(backend);
        self.registry().insert(
            key.clone(),
            RegistryEntry {
                manager: Arc::clone(&manager),
                workspace: workspace.clone(),
            },
        );

        if manager.can_start_language_server() {
            if let Err(e) = manager
                .start_language_server(&workspace, interpreter.as_ref())
                .await
            {
                self.remove_if_current(&key, &manager);
                return Err(e);
            }
            log_startup(requested, &workspace);
            state.backend_type = requested;
            state.interpreters.insert(workspace, interpreter);
        } else {
            manager.language_server_not_available().await;
        }

        Ok(manager)
    }

    async fn refresh_language_server(
        &self,
        state: &mut WatcherState,
        resource: Option<&Path>,
    ) -> Result<(), LanguageServerError> {
        let backend = self.configuration.settings(resource).language_server;
        if backend == state.backend_type {
            return Ok(());
        }

        info!(from = %state.backend_type, to = %backend, "Language server setting changed");
        let stale = self.registry().retain_backend(backend);
        debug!(stale, "Stopped language servers of the previous type");
        self.start_and_get(state, backend, resource).await?;
        Ok(())
    }

    fn resolve_backend_type(
        &self,
        requested: BackendType,
        interpreter: Option<&PythonEnvironment>,
    ) -> BackendType {
        let mut backend = requested;

        // An interpreter without a known version counts as Python 2.
        if interpreter.is_some_and(|python| python.major_version().unwrap_or(0) < 3) {
            if backend == BackendType::Basic {
                info!("Basic language server does not support Python 2, language features are disabled");
                backend = BackendType::Disabled;
            } else if self.configuration.settings(None).language_server_is_default {
                backend = BackendType::Rich;
            }
        }

        if !self.workspace.is_trusted() && !backend.is_singleton() {
            info!("{UNTRUSTED_WORKSPACE_MESSAGE}");
            backend = BackendType::Disabled;
        }

        backend
    }

    fn registry_key(&self, resource: Option<&Path>, backend: BackendType) -> RegistryKey {
        RegistryKey::resolve(backend, &self.workspace_identity(resource))
    }

    fn remove_if_current(&self, key: &RegistryKey, manager: &Arc<dyn LanguageServerExtensionManager>) {
        let mut registry = self.registry();
        let current = registry
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.manager, manager));
        if current {
            registry.remove(key);
        } else {
            manager.dispose();
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_restart_command(&self, commands: &dyn CommandManager) {
        let mut slot = RESTART_COMMAND.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut previous) = slot.take() {
            previous.dispose();
        }

        let this = self.this.clone();
        let handler: CommandHandler = Arc::new(move || {
            let Some(watcher) = this.upgrade() else {
                return;
            };
            watcher.restart_language_servers();
        });
        *slot = Some(commands.register_command(RESTART_COMMAND_ID, handler));
    }

    fn listen_for_extension_changes(&self, mut changes: broadcast::Receiver<()>) {
        let this = self.this.clone();
        let listener = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let Some(watcher) = this.upgrade() else {
                    break;
                };
                watcher.on_did_change_extensions().await;
            }
        });
        *self
            .extension_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }
}

impl LanguageServerRestarter for LanguageServerWatcher {
    fn restart_language_servers(&self) {
        LanguageServerWatcher::restart_language_servers(self);
    }
}

impl Drop for LanguageServerWatcher {
    fn drop(&mut self) {
        if let Some(listener) = self
            .extension_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }
}

fn log_startup(backend: BackendType, workspace: &WorkspaceIdentity) {
    match backend {
        BackendType::Basic => info!("Starting Basic language server for {}.", workspace.basename()),
        BackendType::Rich => info!("Starting Rich language server."),
        BackendType::Disabled => {
            info!("Editor support is inactive since language server is set to None.")
        }
    }
}
