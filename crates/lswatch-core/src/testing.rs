//! In-memory host implementations for tests.
//!
//! Enabled for this crate's unit tests and, through the `test-support`
//! feature, for downstream crates.

use crate::environment::{PythonEnvironment, PythonVersion};
use crate::error::LanguageServerError;
use crate::host::{
    ApplicationShell, CommandHandler, CommandManager, CommandRegistration, ConfigurationService,
    ExtensionInfo, ExtensionRegistry, InterpreterService, WorkspaceService,
};
use crate::integration::NotebookIntegration;
use crate::server::{LanguageServerProxy, ProxyFactory, StartRequest};
use crate::services::Services;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::workspace::{WorkspaceFolder, WorkspaceIdentity};
use async_trait::async_trait;
use lswatch_config::{BackendType, Settings};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settings selecting `backend` explicitly, with the experiment opted out.
pub fn settings(backend: BackendType) -> Settings {
    Settings {
        language_server: backend,
        language_server_is_default: false,
        lsp_notebooks_enabled: false,
    }
}

/// An interpreter with a known major version.
pub fn python(executable: &str, major: i64) -> PythonEnvironment {
    let version = PythonVersion::parse(&format!("{major}.11.0")).unwrap_or(PythonVersion {
        major,
        minor: -1,
        micro: -1,
        sys_version: String::new(),
    });
    PythonEnvironment::new(executable).with_version(version)
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub struct FakeConfiguration {
    settings: Mutex<Settings>,
}

impl FakeConfiguration {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    pub fn update(&self, change: impl FnOnce(&mut Settings)) {
        change(&mut lock(&self.settings));
    }
}

impl ConfigurationService for FakeConfiguration {
    fn settings(&self, _resource: Option<&Path>) -> Settings {
        lock(&self.settings).clone()
    }
}

pub struct FakeExtensions {
    installed: Mutex<HashMap<String, Option<String>>>,
    changes: broadcast::Sender<()>,
}

impl FakeExtensions {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            installed: Mutex::new(HashMap::new()),
            changes,
        }
    }

    pub fn install(&self, id: &str, version: Option<&str>) {
        lock(&self.installed).insert(id.to_string(), version.map(str::to_string));
        let _ = self.changes.send(());
    }

    pub fn uninstall(&self, id: &str) {
        lock(&self.installed).remove(id);
        let _ = self.changes.send(());
    }
}

impl Default for FakeExtensions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionRegistry for FakeExtensions {
    fn extension(&self, id: &str) -> Option<ExtensionInfo> {
        lock(&self.installed).get(id).map(|version| ExtensionInfo {
            id: id.to_string(),
            version: version.clone(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

pub struct FakeWorkspace {
    folders: Mutex<Vec<WorkspaceFolder>>,
    trusted: AtomicBool,
}

impl FakeWorkspace {
    pub fn new(folders: &[&str]) -> Self {
        Self {
            folders: Mutex::new(folders.iter().map(|path| WorkspaceFolder::new(*path)).collect()),
            trusted: AtomicBool::new(true),
        }
    }

    pub fn add_folder(&self, path: &str) {
        lock(&self.folders).push(WorkspaceFolder::new(path));
    }

    pub fn remove_folder(&self, path: &Path) -> Option<WorkspaceFolder> {
        let mut folders = lock(&self.folders);
        let index = folders.iter().position(|folder| folder.path == path)?;
        Some(folders.remove(index))
    }

    pub fn set_trusted(&self, trusted: bool) {
        self.trusted.store(trusted, Ordering::SeqCst);
    }
}

impl WorkspaceService for FakeWorkspace {
    fn workspace_folders(&self) -> Vec<WorkspaceFolder> {
        lock(&self.folders).clone()
    }

    fn is_trusted(&self) -> bool {
        self.trusted.load(Ordering::SeqCst)
    }
}

/// Interpreter selection per folder, with a fallback.
pub struct FakeInterpreters {
    workspace: Arc<FakeWorkspace>,
    by_folder: Mutex<HashMap<WorkspaceIdentity, PythonEnvironment>>,
    fallback: Mutex<Option<PythonEnvironment>>,
}

impl FakeInterpreters {
    pub fn new(workspace: Arc<FakeWorkspace>) -> Self {
        Self {
            workspace,
            by_folder: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
        }
    }

    pub fn set_for_folder(&self, folder: &str, interpreter: PythonEnvironment) {
        lock(&self.by_folder).insert(WorkspaceIdentity::from_folder(folder), interpreter);
    }

    pub fn set_default(&self, interpreter: Option<PythonEnvironment>) {
        *lock(&self.fallback) = interpreter;
    }
}

#[async_trait]
impl InterpreterService for FakeInterpreters {
    async fn active_interpreter(&self, resource: Option<&Path>) -> Option<PythonEnvironment> {
        let folder = match resource {
            Some(resource) => self.workspace.workspace_folder(resource).map(|folder| folder.path),
            None => self.active_workspace_folder(None),
        };
        let selected =
            folder.and_then(|path| lock(&self.by_folder).get(&WorkspaceIdentity::from_folder(path)).cloned());
        selected.or_else(|| lock(&self.fallback).clone())
    }

    /// The only folder, when exactly one is open.
    fn active_workspace_folder(&self, _resource: Option<&Path>) -> Option<PathBuf> {
        match self.workspace.workspace_folders().as_slice() {
            [only] => Some(only.path.clone()),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct RecordingShell {
    warnings: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
}

impl RecordingShell {
    pub fn warnings(&self) -> Vec<String> {
        lock(&self.warnings).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }
}

impl ApplicationShell for RecordingShell {
    fn show_warning_message(&self, message: &str) {
        lock(&self.warnings).push(message.to_string());
    }

    fn show_information_message(&self, message: &str) {
        lock(&self.messages).push(message.to_string());
    }
}

/// Commands registered by id. Each registration carries a token so that a
/// stale registration can't unregister its replacement.
#[derive(Default)]
pub struct FakeCommands {
    handlers: Arc<Mutex<HashMap<String, (u64, CommandHandler)>>>,
    next_token: AtomicU64,
}

impl FakeCommands {
    /// Run the handler registered under `id`. Returns whether one was found.
    pub fn execute(&self, id: &str) -> bool {
        let handler = lock(&self.handlers).get(id).map(|(_, handler)| Arc::clone(handler));
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        lock(&self.handlers).contains_key(id)
    }
}

impl CommandManager for FakeCommands {
    fn register_command(&self, id: &str, handler: CommandHandler) -> CommandRegistration {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        lock(&self.handlers).insert(id.to_string(), (token, handler));

        let handlers = Arc::clone(&self.handlers);
        let key = id.to_string();
        CommandRegistration::new(id, move || {
            let mut handlers = lock(&handlers);
            if handlers.get(&key).is_some_and(|(current, _)| *current == token) {
                handlers.remove(&key);
            }
        })
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        lock(&self.events).clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn send(&self, event: TelemetryEvent) {
        lock(&self.events).push(event);
    }
}

/// Proxy that records what it was asked to do.
pub struct RecordingProxy {
    backend: BackendType,
    requests: Mutex<Vec<StartRequest>>,
    stops: AtomicUsize,
    disposes: AtomicUsize,
    fail: bool,
    hang: bool,
}

impl RecordingProxy {
    pub fn backend(&self) -> BackendType {
        self.backend
    }

    pub fn starts(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn disposes(&self) -> usize {
        self.disposes.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<StartRequest> {
        lock(&self.requests).last().cloned()
    }
}

#[async_trait]
impl LanguageServerProxy for RecordingProxy {
    async fn start(&self, request: StartRequest) -> Result<(), LanguageServerError> {
        lock(&self.requests).push(request);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(LanguageServerError::start_failed(self.backend, "spawn refused"));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.disposes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out [`RecordingProxy`] instances and keeps them for inspection.
#[derive(Default)]
pub struct RecordingProxyFactory {
    created: Mutex<Vec<Arc<RecordingProxy>>>,
    fail_starts: AtomicBool,
    hang_starts: AtomicBool,
}

impl RecordingProxyFactory {
    /// Proxies created from now on fail to start.
    pub fn set_fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    /// Proxies created from now on never finish starting.
    pub fn set_hang_starts(&self, hang: bool) {
        self.hang_starts.store(hang, Ordering::SeqCst);
    }

    /// The `index`th proxy created. Panics when out of range.
    pub fn proxy(&self, index: usize) -> Arc<RecordingProxy> {
        Arc::clone(&lock(&self.created)[index])
    }

    pub fn all(&self) -> Vec<Arc<RecordingProxy>> {
        lock(&self.created).clone()
    }

    pub fn total_starts(&self) -> usize {
        lock(&self.created).iter().map(|proxy| proxy.starts()).sum()
    }
}

impl ProxyFactory for RecordingProxyFactory {
    fn create(&self, backend: BackendType) -> Arc<dyn LanguageServerProxy> {
        let proxy = Arc::new(RecordingProxy {
            backend,
            requests: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            disposes: AtomicUsize::new(0),
            fail: self.fail_starts.load(Ordering::SeqCst),
            hang: self.hang_starts.load(Ordering::SeqCst),
        });
        lock(&self.created).push(Arc::clone(&proxy));
        proxy
    }
}

/// A full set of fakes.
pub struct TestHost {
    pub configuration: Arc<FakeConfiguration>,
    pub extensions: Arc<FakeExtensions>,
    pub workspace: Arc<FakeWorkspace>,
    pub interpreters: Arc<FakeInterpreters>,
    pub shell: Arc<RecordingShell>,
    pub commands: Arc<FakeCommands>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub proxies: Arc<RecordingProxyFactory>,
    pub integration: Arc<NotebookIntegration>,
}

impl TestHost {
    pub fn new(settings: Settings, folders: &[&str]) -> Self {
        let workspace = Arc::new(FakeWorkspace::new(folders));
        Self {
            configuration: Arc::new(FakeConfiguration::new(settings)),
            extensions: Arc::new(FakeExtensions::new()),
            interpreters: Arc::new(FakeInterpreters::new(Arc::clone(&workspace))),
            workspace,
            shell: Arc::new(RecordingShell::default()),
            commands: Arc::new(FakeCommands::default()),
            telemetry: Arc::new(RecordingTelemetry::default()),
            proxies: Arc::new(RecordingProxyFactory::default()),
            integration: Arc::new(NotebookIntegration::new()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            configuration: self.configuration.clone(),
            extensions: self.extensions.clone(),
            workspace: self.workspace.clone(),
            interpreters: self.interpreters.clone(),
            shell: self.shell.clone(),
            commands: self.commands.clone(),
            telemetry: self.telemetry.clone(),
            proxies: self.proxies.clone(),
            integration: Arc::clone(&self.integration),
        }
    }
}
