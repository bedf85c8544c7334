//! In-process host for running the watcher outside an editor.
//!
//! Each host trait from `lswatch_core::host` gets a small implementation
//! here, driven by the configuration file and by console commands.

use async_trait::async_trait;
use lswatch_config::{BackendType, Config, LanguageServerSetting, Settings};
use lswatch_core::gate::{NOTEBOOK_COMPANION_ID, RICH_COMPANION_ID};
use lswatch_core::host::{
    ApplicationShell, CommandHandler, CommandManager, CommandRegistration, ConfigurationService,
    ExtensionInfo, ExtensionRegistry, InterpreterService, WorkspaceService,
};
use lswatch_core::{
    containing_folder, normalize_path, NotebookIntegration, ProxyFactory, PythonEnvironment,
    Services, TelemetrySink, TracingTelemetry, WorkspaceFolder,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Open folders and workspace trust.
pub struct StandaloneWorkspace {
    folders: RwLock<Vec<WorkspaceFolder>>,
    trusted: bool,
}

impl StandaloneWorkspace {
    pub fn new(folders: &[PathBuf], trusted: bool) -> Self {
        let workspace = Self {
            folders: RwLock::new(Vec::new()),
            trusted,
        };
        for folder in folders {
            workspace.add_folder(folder);
        }
        workspace
    }

    /// Open `path`. Returns `None` if it is already open.
    pub fn add_folder(&self, path: &Path) -> Option<WorkspaceFolder> {
        let folder = WorkspaceFolder::new(normalize_path(path));
        let mut folders = write(&self.folders);
        if folders.iter().any(|open| open.path == folder.path) {
            return None;
        }
        folders.push(folder.clone());
        Some(folder)
    }

    /// Close `path`. Returns the folder that was open.
    pub fn remove_folder(&self, path: &Path) -> Option<WorkspaceFolder> {
        let path = normalize_path(path);
        let mut folders = write(&self.folders);
        let index = folders.iter().position(|folder| folder.path == path)?;
        Some(folders.remove(index))
    }
}

impl WorkspaceService for StandaloneWorkspace {
    fn workspace_folders(&self) -> Vec<WorkspaceFolder> {
        read(&self.folders).clone()
    }

    fn is_trusted(&self) -> bool {
        self.trusted
    }
}

/// Settings from the configuration file plus per-folder overrides.
pub struct HostConfiguration {
    base: RwLock<Settings>,
    overrides: RwLock<BTreeMap<PathBuf, LanguageServerSetting>>,
    workspace: Arc<StandaloneWorkspace>,
}

impl HostConfiguration {
    pub fn new(settings: Settings, workspace: Arc<StandaloneWorkspace>) -> Self {
        Self {
            base: RwLock::new(settings),
            overrides: RwLock::new(BTreeMap::new()),
            workspace,
        }
    }

    /// Replace the global settings. Returns whether anything changed.
    pub fn replace(&self, settings: Settings) -> bool {
        let mut base = write(&self.base);
        if *base == settings {
            return false;
        }
        *base = settings;
        true
    }

    /// Set `python.languageServer`, globally or for one folder.
    pub fn set_language_server(&self, value: &str, folder: Option<&Path>) {
        let setting = LanguageServerSetting::parse(value);
        match folder {
            Some(folder) => {
                write(&self.overrides).insert(normalize_path(folder), setting);
            }
            None => {
                let mut base = write(&self.base);
                base.language_server = setting.backend;
                base.language_server_is_default = setting.is_default;
            }
        }
    }

    pub fn set_notebooks_enabled(&self, enabled: bool) {
        write(&self.base).lsp_notebooks_enabled = enabled;
    }
}

impl ConfigurationService for HostConfiguration {
    fn settings(&self, resource: Option<&Path>) -> Settings {
        let mut settings = read(&self.base).clone();
        let folder = resource.and_then(|resource| self.workspace.workspace_folder(resource));
        if let Some(folder) = folder {
            if let Some(setting) = read(&self.overrides).get(&folder.path) {
                settings.language_server = setting.backend;
                settings.language_server_is_default = setting.is_default;
            }
        }
        settings
    }
}

/// Installed extensions, seeded from `[[extensions]]`.
pub struct StandaloneExtensions {
    installed: RwLock<BTreeMap<String, ExtensionInfo>>,
    changes: broadcast::Sender<()>,
}

impl StandaloneExtensions {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            installed: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Configured extensions, plus the rich companion when the rich backend
    /// is on `PATH`.
    pub fn from_config(config: &Config) -> Self {
        let extensions = Self::new();
        {
            let mut installed = write(&extensions.installed);
            for extension in &config.extensions {
                installed.insert(
                    extension.id.to_ascii_lowercase(),
                    ExtensionInfo {
                        id: extension.id.clone(),
                        version: extension.version.clone(),
                    },
                );
            }
            let rich = RICH_COMPANION_ID.to_ascii_lowercase();
            if !installed.contains_key(&rich) && which::which(&config.backends.rich.command).is_ok() {
                debug!(command = %config.backends.rich.command, "Rich backend found on PATH");
                installed.insert(
                    rich,
                    ExtensionInfo {
                        id: RICH_COMPANION_ID.to_string(),
                        version: None,
                    },
                );
            }
        }
        extensions
    }

    pub fn install(&self, id: &str, version: Option<&str>) {
        write(&self.installed).insert(
            id.to_ascii_lowercase(),
            ExtensionInfo {
                id: id.to_string(),
                version: version.map(str::to_string),
            },
        );
        info!(extension = id, version = version.unwrap_or("unknown"), "Extension installed");
        let _ = self.changes.send(());
    }

    pub fn uninstall(&self, id: &str) -> bool {
        let removed = write(&self.installed).remove(&id.to_ascii_lowercase()).is_some();
        if removed {
            info!(extension = id, "Extension uninstalled");
            let _ = self.changes.send(());
        }
        removed
    }

    pub fn installed(&self) -> Vec<ExtensionInfo> {
        read(&self.installed).values().cloned().collect()
    }
}

impl Default for StandaloneExtensions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionRegistry for StandaloneExtensions {
    fn extension(&self, id: &str) -> Option<ExtensionInfo> {
        read(&self.installed).get(&id.to_ascii_lowercase()).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

/// Interpreter selection per folder, with a fallback.
pub struct SelectedInterpreters {
    workspace: Arc<StandaloneWorkspace>,
    per_folder: RwLock<HashMap<PathBuf, PythonEnvironment>>,
    default: RwLock<Option<PythonEnvironment>>,
}

impl SelectedInterpreters {
    pub fn new(workspace: Arc<StandaloneWorkspace>) -> Self {
        Self {
            workspace,
            per_folder: RwLock::new(HashMap::new()),
            default: RwLock::new(None),
        }
    }

    /// Select `interpreter` for `folder`, or for everything without a
    /// folder selection.
    pub fn select(&self, folder: Option<&Path>, interpreter: PythonEnvironment) {
        match folder {
            Some(folder) => {
                write(&self.per_folder).insert(normalize_path(folder), interpreter);
            }
            None => *write(&self.default) = Some(interpreter),
        }
    }

    pub fn default_interpreter(&self) -> Option<PythonEnvironment> {
        read(&self.default).clone()
    }
}

#[async_trait]
impl InterpreterService for SelectedInterpreters {
    async fn active_interpreter(&self, resource: Option<&Path>) -> Option<PythonEnvironment> {
        let folder = match resource {
            Some(resource) => containing_folder(&self.workspace.workspace_folders(), resource)
                .map(|folder| folder.path.clone()),
            None => self.active_workspace_folder(None),
        };
        folder
            .and_then(|folder| read(&self.per_folder).get(&folder).cloned())
            .or_else(|| self.default_interpreter())
    }

    fn active_workspace_folder(&self, resource: Option<&Path>) -> Option<PathBuf> {
        let folders = self.workspace.workspace_folders();
        if let Some(resource) = resource {
            return containing_folder(&folders, resource).map(|folder| folder.path.clone());
        }
        // Without a resource, only an unambiguous single folder counts.
        match folders.as_slice() {
            [only] => Some(only.path.clone()),
            _ => None,
        }
    }
}

/// Messages go to stderr, so stdout stays free for command output.
pub struct ConsoleShell;

impl ApplicationShell for ConsoleShell {
    fn show_warning_message(&self, message: &str) {
        warn!("{}", message);
        eprintln!("warning: {message}");
    }

    fn show_information_message(&self, message: &str) {
        info!("{}", message);
        eprintln!("{message}");
    }
}

/// Commands registered by the watcher, runnable from the console.
#[derive(Default)]
pub struct LocalCommands {
    handlers: Arc<Mutex<HashMap<String, (u64, CommandHandler)>>>,
    next_token: AtomicU64,
}

impl LocalCommands {
    /// Run command `id`. Returns whether it was registered.
    pub fn execute(&self, id: &str) -> bool {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|(_, handler)| Arc::clone(handler));
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }
}

impl CommandManager for LocalCommands {
    fn register_command(&self, id: &str, handler: CommandHandler) -> CommandRegistration {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), (token, handler));

        let handlers = Arc::clone(&self.handlers);
        let key = id.to_string();
        CommandRegistration::new(id, move || {
            let mut handlers = handlers.lock().unwrap_or_else(PoisonError::into_inner);
            // A newer registration under the same id stays.
            if handlers.get(&key).is_some_and(|(current, _)| *current == token) {
                handlers.remove(&key);
            }
        })
    }
}

/// Every host capability, built once from the configuration.
pub struct StandaloneHost {
    pub configuration: Arc<HostConfiguration>,
    pub extensions: Arc<StandaloneExtensions>,
    pub workspace: Arc<StandaloneWorkspace>,
    pub interpreters: Arc<SelectedInterpreters>,
    pub commands: Arc<LocalCommands>,
    pub integration: Arc<NotebookIntegration>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl StandaloneHost {
    pub fn new(config: &Config, folders: &[PathBuf], trusted: bool) -> Self {
        let workspace = Arc::new(StandaloneWorkspace::new(folders, trusted));
        let interpreters = Arc::new(SelectedInterpreters::new(Arc::clone(&workspace)));
        if let Some(python) = &config.python.default_interpreter {
            interpreters.select(None, PythonEnvironment::new(python));
        }

        Self {
            configuration: Arc::new(HostConfiguration::new(config.settings(), Arc::clone(&workspace))),
            extensions: Arc::new(StandaloneExtensions::from_config(config)),
            workspace,
            interpreters,
            commands: Arc::new(LocalCommands::default()),
            integration: Arc::new(NotebookIntegration::new()),
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    pub fn services(&self, proxies: Arc<dyn ProxyFactory>) -> Services {
        Services {
            configuration: self.configuration.clone(),
            extensions: self.extensions.clone(),
            workspace: self.workspace.clone(),
            interpreters: self.interpreters.clone(),
            shell: Arc::new(ConsoleShell),
            commands: self.commands.clone(),
            telemetry: Arc::clone(&self.telemetry),
            proxies,
            integration: Arc::clone(&self.integration),
        }
    }

    /// Whether the notebook companion is installed.
    pub fn has_notebook_companion(&self) -> bool {
        self.extensions.extension(NOTEBOOK_COMPANION_ID).is_some()
    }

    /// Backend type configured for `folder`, for display.
    pub fn backend_for(&self, folder: Option<&Path>) -> BackendType {
        self.configuration.settings(folder).language_server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lswatch_config::ExtensionConfig;
    use std::sync::atomic::AtomicUsize;

    fn workspace(folders: &[&str]) -> Arc<StandaloneWorkspace> {
        let folders: Vec<PathBuf> = folders.iter().map(PathBuf::from).collect();
        Arc::new(StandaloneWorkspace::new(&folders, true))
    }

    #[test]
    fn test_workspace_add_and_remove() {
        let workspace = workspace(&["/work/a"]);
        assert!(workspace.add_folder(Path::new("/work/a/")).is_none());
        assert!(workspace.add_folder(Path::new("/work/b")).is_some());
        assert_eq!(workspace.workspace_folders().len(), 2);

        let removed = workspace.remove_folder(Path::new("/work/./a")).unwrap();
        assert_eq!(removed.path, PathBuf::from("/work/a"));
        assert!(workspace.remove_folder(Path::new("/work/a")).is_none());
    }

    #[test]
    fn test_folder_override_applies_inside_folder_only() {
        let workspace = workspace(&["/work/a", "/work/b"]);
        let configuration = HostConfiguration::new(Settings::default(), workspace);

        configuration.set_language_server("Jedi", Some(Path::new("/work/a")));
        let inside = configuration.settings(Some(Path::new("/work/a/main.py")));
        assert_eq!(inside.language_server, BackendType::Basic);
        assert!(!inside.language_server_is_default);

        let other = configuration.settings(Some(Path::new("/work/b/main.py")));
        assert_eq!(other.language_server, BackendType::Rich);
        assert_eq!(configuration.settings(None).language_server, BackendType::Rich);
    }

    #[test]
    fn test_replace_reports_changes() {
        let configuration = HostConfiguration::new(Settings::default(), workspace(&[]));
        assert!(!configuration.replace(Settings::default()));

        let mut settings = Settings::default();
        settings.lsp_notebooks_enabled = true;
        assert!(configuration.replace(settings));
        assert!(configuration.settings(None).lsp_notebooks_enabled);
    }

    #[tokio::test]
    async fn test_extension_changes_are_broadcast() {
        let mut config = Config::default();
        config.backends.rich.command = "definitely-not-a-real-server-12345".to_string();
        config.extensions.push(ExtensionConfig {
            id: NOTEBOOK_COMPANION_ID.to_string(),
            version: Some("2022.5.0".to_string()),
        });

        let extensions = StandaloneExtensions::from_config(&config);
        assert!(extensions.extension(RICH_COMPANION_ID).is_none());
        assert!(extensions.extension(&NOTEBOOK_COMPANION_ID.to_uppercase()).is_some());

        let mut changes = extensions.subscribe();
        extensions.install(RICH_COMPANION_ID, Some("2023.1.10"));
        changes.recv().await.unwrap();
        assert_eq!(
            extensions.extension(RICH_COMPANION_ID).and_then(|e| e.version),
            Some("2023.1.10".to_string())
        );

        assert!(extensions.uninstall(RICH_COMPANION_ID));
        assert!(!extensions.uninstall(RICH_COMPANION_ID));
    }

    #[tokio::test]
    async fn test_interpreter_selection_per_folder() {
        let workspace = workspace(&["/work/a", "/work/b"]);
        let interpreters = SelectedInterpreters::new(workspace);
        interpreters.select(None, PythonEnvironment::new("/usr/bin/python3"));
        interpreters.select(Some(Path::new("/work/a")), PythonEnvironment::new("/work/a/.venv/bin/python"));

        let a = interpreters.active_interpreter(Some(Path::new("/work/a/x.py"))).await.unwrap();
        assert_eq!(a.executable, PathBuf::from("/work/a/.venv/bin/python"));
        let b = interpreters.active_interpreter(Some(Path::new("/work/b/x.py"))).await.unwrap();
        assert_eq!(b.executable, PathBuf::from("/usr/bin/python3"));

        // Two folders open: no unambiguous active folder.
        assert_eq!(interpreters.active_workspace_folder(None), None);
    }

    #[test]
    fn test_commands_registration_lifecycle() {
        let commands = LocalCommands::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut first = commands.register_command(
            "lswatch.test",
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(commands.execute("lswatch.test"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let _second = commands.register_command("lswatch.test", Arc::new(|| {}));
        first.dispose();
        // The newer registration survives disposal of the old one.
        assert!(commands.execute("lswatch.test"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!commands.execute("lswatch.unknown"));
    }
}
