//! Configuration for lswatch.
//!
//! Configuration is layered with the `config` crate: built-in defaults, then a
//! TOML file (`~/.config/lswatch/config.toml` unless a path is given), then
//! `LSWATCH_`-prefixed environment variables using `__` between nested keys,
//! e.g. `LSWATCH_PYTHON__LANGUAGE_SERVER=Jedi`.
//!
//! The orchestrator never reads [`Config`] directly; it reads the typed
//! [`Settings`] view returned by [`Config::settings`].

mod backend;

pub use backend::{BackendType, LanguageServerSetting};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or rendering configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Settings the orchestrator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Requested backend type.
    pub language_server: BackendType,
    /// Whether the backend type was left at its default.
    pub language_server_is_default: bool,
    /// Opt-in for the notebook experiment.
    pub lsp_notebooks_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language_server: BackendType::Rich,
            language_server_is_default: true,
            lsp_notebooks_enabled: false,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: Option<String>,
    pub python: PythonConfig,
    pub backends: BackendsConfig,
    /// Installed companion extensions, as reported to the orchestrator.
    pub extensions: Vec<ExtensionConfig>,
    pub discovery: DiscoveryConfig,
    pub workspace: WorkspaceConfig,
}

/// `[python]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// `Default`, `Pylance`, `Jedi` or `None`.
    pub language_server: String,
    pub lsp_notebooks_enabled: bool,
    /// Interpreter used when discovery finds nothing better.
    pub default_interpreter: Option<PathBuf>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            language_server: "Default".to_string(),
            lsp_notebooks_enabled: false,
            default_interpreter: None,
        }
    }
}

/// `[backends]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub rich: BackendCommand,
    pub basic: BackendCommand,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            rich: BackendCommand::new("pyright-langserver", &["--stdio"]),
            basic: BackendCommand::new("jedi-language-server", &[]),
        }
    }
}

/// How to launch one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30000
}

impl BackendCommand {
    /// Build a command with default environment and timeout.
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            env: BTreeMap::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// One `[[extensions]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    pub id: String,
    pub version: Option<String>,
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Probe executable.
    pub probe: String,
    pub args: Vec<String>,
    /// Extra directories the probe searches for environments.
    pub environment_directories: Vec<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe: "pet".to_string(),
            args: vec!["server".to_string()],
            environment_directories: Vec::new(),
        }
    }
}

/// `[workspace]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub folders: Vec<PathBuf>,
    pub trusted: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            trusted: true,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file is not an error; defaults and environment variables
    /// still apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let mut loaded: Config = builder
            .add_source(
                config::Environment::with_prefix("LSWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.expand_paths();
        Ok(loaded)
    }

    /// Default configuration file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lswatch").join("config.toml"))
    }

    /// The typed settings view.
    pub fn settings(&self) -> Settings {
        let setting = LanguageServerSetting::parse(&self.python.language_server);
        Settings {
            language_server: setting.backend,
            language_server_is_default: setting.is_default,
            lsp_notebooks_enabled: self.python.lsp_notebooks_enabled,
        }
    }

    /// Version of an installed extension, if configured.
    pub fn extension(&self, id: &str) -> Option<&ExtensionConfig> {
        self.extensions
            .iter()
            .find(|extension| extension.id.eq_ignore_ascii_case(id))
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn expand_paths(&mut self) {
        self.python.default_interpreter = self.python.default_interpreter.take().map(expand);
        self.workspace.folders = self.workspace.folders.drain(..).map(expand).collect();
        self.discovery.environment_directories = self
            .discovery
            .environment_directories
            .drain(..)
            .map(expand)
            .collect();
        self.discovery.probe = shellexpand::tilde(&self.discovery.probe).into_owned();
        self.backends.rich.command = shellexpand::tilde(&self.backends.rich.command).into_owned();
        self.backends.basic.command = shellexpand::tilde(&self.backends.basic.command).into_owned();
    }
}

fn expand(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(raw) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
        None => path,
    }
}
