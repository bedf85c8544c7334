//! Language server orchestration for lswatch.
//!
//! This crate decides which language server backend is alive, for which
//! workspace folder, under which interpreter.
//!
//! # Architecture
//!
//! - [`LanguageServerWatcher`]: the state machine reacting to host events
//!   (settings, interpreter, workspace folders, installed extensions)
//! - [`Registry`]: at most one live backend manager per [`RegistryKey`]
//! - [`LanguageServerExtensionManager`]: one backend lifecycle, with Rich,
//!   Basic and Disabled variants
//! - [`NotebookExperiment`]: the notebook experiment flag, gated on companion
//!   extension versions (see [`gate`])
//!
//! The host editor is reached only through the traits in [`host`], handed to
//! the watcher once through [`Services`].

pub mod debounce;
mod environment;
mod error;
mod events;
pub mod experiment;
pub mod gate;
pub mod host;
mod integration;
pub mod managers;
mod options;
pub mod poll;
mod registry;
mod server;
mod services;
pub mod telemetry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod watcher;
mod workspace;

pub use debounce::Debouncer;
pub use environment::{Architecture, EnvKind, PythonEnvironment, PythonVersion};
pub use error::LanguageServerError;
pub use events::{ConfigurationChange, HostEvent, WorkspaceFoldersChange, LANGUAGE_SERVER_SETTING};
pub use experiment::{ExperimentState, LanguageServerRestarter, NotebookExperiment};
pub use integration::{NotebookIntegration, PythonPathFunction};
pub use managers::{LanguageServerExtensionManager, ManagerFactory, ManagerState};
pub use options::{AnalysisOptions, DocumentFilter, LanguageClientOptions};
pub use registry::{KeyState, ManagerStatus, Registry, RegistryEntry, RegistryKey};
pub use server::{ClientSession, LanguageServer, LanguageServerProxy, ProxyFactory, StartRequest};
pub use services::Services;
pub use telemetry::{DiscoverySummary, TelemetryEvent, TelemetrySink, TracingTelemetry};
pub use watcher::{LanguageServerWatcher, RESTART_COMMAND_ID};
pub use workspace::{containing_folder, normalize_path, WorkspaceFolder, WorkspaceIdentity};

// Re-exported so hosts don't need a direct dependency on the config crate.
pub use lswatch_config::{BackendType, Settings};
