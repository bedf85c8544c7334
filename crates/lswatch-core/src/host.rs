//! Seams to the host editor.
//!
//! The watcher never talks to an editor directly. Each capability it needs
//! (settings, installed extensions, workspace folders, the active
//! interpreter, user-facing messages, command registration) is a trait here,
//! implemented by the embedding host and by the fakes in `testing`.

use crate::environment::PythonEnvironment;
use crate::workspace::{containing_folder, WorkspaceFolder};
use async_trait::async_trait;
use lswatch_config::Settings;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Resolved Python settings, optionally scoped to a resource.
pub trait ConfigurationService: Send + Sync {
    fn settings(&self, resource: Option<&Path>) -> Settings;
}

/// An installed extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub id: String,
    pub version: Option<String>,
}

/// Installed host extensions.
pub trait ExtensionRegistry: Send + Sync {
    /// Look up an installed extension by id.
    fn extension(&self, id: &str) -> Option<ExtensionInfo>;

    /// Subscribe to "the set of installed extensions changed".
    fn subscribe(&self) -> broadcast::Receiver<()>;
}

/// Open workspace folders and workspace trust.
pub trait WorkspaceService: Send + Sync {
    fn workspace_folders(&self) -> Vec<WorkspaceFolder>;

    /// The folder containing `resource`, if any.
    fn workspace_folder(&self, resource: &Path) -> Option<WorkspaceFolder> {
        containing_folder(&self.workspace_folders(), resource).cloned()
    }

    fn is_trusted(&self) -> bool;
}

/// Interpreter selection.
#[async_trait]
pub trait InterpreterService: Send + Sync {
    /// The interpreter currently selected for `resource`.
    async fn active_interpreter(&self, resource: Option<&Path>) -> Option<PythonEnvironment>;

    /// Best guess at the folder the user is working in when no resource is
    /// given.
    fn active_workspace_folder(&self, resource: Option<&Path>) -> Option<PathBuf>;
}

/// User-facing messages.
pub trait ApplicationShell: Send + Sync {
    fn show_warning_message(&self, message: &str);
    fn show_information_message(&self, message: &str);
}

pub type CommandHandler = Arc<dyn Fn() + Send + Sync>;

/// Host command registration.
pub trait CommandManager: Send + Sync {
    fn register_command(&self, id: &str, handler: CommandHandler) -> CommandRegistration;
}

/// A registered command. Disposing it unregisters the handler.
pub struct CommandRegistration {
    id: String,
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl CommandRegistration {
    pub fn new(id: impl Into<String>, unregister: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: id.into(),
            unregister: Some(Box::new(unregister)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.unregister.is_none()
    }

    /// Unregister the command. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl fmt::Debug for CommandRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistration")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
