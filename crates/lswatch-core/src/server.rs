//! The process-facing side of a backend.
//!
//! A [`LanguageServerProxy`] owns the actual server process and its LSP
//! session. Managers drive it; the watcher never touches it directly.

use crate::environment::PythonEnvironment;
use crate::error::LanguageServerError;
use crate::integration::PythonPathFunction;
use crate::options::LanguageClientOptions;
use crate::workspace::WorkspaceIdentity;
use async_trait::async_trait;
use lswatch_config::BackendType;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Everything a proxy needs to launch a backend session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub backend: BackendType,
    pub workspace: WorkspaceIdentity,
    pub interpreter: Option<PythonEnvironment>,
    pub options: LanguageClientOptions,
}

#[async_trait]
pub trait LanguageServerProxy: Send + Sync {
    /// Launch the backend and complete the LSP handshake.
    async fn start(&self, request: StartRequest) -> Result<(), LanguageServerError>;

    /// Shut the session down. Must not block.
    fn stop(&self);

    /// Release everything. Safe to call more than once.
    fn dispose(&self);
}

/// Creates a proxy per backend manager.
pub trait ProxyFactory: Send + Sync {
    fn create(&self, backend: BackendType) -> Arc<dyn LanguageServerProxy>;
}

/// Handle callers get back from the watcher.
pub trait LanguageServer: Send + Sync {
    /// Attach the notebook middleware.
    fn connect(&self);

    /// Detach the notebook middleware.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Interpreter for a notebook, when the notebook companion provides one.
    fn resolve_notebook_interpreter(&self, _notebook: &Path) -> Option<PathBuf> {
        None
    }
}

/// Handle backed by a running session.
#[derive(Default)]
pub struct ClientSession {
    connected: AtomicBool,
    python_path: RwLock<Option<PythonPathFunction>>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_python_path_function(&self, function: PythonPathFunction) {
        *self.python_path.write().unwrap_or_else(PoisonError::into_inner) = Some(function);
    }

    pub fn has_python_path_function(&self) -> bool {
        self.python_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl LanguageServer for ClientSession {
    fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn resolve_notebook_interpreter(&self, notebook: &Path) -> Option<PathBuf> {
        let function = self
            .python_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        function(notebook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_connection_toggles() {
        let session = ClientSession::new();
        assert!(!session.is_connected());
        session.connect();
        assert!(session.is_connected());
        session.disconnect();
        assert!(!session.is_connected());
    }

    #[test]
    fn test_session_resolves_through_registered_hook() {
        let session = ClientSession::new();
        assert_eq!(session.resolve_notebook_interpreter(Path::new("/nb.ipynb")), None);

        session.register_python_path_function(Arc::new(|_| Some(PathBuf::from("/env/bin/python"))));
        assert!(session.has_python_path_function());
        assert_eq!(
            session.resolve_notebook_interpreter(Path::new("/nb.ipynb")),
            Some(PathBuf::from("/env/bin/python"))
        );
    }
}
