use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Resolves the interpreter a notebook runs under.
pub type PythonPathFunction = Arc<dyn Fn(&Path) -> Option<PathBuf> + Send + Sync>;

/// Hooks the notebook companion registers once it has activated.
#[derive(Default)]
pub struct NotebookIntegration {
    python_path: RwLock<Option<PythonPathFunction>>,
}

impl NotebookIntegration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_python_path_function(&self, function: PythonPathFunction) {
        *self.python_path.write().unwrap_or_else(PoisonError::into_inner) = Some(function);
    }

    pub fn python_path_function(&self) -> Option<PythonPathFunction> {
        self.python_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
