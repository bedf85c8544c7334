//! Language client options handed to a backend at start.

use crate::environment::PythonEnvironment;
use crate::host::WorkspaceService;
use crate::workspace::{WorkspaceFolder, WorkspaceIdentity};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Which documents a backend serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notebook_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl DocumentFilter {
    pub fn language(scheme: &str, language: &str) -> Self {
        Self {
            scheme: Some(scheme.to_string()),
            language: Some(language.to_string()),
            ..Self::default()
        }
    }

    pub fn notebook(notebook_type: &str, pattern: &str) -> Self {
        Self {
            notebook_type: Some(notebook_type.to_string()),
            pattern: Some(pattern.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageClientOptions {
    pub initialization_options: Value,
    pub document_selector: Vec<DocumentFilter>,
    pub workspace_folders: Vec<WorkspaceFolder>,
}

/// Builds [`LanguageClientOptions`] for each backend.
pub struct AnalysisOptions {
    workspace: Arc<dyn WorkspaceService>,
}

impl AnalysisOptions {
    pub fn new(workspace: Arc<dyn WorkspaceService>) -> Self {
        Self { workspace }
    }

    /// Options for the Rich backend, which serves every folder.
    pub fn rich(
        &self,
        interpreter: Option<&PythonEnvironment>,
        notebooks: bool,
    ) -> LanguageClientOptions {
        let mut document_selector = python_documents();
        if notebooks {
            document_selector.push(DocumentFilter::notebook("jupyter-notebook", "**/*.ipynb"));
            document_selector.push(DocumentFilter::notebook("interactive", "**/*.interactive"));
        }

        LanguageClientOptions {
            initialization_options: json!({
                "experimentationSupport": true,
                "trustedWorkspaceSupport": true,
                "lspNotebooksSupport": notebooks,
                "pythonPath": python_path(interpreter),
            }),
            document_selector,
            workspace_folders: self.workspace.workspace_folders(),
        }
    }

    /// Options for the Basic backend, started once per folder.
    pub fn basic(
        &self,
        workspace: &WorkspaceIdentity,
        interpreter: Option<&PythonEnvironment>,
    ) -> LanguageClientOptions {
        let workspace_folders = match workspace.path() {
            Some(path) => vec![WorkspaceFolder::new(path)],
            None => self.workspace.workspace_folders(),
        };

        LanguageClientOptions {
            initialization_options: json!({
                "markupKindPreferred": "markdown",
                "workspace": {
                    "environmentPath": python_path(interpreter),
                },
            }),
            document_selector: python_documents(),
            workspace_folders,
        }
    }
}

fn python_documents() -> Vec<DocumentFilter> {
    vec![
        DocumentFilter::language("file", "python"),
        DocumentFilter::language("untitled", "python"),
    ]
}

fn python_path(interpreter: Option<&PythonEnvironment>) -> Value {
    interpreter
        .map(|python| Value::String(python.executable.display().to_string()))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWorkspace;

    fn options() -> AnalysisOptions {
        AnalysisOptions::new(Arc::new(FakeWorkspace::new(&["/work/a", "/work/b"])))
    }

    #[test]
    fn test_rich_serves_all_folders() {
        let python = PythonEnvironment::new("/usr/bin/python3");
        let options = options().rich(Some(&python), false);

        assert_eq!(options.workspace_folders.len(), 2);
        assert_eq!(options.document_selector.len(), 2);
        assert_eq!(options.initialization_options["lspNotebooksSupport"], false);
        assert_eq!(options.initialization_options["pythonPath"], "/usr/bin/python3");
    }

    #[test]
    fn test_rich_notebook_selector() {
        let options = options().rich(None, true);
        assert!(options
            .document_selector
            .iter()
            .any(|filter| filter.notebook_type.as_deref() == Some("jupyter-notebook")));
        assert_eq!(options.initialization_options["pythonPath"], Value::Null);
    }

    #[test]
    fn test_basic_serves_one_folder() {
        let python = PythonEnvironment::new("/work/a/.venv/bin/python");
        let workspace = WorkspaceIdentity::from_folder("/work/a");
        let options = options().basic(&workspace, Some(&python));

        assert_eq!(options.workspace_folders, vec![WorkspaceFolder::new("/work/a")]);
        assert_eq!(
            options.initialization_options["workspace"]["environmentPath"],
            "/work/a/.venv/bin/python"
        );
    }

    #[test]
    fn test_filter_serialization_skips_unset_fields() {
        let value = serde_json::to_value(DocumentFilter::notebook("jupyter-notebook", "**/*.ipynb")).unwrap();
        assert_eq!(value, json!({"notebookType": "jupyter-notebook", "pattern": "**/*.ipynb"}));
    }
}
