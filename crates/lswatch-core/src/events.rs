//! Host notifications the watcher reacts to.

use crate::workspace::{normalize_path, WorkspaceFolder};
use std::path::{Path, PathBuf};

/// Setting section selecting the backend.
pub const LANGUAGE_SERVER_SETTING: &str = "python.languageServer";

#[derive(Debug, Clone)]
pub enum HostEvent {
    ConfigurationChanged(ConfigurationChange),
    InterpreterChanged { resource: Option<PathBuf> },
    WorkspaceFoldersChanged(WorkspaceFoldersChange),
    /// Analysis options changed; the running backends must pick them up.
    AnalysisOptionsChanged,
    RestartRequested,
}

/// Which settings changed, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationChange {
    pub sections: Vec<String>,
    /// Folder the change applies to; `None` for user or global settings.
    pub scope: Option<PathBuf>,
}

impl ConfigurationChange {
    pub fn new(sections: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            sections: sections.into_iter().map(Into::into).collect(),
            scope: None,
        }
    }

    pub fn scoped(mut self, folder: impl Into<PathBuf>) -> Self {
        self.scope = Some(folder.into());
        self
    }

    /// Whether `section`, or a parent or child of it, changed for `folder`.
    pub fn affects(&self, section: &str, folder: &Path) -> bool {
        let in_scope = match &self.scope {
            Some(scope) => normalize_path(folder).starts_with(normalize_path(scope))
                || normalize_path(scope).starts_with(normalize_path(folder)),
            None => true,
        };
        in_scope && self.touches(section)
    }

    /// Whether `section` changed in a global scope.
    pub fn affects_globally(&self, section: &str) -> bool {
        self.scope.is_none() && self.touches(section)
    }

    fn touches(&self, section: &str) -> bool {
        self.sections.iter().any(|changed| {
            changed == section
                || section.starts_with(&format!("{changed}."))
                || changed.starts_with(&format!("{section}."))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceFoldersChange {
    pub added: Vec<WorkspaceFolder>,
    pub removed: Vec<WorkspaceFolder>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affects_section_hierarchy() {
        let change = ConfigurationChange::new(["python"]);
        assert!(change.affects(LANGUAGE_SERVER_SETTING, Path::new("/work")));

        let change = ConfigurationChange::new(["python.languageServer"]);
        assert!(change.affects(LANGUAGE_SERVER_SETTING, Path::new("/work")));
        assert!(change.affects_globally(LANGUAGE_SERVER_SETTING));

        let change = ConfigurationChange::new(["python.languageServerLog"]);
        assert!(!change.affects(LANGUAGE_SERVER_SETTING, Path::new("/work")));

        let change = ConfigurationChange::new(["editor.fontSize"]);
        assert!(!change.affects(LANGUAGE_SERVER_SETTING, Path::new("/work")));
    }

    #[test]
    fn test_affects_scope() {
        let change = ConfigurationChange::new([LANGUAGE_SERVER_SETTING]).scoped("/work/a");
        assert!(change.affects(LANGUAGE_SERVER_SETTING, Path::new("/work/a")));
        assert!(!change.affects(LANGUAGE_SERVER_SETTING, Path::new("/work/b")));
        assert!(!change.affects_globally(LANGUAGE_SERVER_SETTING));
    }
}
