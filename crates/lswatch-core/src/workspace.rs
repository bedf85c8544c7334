//! Workspace folders and the identity used to key per-folder state.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A folder open in the host workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFolder {
    pub path: PathBuf,
    pub name: String,
}

impl WorkspaceFolder {
    /// Create a folder named after the last path component.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }
}

/// Normalized key identifying a workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkspaceIdentity {
    /// A workspace folder, lexically normalized.
    Folder(PathBuf),
    /// No folder applies.
    Default,
}

impl WorkspaceIdentity {
    /// Identity of a folder path.
    pub fn from_folder(path: impl AsRef<Path>) -> Self {
        WorkspaceIdentity::Folder(normalize_path(path.as_ref()))
    }

    /// The folder path, or `None` for the default identity.
    pub fn path(&self) -> Option<&Path> {
        match self {
            WorkspaceIdentity::Folder(path) => Some(path),
            WorkspaceIdentity::Default => None,
        }
    }

    /// Last path component, used in log lines.
    pub fn basename(&self) -> String {
        match self {
            WorkspaceIdentity::Folder(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            WorkspaceIdentity::Default => "default".to_string(),
        }
    }
}

impl fmt::Display for WorkspaceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceIdentity::Folder(path) => write!(f, "{}", path.display()),
            WorkspaceIdentity::Default => f.write_str("default"),
        }
    }
}

/// Lexically normalize a path: drop `.`, resolve `..`, drop trailing
/// separators. The filesystem is not consulted.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(component.as_os_str()),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// The innermost folder containing `resource`.
pub fn containing_folder<'a>(
    folders: &'a [WorkspaceFolder],
    resource: &Path,
) -> Option<&'a WorkspaceFolder> {
    let resource = normalize_path(resource);
    folders
        .iter()
        .filter(|folder| resource.starts_with(normalize_path(&folder.path)))
        .max_by_key(|folder| normalize_path(&folder.path).components().count())
}
