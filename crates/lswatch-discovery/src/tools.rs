//! Process-wide slots for environment tool binaries found during discovery.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error};

static CONDA: RwLock<Option<PathBuf>> = RwLock::new(None);
static PYENV: RwLock<Option<PathBuf>> = RwLock::new(None);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownTool {
    Conda,
    Pyenv,
}

impl KnownTool {
    /// Case-insensitive. Unknown tools are logged and yield `None`.
    pub fn parse(tool: &str) -> Option<Self> {
        match tool.to_ascii_lowercase().as_str() {
            "conda" => Some(KnownTool::Conda),
            "pyenv" => Some(KnownTool::Pyenv),
            _ => {
                error!(tool, "Unknown Python tool from native locator");
                None
            }
        }
    }

    fn slot(self) -> &'static RwLock<Option<PathBuf>> {
        match self {
            KnownTool::Conda => &CONDA,
            KnownTool::Pyenv => &PYENV,
        }
    }
}

impl fmt::Display for KnownTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnownTool::Conda => f.write_str("conda"),
            KnownTool::Pyenv => f.write_str("pyenv"),
        }
    }
}

/// Record a tool binary reported by the probe.
pub fn register(tool: &str, executable: &Path) -> Option<KnownTool> {
    let known = KnownTool::parse(tool)?;
    debug!(tool = %known, executable = %executable.display(), "Registering tool binary");
    *known.slot().write().unwrap_or_else(PoisonError::into_inner) = Some(executable.to_path_buf());
    Some(known)
}

/// The binary last registered for `tool`.
pub fn binary(tool: KnownTool) -> Option<PathBuf> {
    tool.slot()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn conda_binary() -> Option<PathBuf> {
    binary(KnownTool::Conda)
}

pub fn pyenv_binary() -> Option<PathBuf> {
    binary(KnownTool::Pyenv)
}

/// Forget every registered binary.
pub fn clear() {
    for tool in [KnownTool::Conda, KnownTool::Pyenv] {
        *tool.slot().write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_register_known_tools() {
        clear();
        assert_eq!(register("Conda", Path::new("/opt/conda/bin/conda")), Some(KnownTool::Conda));
        assert_eq!(register("PYENV", Path::new("/usr/bin/pyenv")), Some(KnownTool::Pyenv));

        assert_eq!(conda_binary(), Some(PathBuf::from("/opt/conda/bin/conda")));
        assert_eq!(pyenv_binary(), Some(PathBuf::from("/usr/bin/pyenv")));
        clear();
    }

    #[test]
    #[serial]
    fn test_unknown_tool_is_ignored() {
        clear();
        assert_eq!(register("poetry", Path::new("/usr/bin/poetry")), None);
        assert_eq!(conda_binary(), None);
        assert_eq!(pyenv_binary(), None);
    }
}
