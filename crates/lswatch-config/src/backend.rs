//! Backend type selection and the `python.language_server` setting.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// The language server backends lswatch can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendType {
    /// Full-capability backend, one instance for the whole process.
    Rich,
    /// Reduced-capability backend, one instance per workspace folder.
    Basic,
    /// Inert backend, one instance for the whole process.
    Disabled,
}

impl BackendType {
    /// Stable name of the backend type.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendType::Rich => "Rich",
            BackendType::Basic => "Basic",
            BackendType::Disabled => "Disabled",
        }
    }

    /// Whether a single instance serves every workspace folder.
    pub fn is_singleton(self) -> bool {
        matches!(self, BackendType::Rich | BackendType::Disabled)
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `python.language_server` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageServerSetting {
    /// Backend the setting resolves to.
    pub backend: BackendType,
    /// True when the user left the setting at its default.
    pub is_default: bool,
}

impl LanguageServerSetting {
    /// Parse a setting value.
    ///
    /// Matching is case-insensitive and accepts both the editor-facing names
    /// (`Pylance`, `Jedi`, `None`) and the backend names. Unknown values fall
    /// back to [`BackendType::Disabled`].
    pub fn parse(value: &str) -> Self {
        let backend = match value.trim().to_ascii_lowercase().as_str() {
            "" | "default" => {
                return Self {
                    backend: BackendType::Rich,
                    is_default: true,
                }
            }
            "pylance" | "node" | "rich" => BackendType::Rich,
            "jedi" | "jedilsp" | "basic" => BackendType::Basic,
            "none" | "disabled" => BackendType::Disabled,
            other => {
                warn!(value = other, "Unknown language server setting, falling back to Disabled");
                BackendType::Disabled
            }
        };

        Self {
            backend,
            is_default: false,
        }
    }
}
