//! Translation from probe vocabulary to typed records.

use crate::finder::NativeEnvInfo;
use chrono::{DateTime, Utc};
use lswatch_core::{Architecture, EnvKind, PythonEnvironment, PythonVersion};
use serde::Serialize;
use std::path::PathBuf;
use tracing::error;

/// An interpreter found by the native probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredEnvironment {
    pub kind: EnvKind,
    pub executable: PathBuf,
    pub env_path: Option<PathBuf>,
    pub version: Option<PythonVersion>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub python_run_command: Option<Vec<String>>,
    pub search_location: Option<PathBuf>,
    pub arch: Option<Architecture>,
    pub ctime: Option<DateTime<Utc>>,
    pub mtime: Option<DateTime<Utc>>,
    pub identified_using_native_locator: bool,
}

impl DiscoveredEnvironment {
    /// Convert a probe report. `None` when the report has no executable.
    pub fn from_native(info: NativeEnvInfo) -> Option<Self> {
        let executable = info.python_executable_path?;
        Some(Self {
            kind: category_to_kind(&info.category),
            executable,
            env_path: info.env_path,
            version: info.version.as_deref().and_then(PythonVersion::parse),
            name: info.name.filter(|name| !name.is_empty()),
            display_name: info.display_name,
            python_run_command: info.python_run_command,
            search_location: info.project_path,
            arch: info.arch.as_deref().and_then(Architecture::parse),
            ctime: info.creation_time.and_then(DateTime::from_timestamp_millis),
            mtime: info.modified_time.and_then(DateTime::from_timestamp_millis),
            identified_using_native_locator: true,
        })
    }

    /// The interpreter view handed to backends.
    pub fn to_python_environment(&self) -> PythonEnvironment {
        PythonEnvironment {
            executable: self.executable.clone(),
            env_path: self.env_path.clone(),
            kind: self.kind,
            version: self.version.clone(),
            display_name: self.display_name.clone().or_else(|| self.name.clone()),
        }
    }
}

/// Map a probe category to an environment kind. Case-insensitive.
pub fn category_to_kind(category: &str) -> EnvKind {
    match category.to_ascii_lowercase().as_str() {
        "conda" => EnvKind::Conda,
        "system" | "homebrew" | "windowsregistry" | "linuxglobal" | "macpythonorg"
        | "maccommandlinetools" | "macxcode" => EnvKind::System,
        "pyenv" => EnvKind::Pyenv,
        "pipenv" => EnvKind::Pipenv,
        "pyenvvirtualenv" | "virtualenv" => EnvKind::VirtualEnv,
        "virtualenvwrapper" => EnvKind::VirtualEnvWrapper,
        "windowsstore" => EnvKind::MicrosoftStore,
        "venv" => EnvKind::Venv,
        "poetry" => EnvKind::Poetry,
        "hatch" => EnvKind::Hatch,
        _ => {
            error!(category, "Unknown Python environment category from native locator");
            EnvKind::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(category: &str, executable: Option<&str>) -> NativeEnvInfo {
        NativeEnvInfo {
            category: category.to_string(),
            python_executable_path: executable.map(PathBuf::from),
            ..NativeEnvInfo::default()
        }
    }

    #[test]
    fn test_category_mapping_is_case_insensitive() {
        assert_eq!(category_to_kind("Conda"), EnvKind::Conda);
        assert_eq!(category_to_kind("HOMEBREW"), EnvKind::System);
        assert_eq!(category_to_kind("WindowsRegistry"), EnvKind::System);
        assert_eq!(category_to_kind("PyenvVirtualEnv"), EnvKind::VirtualEnv);
        assert_eq!(category_to_kind("windowsstore"), EnvKind::MicrosoftStore);
    }

    #[test]
    fn test_unknown_categories_map_to_unknown() {
        assert_eq!(category_to_kind(""), EnvKind::Unknown);
        assert_eq!(category_to_kind("spack"), EnvKind::Unknown);
        assert_eq!(category_to_kind("🐍"), EnvKind::Unknown);
    }

    #[test]
    fn test_missing_executable_is_not_a_record() {
        assert_eq!(DiscoveredEnvironment::from_native(info("Conda", None)), None);
    }

    #[test]
    fn test_full_record() {
        let mut native = info("Pyenv", Some("/home/u/.pyenv/versions/3.12.1/bin/python"));
        native.env_path = Some(PathBuf::from("/home/u/.pyenv/versions/3.12.1"));
        native.version = Some("3.12.1".to_string());
        native.name = Some(String::new());
        native.display_name = Some("Python 3.12.1".to_string());
        native.arch = Some("X64".to_string());
        native.creation_time = Some(1_700_000_000_000);
        native.python_run_command = Some(vec!["python".to_string()]);
        native.project_path = Some(PathBuf::from("/work/app"));

        let env = DiscoveredEnvironment::from_native(native).unwrap();
        assert_eq!(env.kind, EnvKind::Pyenv);
        assert_eq!(env.name, None);
        assert_eq!(env.arch, Some(Architecture::X64));
        assert_eq!(env.version.as_ref().map(|v| (v.major, v.minor, v.micro)), Some((3, 12, 1)));
        assert_eq!(env.ctime.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(env.mtime, None);
        assert_eq!(env.search_location, Some(PathBuf::from("/work/app")));
        assert!(env.identified_using_native_locator);

        let python = env.to_python_environment();
        assert_eq!(python.major_version(), Some(3));
        assert_eq!(python.display_name.as_deref(), Some("Python 3.12.1"));
    }

    #[test]
    fn test_partial_version_and_odd_arch() {
        let mut native = info("system", Some("/usr/bin/python3"));
        native.version = Some("3.11".to_string());
        native.arch = Some("arm64".to_string());

        let env = DiscoveredEnvironment::from_native(native).unwrap();
        let version = env.version.unwrap();
        assert_eq!((version.major, version.minor, version.micro), (3, 11, -1));
        assert_eq!(version.sys_version, "3.11");
        assert_eq!(env.arch, None);
    }
}
