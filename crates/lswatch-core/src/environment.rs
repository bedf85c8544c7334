//! Python interpreter metadata shared by discovery and the watcher.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Where a Python environment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EnvKind {
    Unknown,
    System,
    MicrosoftStore,
    Pyenv,
    Poetry,
    ActiveState,
    Hatch,
    Custom,
    OtherGlobal,
    Venv,
    VirtualEnv,
    VirtualEnvWrapper,
    Pipenv,
    Conda,
    OtherVirtual,
}

impl EnvKind {
    /// Every kind, in reporting order.
    pub const ALL: [EnvKind; 15] = [
        EnvKind::Unknown,
        EnvKind::System,
        EnvKind::MicrosoftStore,
        EnvKind::Pyenv,
        EnvKind::Poetry,
        EnvKind::ActiveState,
        EnvKind::Hatch,
        EnvKind::Custom,
        EnvKind::OtherGlobal,
        EnvKind::Venv,
        EnvKind::VirtualEnv,
        EnvKind::VirtualEnvWrapper,
        EnvKind::Pipenv,
        EnvKind::Conda,
        EnvKind::OtherVirtual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnvKind::Unknown => "unknown",
            EnvKind::System => "system",
            EnvKind::MicrosoftStore => "microsoftStore",
            EnvKind::Pyenv => "pyenv",
            EnvKind::Poetry => "poetry",
            EnvKind::ActiveState => "activeState",
            EnvKind::Hatch => "hatch",
            EnvKind::Custom => "custom",
            EnvKind::OtherGlobal => "otherGlobal",
            EnvKind::Venv => "venv",
            EnvKind::VirtualEnv => "virtualEnv",
            EnvKind::VirtualEnvWrapper => "virtualEnvWrapper",
            EnvKind::Pipenv => "pipEnv",
            EnvKind::Conda => "conda",
            EnvKind::OtherVirtual => "otherVirtual",
        }
    }
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `major.minor.micro` version. Missing parts are `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PythonVersion {
    pub major: i64,
    pub minor: i64,
    pub micro: i64,
    /// The raw version string.
    pub sys_version: String,
}

impl PythonVersion {
    /// Parse a version string such as `3.12.1` or `3.13.0rc1`.
    ///
    /// Returns `None` for an empty string.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let mut parts = raw.split('.').map(leading_number);
        let mut next = || parts.next().flatten().unwrap_or(-1);
        Some(Self {
            major: next(),
            minor: next(),
            micro: next(),
            sys_version: raw.to_string(),
        })
    }
}

fn leading_number(part: &str) -> Option<i64> {
    let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// CPU architecture of an interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Architecture {
    X64,
    X86,
}

impl Architecture {
    /// Case-insensitive parse; anything but `x64`/`x86` is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "x64" => Some(Architecture::X64),
            "x86" => Some(Architecture::X86),
            _ => None,
        }
    }
}

/// The interpreter a backend is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PythonEnvironment {
    pub executable: PathBuf,
    pub env_path: Option<PathBuf>,
    pub kind: EnvKind,
    pub version: Option<PythonVersion>,
    pub display_name: Option<String>,
}

impl PythonEnvironment {
    /// An interpreter known only by its executable.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            env_path: None,
            kind: EnvKind::Unknown,
            version: None,
            display_name: None,
        }
    }

    pub fn with_version(mut self, version: PythonVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_kind(mut self, kind: EnvKind) -> Self {
        self.kind = kind;
        self
    }

    /// Major version, when known.
    pub fn major_version(&self) -> Option<i64> {
        self.version.as_ref().map(|version| version.major)
    }
}
