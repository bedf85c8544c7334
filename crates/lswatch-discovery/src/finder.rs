//! What a discovery probe reports, and the trait probes implement.

use crate::error::DiscoveryError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// An environment as reported by the probe.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NativeEnvInfo {
    #[serde(alias = "kind")]
    pub category: String,
    #[serde(alias = "executable")]
    pub python_executable_path: Option<PathBuf>,
    #[serde(alias = "prefix")]
    pub env_path: Option<PathBuf>,
    pub version: Option<String>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub python_run_command: Option<Vec<String>>,
    #[serde(alias = "project")]
    pub project_path: Option<PathBuf>,
    pub arch: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub creation_time: Option<i64>,
    pub modified_time: Option<i64>,
}

/// A tool binary (conda, pyenv, ...) located by the probe.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeEnvManagerInfo {
    pub tool: String,
    #[serde(alias = "executable")]
    pub executable_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinderEvent {
    Environment(NativeEnvInfo),
    Manager(NativeEnvManagerInfo),
}

/// One probe invocation.
#[async_trait]
pub trait PythonFinder: Send + Sync {
    /// Run a full search, sending events as they arrive. Returns once the
    /// probe signals completion; `events` is dropped at that point.
    async fn search(&self, events: mpsc::UnboundedSender<FinderEvent>)
        -> Result<(), DiscoveryError>;
}
