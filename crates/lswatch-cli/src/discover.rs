//! One-shot interpreter discovery and interpreter seeding.

use crate::host::StandaloneHost;
use anyhow::Result;
use futures_util::StreamExt;
use lswatch_config::Config;
use lswatch_core::host::WorkspaceService;
use lswatch_core::{normalize_path, EnvKind, TelemetrySink};
use lswatch_discovery::{DiscoveredEnvironment, DiscoveryError, NativeLocator, ProcessFinder, PythonFinder};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Run the configured probe once over `folders`.
pub async fn discover(
    config: &Config,
    folders: Vec<PathBuf>,
    telemetry: Arc<dyn TelemetrySink>,
) -> Result<Vec<DiscoveredEnvironment>, DiscoveryError> {
    let finder = ProcessFinder::from_config(&config.discovery, folders)?;
    Ok(discover_with(Arc::new(finder), telemetry).await)
}

/// Drain one discovery pass from `finder`.
pub async fn discover_with(
    finder: Arc<dyn PythonFinder>,
    telemetry: Arc<dyn TelemetrySink>,
) -> Vec<DiscoveredEnvironment> {
    let locator = NativeLocator::new(finder, telemetry);
    let envs: Vec<_> = locator.iter_envs().collect().await;
    locator.dispose();
    info!(count = envs.len(), "Discovery finished");
    envs
}

/// Select discovered interpreters in `host`.
///
/// A folder gets the environment that lives inside it, if any. The
/// fallback is the newest non-project Python 3, unless the configuration
/// already named one.
pub fn seed_interpreters(host: &StandaloneHost, envs: &[DiscoveredEnvironment]) {
    for folder in host.workspace.workspace_folders() {
        if let Some(env) = envs.iter().find(|env| belongs_to(env, &folder.path)) {
            debug!(
                folder = %folder.path.display(),
                python = %env.executable.display(),
                "Selected folder interpreter"
            );
            host.interpreters.select(Some(&folder.path), env.to_python_environment());
        }
    }

    if host.interpreters.default_interpreter().is_some() {
        return;
    }
    if let Some(env) = newest_global(envs) {
        debug!(python = %env.executable.display(), "Selected default interpreter");
        host.interpreters.select(None, env.to_python_environment());
    }
}

fn belongs_to(env: &DiscoveredEnvironment, folder: &Path) -> bool {
    let folder = normalize_path(folder);
    let inside = |path: &PathBuf| normalize_path(path).starts_with(&folder);
    env.search_location.as_ref().is_some_and(inside) || env.env_path.as_ref().is_some_and(inside)
}

fn newest_global(envs: &[DiscoveredEnvironment]) -> Option<&DiscoveredEnvironment> {
    envs.iter()
        .filter(|env| env.search_location.is_none() && !is_virtual(env.kind))
        .filter(|env| env.version.as_ref().is_some_and(|version| version.major == 3))
        .max_by_key(|env| {
            let version = env.version.as_ref().map(|v| (v.major, v.minor, v.micro));
            // Prefer plain installs over tool-managed ones on equal versions.
            (version, matches!(env.kind, EnvKind::System | EnvKind::OtherGlobal))
        })
}

fn is_virtual(kind: EnvKind) -> bool {
    matches!(
        kind,
        EnvKind::Venv
            | EnvKind::VirtualEnv
            | EnvKind::VirtualEnvWrapper
            | EnvKind::Pipenv
            | EnvKind::Poetry
            | EnvKind::Hatch
            | EnvKind::OtherVirtual
    )
}

/// Print `envs` as a table, or as JSON.
pub fn print(envs: &[DiscoveredEnvironment], json: bool, out: &mut dyn Write) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, envs)?;
        writeln!(out)?;
        return Ok(());
    }

    if envs.is_empty() {
        writeln!(out, "No Python environments found")?;
        return Ok(());
    }
    writeln!(out, "{:<14} {:<10} {:<24} EXECUTABLE", "KIND", "VERSION", "NAME")?;
    for env in envs {
        writeln!(
            out,
            "{:<14} {:<10} {:<24} {}",
            env.kind.as_str(),
            env.version.as_ref().map_or("-", |version| version.sys_version.as_str()),
            env.display_name.as_deref().or(env.name.as_deref()).unwrap_or("-"),
            env.executable.display()
        )?;
    }
    Ok(())
}
