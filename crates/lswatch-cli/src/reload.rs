//! Re-apply the configuration file when it changes on disk.

use crate::host::StandaloneHost;
use lswatch_config::Config;
use lswatch_core::host::ExtensionRegistry;
use lswatch_core::{ConfigurationChange, HostEvent, NotebookExperiment};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Editors often write a file in several steps.
const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Keeps the file watch alive. Dropping it stops reloading.
pub struct ConfigReloader {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ConfigReloader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch `path` and feed the resulting host events to `events`.
///
/// A notebook companion added by the new file is reported to `experiment`.
pub fn watch(
    path: PathBuf,
    host: Arc<StandaloneHost>,
    experiment: Option<Arc<NotebookExperiment>>,
    events: mpsc::UnboundedSender<HostEvent>,
) -> notify::Result<ConfigReloader> {
    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel::<()>();
    let target = path.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if event.paths.iter().any(|changed| changed.ends_with(file_name(&target))) => {
            let _ = changed_tx.send(());
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Configuration watch error"),
    })?;

    // Watch the directory; editors replace files rather than write in place.
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    watcher.watch(&directory, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "Watching configuration file");

    let task = tokio::spawn(async move {
        while changed_rx.recv().await.is_some() {
            tokio::time::sleep(SETTLE_DELAY).await;
            while changed_rx.try_recv().is_ok() {}

            let config = match Config::load(Some(&path)) {
                Ok(config) => config,
                Err(e) => {
                    warn!(error = %e, "Ignoring invalid configuration");
                    continue;
                }
            };
            debug!(path = %path.display(), "Configuration reloaded");
            let event = apply(&host, &config);
            if let Some(experiment) = &experiment {
                if host.has_notebook_companion() {
                    experiment.on_notebook_companion_installed().await;
                }
            }
            if let Some(event) = event {
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    });

    Ok(ConfigReloader {
        _watcher: watcher,
        task,
    })
}

fn file_name(path: &Path) -> &Path {
    path.file_name().map(Path::new).unwrap_or(path)
}

/// Push a reloaded configuration into the host. Returns the event the
/// watcher should see, if settings changed.
pub fn apply(host: &StandaloneHost, config: &Config) -> Option<HostEvent> {
    for extension in &config.extensions {
        let installed = host.extensions.extension(&extension.id);
        if installed.map(|info| info.version) != Some(extension.version.clone()) {
            host.extensions.install(&extension.id, extension.version.as_deref());
        }
    }

    if host.configuration.replace(config.settings()) {
        info!("Python settings changed");
        Some(HostEvent::ConfigurationChanged(ConfigurationChange::new(["python"])))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lswatch_config::ExtensionConfig;
    use lswatch_core::BackendType;
    use lswatch_core::host::ConfigurationService;
    use std::io::Write;

    fn host(config: &Config) -> StandaloneHost {
        StandaloneHost::new(config, &[PathBuf::from("/work/a")], true)
    }

    #[tokio::test]
    async fn test_apply_reports_setting_changes_only() {
        let mut config = Config::default();
        config.backends.rich.command = "definitely-not-a-real-server-12345".to_string();
        let host = host(&config);

        assert!(apply(&host, &config).is_none());

        config.python.language_server = "Jedi".to_string();
        match apply(&host, &config) {
            Some(HostEvent::ConfigurationChanged(change)) => {
                assert!(change.affects_globally("python.languageServer"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(host.configuration.settings(None).language_server, BackendType::Basic);
    }

    #[tokio::test]
    async fn test_apply_installs_new_extensions() {
        let mut config = Config::default();
        config.backends.rich.command = "definitely-not-a-real-server-12345".to_string();
        let host = host(&config);
        let mut changes = host.extensions.subscribe();

        config.extensions.push(ExtensionConfig {
            id: "ms-toolsai.jupyter".to_string(),
            version: Some("2022.4.100".to_string()),
        });
        assert!(apply(&host, &config).is_none());
        changes.recv().await.unwrap();
        assert!(host.has_notebook_companion());

        // Unchanged on the second pass.
        apply(&host, &config);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_file_does_not_stop_watching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[python]\nlanguage_server = \"Default\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        let host = Arc::new(host(&config));
        let (events, mut received) = mpsc::unbounded_channel();
        let _reloader = watch(path.clone(), Arc::clone(&host), None, events).unwrap();

        std::fs::write(&path, "[python\n").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[python]\nlanguage_server = \"Jedi\"").unwrap();
        drop(file);

        let event = tokio::time::timeout(Duration::from_secs(10), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, HostEvent::ConfigurationChanged(_)));
        assert_eq!(host.configuration.settings(None).language_server, BackendType::Basic);
    }
}
