//! The `serve` command: run the watcher against a standalone host.

use crate::console::Console;
use crate::discover;
use crate::host::StandaloneHost;
use crate::reload;
use anyhow::Result;
use lswatch_config::Config;
use lswatch_core::{LanguageServerWatcher, NotebookExperiment, ProxyFactory};
use lswatch_lsp::StdioProxyFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct ServeOptions {
    pub folders: Vec<PathBuf>,
    pub trusted: bool,
    /// File to watch for changes.
    pub config_path: Option<PathBuf>,
}

pub async fn serve(config: Config, options: ServeOptions) -> Result<()> {
    let host = Arc::new(StandaloneHost::new(&config, &options.folders, options.trusted));
    info!(
        folders = options.folders.len(),
        trusted = options.trusted,
        backend = %host.backend_for(None),
        "Starting lswatch"
    );

    let discovered = if config.discovery.enabled {
        match discover::discover(&config, options.folders.clone(), Arc::clone(&host.telemetry)).await {
            Ok(envs) => {
                discover::seed_interpreters(&host, &envs);
                envs
            }
            Err(e) => {
                warn!(error = %e, "Interpreter discovery failed");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let proxies: Arc<dyn ProxyFactory> = Arc::new(StdioProxyFactory::from_config(&config));
    let services = host.services(proxies);
    let experiment = NotebookExperiment::new(&services);
    let watcher = LanguageServerWatcher::new(&services, Arc::clone(&experiment));
    experiment.activate();

    // A backend that fails to start is reported by the watcher; the console
    // stays usable so the user can switch backends.
    if let Err(e) = watcher.activate(None).await {
        warn!(error = %e, "Initial language server did not start");
    }

    let (events, received) = mpsc::unbounded_channel();
    let event_loop = tokio::spawn(Arc::clone(&watcher).run(received));

    let reloader = options
        .config_path
        .filter(|path| path.exists())
        .and_then(|path| {
            reload::watch(path, Arc::clone(&host), Some(Arc::clone(&experiment)), events.clone())
                .map_err(|e| warn!(error = %e, "Configuration changes will not be picked up"))
                .ok()
        });

    let console = Console::new(host, Arc::clone(&watcher), Arc::clone(&experiment), discovered);
    let mut stdout = std::io::stdout();
    let result = tokio::select! {
        result = console.run(BufReader::new(tokio::io::stdin()), &mut stdout) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    drop(reloader);
    drop(events);
    if let Err(e) = event_loop.await {
        warn!(error = %e, "Host event loop failed");
    }
    watcher.shutdown().await;
    experiment.dispose();
    result
}
