//! Line-oriented console that stands in for editor events.

use crate::host::StandaloneHost;
use anyhow::{bail, Context, Result};
use lswatch_core::gate::NOTEBOOK_COMPANION_ID;
use lswatch_core::host::WorkspaceService;
use lswatch_core::{
    ConfigurationChange, HostEvent, KeyState, LanguageServerWatcher, NotebookExperiment,
    PythonEnvironment, WorkspaceFoldersChange, LANGUAGE_SERVER_SETTING, RESTART_COMMAND_ID,
};
use lswatch_discovery::DiscoveredEnvironment;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

const NOTEBOOKS_SETTING: &str = "python.lspNotebooks";

const HELP: &str = "\
Commands:
  open <file>                      start (or reuse) the backend serving <file>
  add <dir>                        open a workspace folder
  remove <dir>                     close a workspace folder
  interpreter <python> [dir]       select an interpreter, optionally for one folder
  set <language-server> [dir]      set python.languageServer (Default, Pylance, Jedi, None)
  notebooks on|off                 toggle the LSP notebooks opt-in
  install <extension> [version]    install an extension
  uninstall <extension>            uninstall an extension
  restart                          run the restart command
  status                           show running backends
  quit                             shut down and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Open(PathBuf),
    Add(PathBuf),
    Remove(PathBuf),
    Interpreter {
        python: String,
        folder: Option<PathBuf>,
    },
    Set {
        value: String,
        folder: Option<PathBuf>,
    },
    Notebooks(bool),
    Install {
        id: String,
        version: Option<String>,
    },
    Uninstall(String),
    Restart,
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            bail!("empty command");
        };
        let args: Vec<&str> = words.collect();

        let command = match (command, args.as_slice()) {
            ("open", [file]) => ConsoleCommand::Open(PathBuf::from(file)),
            ("add", [dir]) => ConsoleCommand::Add(PathBuf::from(dir)),
            ("remove", [dir]) => ConsoleCommand::Remove(PathBuf::from(dir)),
            ("interpreter", [python]) => ConsoleCommand::Interpreter {
                python: python.to_string(),
                folder: None,
            },
            ("interpreter", [python, dir]) => ConsoleCommand::Interpreter {
                python: python.to_string(),
                folder: Some(PathBuf::from(dir)),
            },
            ("set", [value]) => ConsoleCommand::Set {
                value: value.to_string(),
                folder: None,
            },
            ("set", [value, dir]) => ConsoleCommand::Set {
                value: value.to_string(),
                folder: Some(PathBuf::from(dir)),
            },
            ("notebooks", ["on"]) => ConsoleCommand::Notebooks(true),
            ("notebooks", ["off"]) => ConsoleCommand::Notebooks(false),
            ("install", [id]) => ConsoleCommand::Install {
                id: id.to_string(),
                version: None,
            },
            ("install", [id, version]) => ConsoleCommand::Install {
                id: id.to_string(),
                version: Some(version.to_string()),
            },
            ("uninstall", [id]) => ConsoleCommand::Uninstall(id.to_string()),
            ("restart", []) => ConsoleCommand::Restart,
            ("status", []) => ConsoleCommand::Status,
            ("help", []) => ConsoleCommand::Help,
            ("quit" | "exit", []) => ConsoleCommand::Quit,
            (other, _) => bail!("unknown or malformed command '{other}' (try 'help')"),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    host: Arc<StandaloneHost>,
    watcher: Arc<LanguageServerWatcher>,
    experiment: Arc<NotebookExperiment>,
    discovered: Vec<DiscoveredEnvironment>,
}

impl Console {
    pub fn new(
        host: Arc<StandaloneHost>,
        watcher: Arc<LanguageServerWatcher>,
        experiment: Arc<NotebookExperiment>,
        discovered: Vec<DiscoveredEnvironment>,
    ) -> Self {
        Self {
            host,
            watcher,
            experiment,
            discovered,
        }
    }

    /// Read commands from `input` until `quit` or end of input.
    pub async fn run<R>(&self, input: R, out: &mut dyn Write) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let flow = match line.parse::<ConsoleCommand>() {
                Ok(command) => self.execute(command, out).await,
                Err(e) => Err(e),
            };
            match flow {
                Ok(Flow::Quit) => return Ok(()),
                Ok(Flow::Continue) => {}
                Err(e) => writeln!(out, "error: {e:#}")?,
            }
        }
        debug!("Console input closed");
        Ok(())
    }

    pub async fn execute(&self, command: ConsoleCommand, out: &mut dyn Write) -> Result<Flow> {
        match command {
            ConsoleCommand::Open(file) => {
                let file = absolute(&file)?;
                let server = self.watcher.get(Some(file.as_path())).await?;
                let workspace = self.watcher.workspace_identity(Some(file.as_path()));
                writeln!(
                    out,
                    "{} serving {} (connected: {})",
                    self.watcher.backend_type().await,
                    workspace,
                    server.is_connected()
                )?;
            }
            ConsoleCommand::Add(dir) => {
                let dir = absolute(&dir)?;
                match self.host.workspace.add_folder(&dir) {
                    Some(folder) => {
                        writeln!(out, "opened {}", folder.path.display())?;
                        self.watcher
                            .handle_event(HostEvent::WorkspaceFoldersChanged(WorkspaceFoldersChange {
                                added: vec![folder],
                                removed: Vec::new(),
                            }))
                            .await;
                    }
                    None => writeln!(out, "{} is already open", dir.display())?,
                }
            }
            ConsoleCommand::Remove(dir) => {
                let dir = absolute(&dir)?;
                match self.host.workspace.remove_folder(&dir) {
                    Some(folder) => {
                        writeln!(out, "closed {}", folder.path.display())?;
                        self.watcher
                            .handle_event(HostEvent::WorkspaceFoldersChanged(WorkspaceFoldersChange {
                                added: Vec::new(),
                                removed: vec![folder],
                            }))
                            .await;
                    }
                    None => writeln!(out, "{} is not open", dir.display())?,
                }
            }
            ConsoleCommand::Interpreter { python, folder } => {
                let folder = folder.as_deref().map(absolute).transpose()?;
                let interpreter = self.resolve_interpreter(&python);
                writeln!(out, "selected {}", interpreter.executable.display())?;
                self.host.interpreters.select(folder.as_deref(), interpreter);
                self.watcher
                    .handle_event(HostEvent::InterpreterChanged { resource: folder })
                    .await;
            }
            ConsoleCommand::Set { value, folder } => {
                let folder = folder.as_deref().map(absolute).transpose()?;
                self.host.configuration.set_language_server(&value, folder.as_deref());
                let mut change = ConfigurationChange::new([LANGUAGE_SERVER_SETTING]);
                if let Some(folder) = folder {
                    change = change.scoped(folder);
                }
                self.watcher
                    .handle_event(HostEvent::ConfigurationChanged(change))
                    .await;
                writeln!(out, "language server: {}", self.watcher.backend_type().await)?;
            }
            ConsoleCommand::Notebooks(enabled) => {
                self.host.configuration.set_notebooks_enabled(enabled);
                self.watcher
                    .handle_event(HostEvent::ConfigurationChanged(ConfigurationChange::new([
                        NOTEBOOKS_SETTING,
                    ])))
                    .await;
                writeln!(
                    out,
                    "notebooks {} (takes effect after a restart)",
                    if enabled { "on" } else { "off" }
                )?;
            }
            ConsoleCommand::Install { id, version } => {
                self.host.extensions.install(&id, version.as_deref());
                if id.eq_ignore_ascii_case(NOTEBOOK_COMPANION_ID) {
                    self.experiment.on_notebook_companion_installed().await;
                }
                writeln!(out, "installed {id}")?;
            }
            ConsoleCommand::Uninstall(id) => {
                if self.host.extensions.uninstall(&id) {
                    writeln!(out, "uninstalled {id}")?;
                } else {
                    writeln!(out, "{id} is not installed")?;
                }
            }
            ConsoleCommand::Restart => {
                if !self.host.commands.execute(RESTART_COMMAND_ID) {
                    bail!("{RESTART_COMMAND_ID} is not registered");
                }
                writeln!(out, "restart scheduled")?;
            }
            ConsoleCommand::Status => self.write_status(out).await?,
            ConsoleCommand::Help => writeln!(out, "{HELP}")?,
            ConsoleCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn write_status(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "language server: {}", self.watcher.backend_type().await)?;
        writeln!(out, "notebook experiment: {:?}", self.experiment.state())?;
        if self.host.has_notebook_companion() {
            writeln!(out, "notebook companion: installed")?;
        }
        for folder in self.host.workspace.workspace_folders() {
            writeln!(
                out,
                "folder {} ({})",
                folder.path.display(),
                self.host.backend_for(Some(folder.path.as_path()))
            )?;
        }

        let status = self.watcher.status();
        if status.is_empty() {
            writeln!(out, "no language servers")?;
        }
        for entry in status {
            writeln!(
                out,
                "{:<24} {:<9} {:<14} {}",
                entry.key.to_string(),
                entry.backend.as_str(),
                describe(entry.state),
                entry.workspace
            )?;
        }
        Ok(())
    }

    /// A discovered environment matching `python` by executable or name,
    /// otherwise a bare interpreter path.
    fn resolve_interpreter(&self, python: &str) -> PythonEnvironment {
        let path = Path::new(python);
        self.discovered
            .iter()
            .find(|env| env.executable == path || env.name.as_deref() == Some(python))
            .map(DiscoveredEnvironment::to_python_environment)
            .unwrap_or_else(|| PythonEnvironment::new(path))
    }
}

fn describe(state: KeyState) -> &'static str {
    match state {
        KeyState::NoManager => "none",
        KeyState::Starting => "starting",
        KeyState::Running { inert: true } => "unavailable",
        KeyState::Running { inert: false } => "running",
        KeyState::Stopping => "stopping",
    }
}

pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("cannot resolve relative path")?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lswatch_config::Config;
    use lswatch_core::testing::{settle, RecordingProxyFactory};
    use serial_test::serial;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "open /work/a/main.py".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Open(PathBuf::from("/work/a/main.py"))
        );
        assert_eq!(
            "set Jedi /work/a".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Set {
                value: "Jedi".to_string(),
                folder: Some(PathBuf::from("/work/a")),
            }
        );
        assert_eq!(
            "notebooks on".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Notebooks(true)
        );
        assert_eq!("exit".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Quit);
    }

    #[test]
    fn test_parse_rejects_malformed_commands() {
        assert!("".parse::<ConsoleCommand>().is_err());
        assert!("notebooks maybe".parse::<ConsoleCommand>().is_err());
        assert!("open".parse::<ConsoleCommand>().is_err());
        assert!("frobnicate".parse::<ConsoleCommand>().is_err());
    }

    struct Fixture {
        console: Console,
        proxies: Arc<RecordingProxyFactory>,
        watcher: Arc<LanguageServerWatcher>,
    }

    fn fixture(language_server: &str, folders: &[&str]) -> Fixture {
        let mut config = Config::default();
        config.python.language_server = language_server.to_string();
        config.backends.rich.command = "definitely-not-a-real-server-12345".to_string();
        let folders: Vec<PathBuf> = folders.iter().map(PathBuf::from).collect();

        let host = Arc::new(StandaloneHost::new(&config, &folders, true));
        let proxies = Arc::new(RecordingProxyFactory::default());
        let services = host.services(proxies.clone());
        let experiment = NotebookExperiment::new(&services);
        let watcher = LanguageServerWatcher::new(&services, Arc::clone(&experiment));
        Fixture {
            console: Console::new(host, Arc::clone(&watcher), experiment, Vec::new()),
            proxies,
            watcher,
        }
    }

    async fn run_script(console: &Console, script: &str) -> String {
        let mut out = Vec::new();
        console.run(script.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    #[serial]
    async fn test_basic_folders_start_and_stop_independently() {
        let fixture = fixture("Jedi", &["/work/a", "/work/b"]);

        let output = run_script(
            &fixture.console,
            "open /work/a/main.py\nopen /work/b/main.py\nremove /work/b\nstatus\nquit\nopen /work/c/x.py\n",
        )
        .await;

        assert!(output.contains("Basic serving /work/a"));
        assert!(output.contains("closed /work/b"));
        assert_eq!(fixture.proxies.total_starts(), 2);
        assert_eq!(fixture.proxies.proxy(0).disposes(), 0);
        assert_eq!(fixture.proxies.proxy(1).disposes(), 1);
        assert_eq!(fixture.watcher.status().len(), 1);
        fixture.watcher.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_switching_backend_replaces_servers() {
        let fixture = fixture("Jedi", &["/work/a"]);

        let output = run_script(&fixture.console, "open /work/a/main.py\nset None\nstatus\n").await;

        assert!(output.contains("language server: Disabled"));
        assert_eq!(fixture.proxies.proxy(0).disposes(), 1);
        let status = fixture.watcher.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].backend, lswatch_config::BackendType::Disabled);
        fixture.watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_restart_command_is_debounced() {
        let fixture = fixture("Jedi", &["/work/a"]);

        let output = run_script(
            &fixture.console,
            "open /work/a/main.py\nrestart\nrestart\nrestart\n",
        )
        .await;
        assert_eq!(output.matches("restart scheduled").count(), 3);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(fixture.proxies.total_starts(), 2);
        fixture.watcher.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_errors_are_reported_and_console_continues() {
        let fixture = fixture("Jedi", &[]);

        let output = run_script(&fixture.console, "bogus\nuninstall nothing.here\nhelp\n").await;
        assert!(output.contains("error: unknown or malformed command 'bogus'"));
        assert!(output.contains("nothing.here is not installed"));
        assert!(output.contains("Commands:"));
    }
}
