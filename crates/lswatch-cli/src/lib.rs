//! Command-line host for lswatch.
//!
//! `lswatch serve` runs the language server watcher against a standalone
//! host: workspace folders come from the command line or the configuration
//! file, and an interactive console on stdin stands in for the editor.

pub mod console;
pub mod discover;
pub mod host;
pub mod reload;
pub mod serve;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lswatch_config::Config;
use lswatch_core::TracingTelemetry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Python language server orchestration
#[derive(Parser, Debug)]
#[command(name = "lswatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (default: ~/.config/lswatch/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the watcher with an interactive console on stdin
    Serve {
        /// Workspace folder to open (repeatable; overrides [workspace] folders)
        #[arg(short, long = "workspace", value_name = "DIR")]
        workspaces: Vec<PathBuf>,

        /// Treat the workspace as untrusted
        #[arg(long)]
        untrusted: bool,
    },

    /// List Python environments found by the native probe
    Discover {
        /// Folder the probe should search (repeatable)
        #[arg(short, long = "workspace", value_name = "DIR")]
        workspaces: Vec<PathBuf>,

        /// Output machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config);
    debug!(?cli, "Parsed command line");

    match cli.command {
        Commands::Serve {
            workspaces,
            untrusted,
        } => {
            let folders = workspace_folders(&config, &workspaces)?;
            let options = serve::ServeOptions {
                folders,
                trusted: config.workspace.trusted && !untrusted,
                config_path: cli.config.or_else(Config::default_path),
            };
            serve::serve(config, options).await
        }
        Commands::Discover { workspaces, json } => {
            let folders = workspace_folders(&config, &workspaces)?;
            let envs = discover::discover(&config, folders, Arc::new(TracingTelemetry)).await?;
            discover::print(&envs, json, &mut std::io::stdout())
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins over `log_level` from the configuration file.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries command output; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Folders from the command line, else from `[workspace]`, made absolute.
fn workspace_folders(config: &Config, requested: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let folders = if requested.is_empty() {
        config.workspace.folders.as_slice()
    } else {
        requested
    };
    folders.iter().map(|folder| console::absolute(folder)).collect()
}
