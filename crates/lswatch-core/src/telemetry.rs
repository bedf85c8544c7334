//! Telemetry events emitted by the watcher, managers and discovery.

use crate::environment::EnvKind;
use lswatch_config::BackendType;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// The notebook experiment turned on. Sent at most once per process.
    NotebookExperimentEnabled,

    /// A backend start completed, successfully or not.
    LanguageServerStartup {
        backend: BackendType,
        ls_version: String,
        duration: Duration,
        failed: bool,
    },

    /// A native discovery pass finished.
    InterpreterDiscovery(DiscoverySummary),
}

/// Counters gathered over one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub duration: Duration,
    /// Environments yielded to the consumer.
    pub interpreters: usize,
    /// Environments reported without an executable.
    pub environments_without_python: usize,
    pub kinds: BTreeMap<EnvKind, usize>,
}

impl DiscoverySummary {
    pub fn record(&mut self, kind: EnvKind) {
        self.interpreters += 1;
        *self.kinds.entry(kind).or_default() += 1;
    }

    pub fn count(&self, kind: EnvKind) -> usize {
        self.kinds.get(&kind).copied().unwrap_or(0)
    }
}

pub trait TelemetrySink: Send + Sync {
    fn send(&self, event: TelemetryEvent);
}

/// Sink that writes events to the `lswatch::telemetry` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn send(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::NotebookExperimentEnabled => {
                info!(target: "lswatch::telemetry", event = "notebook_experiment_enabled");
            }
            TelemetryEvent::LanguageServerStartup {
                backend,
                ls_version,
                duration,
                failed,
            } => {
                info!(
                    target: "lswatch::telemetry",
                    event = "language_server_startup",
                    backend = %backend,
                    ls_version = %ls_version,
                    duration_ms = duration.as_millis() as u64,
                    failed,
                );
            }
            TelemetryEvent::InterpreterDiscovery(summary) => {
                let kinds = summary
                    .kinds
                    .iter()
                    .map(|(kind, count)| format!("{kind}={count}"))
                    .collect::<Vec<_>>()
                    .join(",");
                info!(
                    target: "lswatch::telemetry",
                    event = "interpreter_discovery",
                    duration_ms = summary.duration.as_millis() as u64,
                    interpreters = summary.interpreters,
                    environments_without_python = summary.environments_without_python,
                    kinds = %kinds,
                );
            }
        }
    }
}
