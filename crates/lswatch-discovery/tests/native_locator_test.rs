//! End-to-end tests for the native locator with a scripted probe.

use async_trait::async_trait;
use futures_util::StreamExt;
use lswatch_core::testing::RecordingTelemetry;
use lswatch_core::{EnvKind, TelemetryEvent};
use lswatch_discovery::{
    tools, DiscoveryError, FinderEvent, NativeEnvInfo, NativeEnvManagerInfo, NativeLocator,
    PythonFinder,
};
use serial_test::serial;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Replays a fixed list of events, optionally failing at the end.
struct ScriptedFinder {
    events: Vec<FinderEvent>,
    fail: bool,
}

#[async_trait]
impl PythonFinder for ScriptedFinder {
    async fn search(
        &self,
        events: mpsc::UnboundedSender<FinderEvent>,
    ) -> Result<(), DiscoveryError> {
        for event in &self.events {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = events.send(event.clone());
        }
        if self.fail {
            return Err(DiscoveryError::Configure("probe crashed".to_string()));
        }
        Ok(())
    }
}

fn environment(category: &str, executable: Option<&str>) -> FinderEvent {
    FinderEvent::Environment(NativeEnvInfo {
        category: category.to_string(),
        python_executable_path: executable.map(PathBuf::from),
        version: Some("3.11.4".to_string()),
        ..NativeEnvInfo::default()
    })
}

fn manager(tool: &str, executable: &str) -> FinderEvent {
    FinderEvent::Manager(NativeEnvManagerInfo {
        tool: tool.to_string(),
        executable_path: PathBuf::from(executable),
    })
}

fn discovery_summary(telemetry: &RecordingTelemetry) -> lswatch_core::DiscoverySummary {
    let events = telemetry.events();
    assert_eq!(events.len(), 1, "expected exactly one telemetry event");
    match events.into_iter().next() {
        Some(TelemetryEvent::InterpreterDiscovery(summary)) => summary,
        other => panic!("unexpected telemetry: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_environments_without_executable_are_counted_not_yielded() {
    tools::clear();
    let telemetry = Arc::new(RecordingTelemetry::default());
    let finder = ScriptedFinder {
        events: vec![
            environment("Conda", Some("/opt/conda/bin/python")),
            manager("conda", "/opt/conda/bin/conda"),
            environment("System", Some("/usr/bin/python3")),
            environment("Conda", None),
        ],
        fail: false,
    };
    let locator = NativeLocator::new(Arc::new(finder), telemetry.clone());

    let envs: Vec<_> = locator.iter_envs().collect().await;

    let kinds: Vec<_> = envs.iter().map(|env| env.kind).collect();
    assert_eq!(kinds, vec![EnvKind::Conda, EnvKind::System]);
    assert!(envs.iter().all(|env| env.identified_using_native_locator));

    let summary = discovery_summary(&telemetry);
    assert_eq!(summary.interpreters, 2);
    assert_eq!(summary.environments_without_python, 1);
    assert_eq!(summary.count(EnvKind::Conda), 1);
    assert_eq!(summary.count(EnvKind::System), 1);
    assert!(summary.duration >= Duration::from_millis(40));

    assert_eq!(tools::conda_binary(), Some(PathBuf::from("/opt/conda/bin/conda")));
    tools::clear();
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_telemetry_is_sent_after_the_last_record() {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let finder = ScriptedFinder {
        events: vec![
            environment("Pyenv", Some("/home/u/.pyenv/versions/3.11.4/bin/python")),
            environment("Venv", Some("/work/app/.venv/bin/python")),
        ],
        fail: false,
    };
    let locator = NativeLocator::new(Arc::new(finder), telemetry.clone());
    let mut stream = locator.iter_envs();

    assert!(stream.next().await.is_some());
    assert!(stream.next().await.is_some());
    assert!(telemetry.events().is_empty());

    assert!(stream.next().await.is_none());
    assert_eq!(discovery_summary(&telemetry).interpreters, 2);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_probe_failure_still_yields_collected_records() {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let finder = ScriptedFinder {
        events: vec![environment("WindowsStore", Some("C:/Python/python.exe"))],
        fail: true,
    };
    let locator = NativeLocator::new(Arc::new(finder), telemetry.clone());

    let envs: Vec<_> = locator.iter_envs().collect().await;
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].kind, EnvKind::MicrosoftStore);
    assert_eq!(discovery_summary(&telemetry).interpreters, 1);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_unknown_categories_and_tools_do_not_fail_discovery() {
    tools::clear();
    let telemetry = Arc::new(RecordingTelemetry::default());
    let finder = ScriptedFinder {
        events: vec![
            manager("spack", "/usr/bin/spack"),
            environment("Spack", Some("/opt/spack/bin/python")),
        ],
        fail: false,
    };
    let locator = NativeLocator::new(Arc::new(finder), telemetry.clone());

    let envs: Vec<_> = locator.iter_envs().collect().await;
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].kind, EnvKind::Unknown);
    assert_eq!(discovery_summary(&telemetry).count(EnvKind::Unknown), 1);
    assert_eq!(tools::conda_binary(), None);
    assert_eq!(tools::pyenv_binary(), None);
}
