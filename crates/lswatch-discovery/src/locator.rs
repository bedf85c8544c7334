//! Lazy sequence of environments from one probe invocation.

use crate::finder::{FinderEvent, PythonFinder};
use crate::mapping::DiscoveredEnvironment;
use crate::tools;
use futures_util::stream::{self, BoxStream};
use lswatch_core::{DiscoverySummary, TelemetryEvent, TelemetrySink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info};

pub type EnvironmentStream = BoxStream<'static, DiscoveredEnvironment>;

pub struct NativeLocator {
    finder: Arc<dyn PythonFinder>,
    telemetry: Arc<dyn TelemetrySink>,
    tasks: Mutex<Vec<AbortHandle>>,
    disposed: AtomicBool,
}

impl NativeLocator {
    pub fn new(finder: Arc<dyn PythonFinder>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            finder,
            telemetry,
            tasks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Start a search and return the environments it finds.
    ///
    /// The probe starts right away, not on first poll. The stream yields
    /// nothing until the probe signals completion, then yields every record
    /// in arrival order and reports discovery telemetry after the last one.
    pub fn iter_envs(&self) -> EnvironmentStream {
        if self.disposed.load(Ordering::SeqCst) {
            debug!("Native locator is disposed, nothing to search");
            return Box::pin(stream::empty());
        }

        let started = Instant::now();
        info!("Searching for Python environments using native locator");

        let (events, receiver) = mpsc::unbounded_channel();
        let finder = Arc::clone(&self.finder);
        let search = tokio::spawn(async move {
            if let Err(e) = finder.search(events).await {
                error!(error = %e, "Native locator search failed");
            }
        });
        let collector = tokio::spawn(collect(receiver));

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.retain(|task| !task.is_finished());
            tasks.push(search.abort_handle());
            tasks.push(collector.abort_handle());
        }

        let phase = Phase::Waiting {
            collector,
            started,
            telemetry: Arc::clone(&self.telemetry),
        };
        Box::pin(stream::unfold(phase, advance))
    }

    /// Abort every search in flight. Pending streams end early.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for NativeLocator {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Default)]
struct Collected {
    envs: Vec<DiscoveredEnvironment>,
    summary: DiscoverySummary,
}

async fn collect(mut events: mpsc::UnboundedReceiver<FinderEvent>) -> Collected {
    let mut collected = Collected::default();
    while let Some(event) = events.recv().await {
        match event {
            FinderEvent::Environment(info) => match DiscoveredEnvironment::from_native(info) {
                Some(env) => {
                    collected.summary.record(env.kind);
                    collected.envs.push(env);
                }
                None => collected.summary.environments_without_python += 1,
            },
            FinderEvent::Manager(manager) => {
                tools::register(&manager.tool, &manager.executable_path);
            }
        }
    }
    collected
}

enum Phase {
    Waiting {
        collector: JoinHandle<Collected>,
        started: Instant,
        telemetry: Arc<dyn TelemetrySink>,
    },
    Yielding {
        envs: std::vec::IntoIter<DiscoveredEnvironment>,
        summary: DiscoverySummary,
        started: Instant,
        telemetry: Arc<dyn TelemetrySink>,
    },
}

async fn advance(phase: Phase) -> Option<(DiscoveredEnvironment, Phase)> {
    let mut phase = phase;
    loop {
        match phase {
            Phase::Waiting {
                collector,
                started,
                telemetry,
            } => {
                let collected = match collector.await {
                    Ok(collected) => collected,
                    Err(e) => {
                        debug!(error = %e, "Native locator search was cancelled");
                        return None;
                    }
                };
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Finished searching for Python environments using native locator"
                );
                phase = Phase::Yielding {
                    envs: collected.envs.into_iter(),
                    summary: collected.summary,
                    started,
                    telemetry,
                };
            }
            Phase::Yielding {
                mut envs,
                mut summary,
                started,
                telemetry,
            } => {
                if let Some(env) = envs.next() {
                    return Some((
                        env,
                        Phase::Yielding {
                            envs,
                            summary,
                            started,
                            telemetry,
                        },
                    ));
                }

                summary.duration = started.elapsed();
                telemetry.send(TelemetryEvent::InterpreterDiscovery(summary));
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Finished yielding Python environments using native locator"
                );
                return None;
            }
        }
    }
}
