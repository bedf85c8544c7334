use lswatch_cli::run;

fn main() -> anyhow::Result<()> {
    // Backend sessions, probe I/O and host events all share one cooperative
    // task queue, so the orchestrator runs on a current-thread runtime.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run());
    // A pending stdin read would otherwise hold up exit.
    runtime.shutdown_background();
    result
}
