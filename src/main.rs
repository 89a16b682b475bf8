use std::sync::Arc;

use anyhow::Context;
use jobq::cli::Console;
use jobq::config::QueueConfig;
use jobq::queue::JobQueue;
use jobq::store::{JobFilter, JobStatus, JobStore, LibSqlBackend};
use jobq::tasks::TaskRegistry;
use jobq::worker::WorkerSupervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = QueueConfig::from_env().context("invalid configuration")?;

    eprintln!("jobq v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Poll interval: {} ms", config.poll_interval.as_millis());
    eprintln!("   Type 'help' for commands, 'quit' to exit.\n");

    // ── Store ────────────────────────────────────────────────────────────
    let store: Arc<dyn JobStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // Running jobs from a previous process are reported, not requeued.
    let stuck = store
        .list_jobs(&JobFilter::with_status(JobStatus::Running))
        .await?;
    for job in &stuck {
        tracing::warn!(job_id = %job.id, task = %job.task_key, "Job left running by a previous run");
    }

    // ── Tasks + queue ────────────────────────────────────────────────────
    let registry = Arc::new(TaskRegistry::with_builtins());
    tracing::info!(tasks = ?registry.list().await, "Registered built-in tasks");

    let queue = JobQueue::new(store, registry).with_recent_limit(config.recent_limit);

    // ── Worker ───────────────────────────────────────────────────────────
    let supervisor = WorkerSupervisor::global();
    supervisor.start(queue.worker(config.poll_interval));

    // ── Console ──────────────────────────────────────────────────────────
    let console = Console::new(queue);
    let interrupted = tokio::select! {
        _ = console.run() => false,
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            tracing::info!("Interrupted");
            true
        }
    };

    supervisor.shutdown().await;
    tracing::info!("Shut down cleanly");

    // A pending stdin read would otherwise hold the runtime open.
    if interrupted {
        std::process::exit(0);
    }
    Ok(())
}
