//! Worker lifecycle: one worker loop per process, with a cooperative stop.

use std::sync::{Mutex, OnceLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::worker::runner::JobWorker;

/// What a call to [`WorkerSupervisor::start`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new worker loop was spawned.
    Started,
    /// A worker was already started by this supervisor; nothing changed.
    AlreadyStarted,
}

struct WorkerSlot {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the single background worker loop.
///
/// `start` is idempotent for the lifetime of the supervisor: after the first
/// worker has been spawned, later calls are no-ops, even once it has stopped.
pub struct WorkerSupervisor {
    slot: Mutex<Option<WorkerSlot>>,
}

impl WorkerSupervisor {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Process-wide supervisor.
    pub fn global() -> &'static WorkerSupervisor {
        static GLOBAL: OnceLock<WorkerSupervisor> = OnceLock::new();
        GLOBAL.get_or_init(WorkerSupervisor::new)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<WorkerSlot>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `worker` on the current tokio runtime unless a worker has
    /// already been started.
    pub fn start(&self, worker: JobWorker) -> StartOutcome {
        let mut slot = self.lock();
        if slot.is_some() {
            debug!("Worker already started, ignoring start request");
            return StartOutcome::AlreadyStarted;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(stop_rx));
        *slot = Some(WorkerSlot {
            stop_tx,
            handle: Some(handle),
        });
        info!("Worker started");
        StartOutcome::Started
    }

    /// Raise the stop signal. The loop finishes its current job, then exits.
    pub fn stop(&self) {
        if let Some(slot) = self.lock().as_ref() {
            slot.stop_tx.send_replace(true);
            info!("Worker stop requested");
        }
    }

    /// Whether a worker loop is currently alive.
    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .and_then(|slot| slot.handle.as_ref())
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Raise the stop signal and wait for the loop to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.lock().as_mut().and_then(|slot| slot.handle.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }
}

impl Default for WorkerSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
