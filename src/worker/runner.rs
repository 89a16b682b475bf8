//! Worker loop: claims the oldest pending job, runs it, records the outcome.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use crate::error::{DatabaseError, TaskError};
use crate::store::{Job, JobStatus, JobStore};
use crate::tasks::TaskRegistry;
use crate::value::{Payload, Value, payload_summary};

/// Outcome of a claimed job that has not been written to the store yet.
struct HeldOutcome {
    job: Job,
    status: JobStatus,
    result: Payload,
}

impl HeldOutcome {
    /// Replace a result the store cannot encode with a failure record.
    fn into_unstorable(self, reason: String) -> Self {
        let err = TaskError::ExecutionFailed {
            key: self.job.task_key.clone(),
            reason: format!("result could not be stored: {reason}"),
            payload_summary: payload_summary(&self.job.payload),
        };
        let result = failure_detail(&err, &self.job.payload);
        Self {
            job: self.job,
            status: JobStatus::Failed,
            result,
        }
    }
}

/// Executes queued jobs one at a time.
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    wake: Arc<Notify>,
    poll_interval: Duration,
    /// Set while the store is unavailable for recording a finished job.
    held: Mutex<Option<HeldOutcome>>,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<TaskRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            wake: Arc::new(Notify::new()),
            poll_interval,
            held: Mutex::new(None),
        }
    }

    /// Share a wake-up signal with the enqueue side.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = wake;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn held(&self) -> MutexGuard<'_, Option<HeldOutcome>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a finished job is still waiting to be recorded.
    pub fn has_unrecorded_outcome(&self) -> bool {
        self.held().is_some()
    }

    /// One cycle: claim the oldest pending job, execute it, and record the
    /// terminal state. Returns `Ok(None)` when nothing is pending.
    ///
    /// If the previous cycle could not record its outcome, this cycle retries
    /// that write instead of claiming new work, so the job is never executed
    /// twice and never left behind.
    ///
    /// Task failures are recorded on the job and reported as `Ok`; only
    /// store errors come back as `Err`.
    pub async fn run_once(&self) -> Result<Option<Job>, DatabaseError> {
        let held = self.held().take();
        if let Some(held) = held {
            debug!(job_id = %held.job.id, "Retrying job outcome write");
            return self.record(held).await.map(Some);
        }

        let Some(job) = self.store.claim_next().await? else {
            return Ok(None);
        };
        debug!(job_id = %job.id, task = %job.task_key, "Claimed job");

        let outcome = match self.registry.resolve(&job.task_key).await {
            Ok(task) => self.registry.invoke(&task, job.payload.clone()).await,
            Err(e) => Err(e),
        };

        let held = match outcome {
            Ok(result) => HeldOutcome {
                job,
                status: JobStatus::Done,
                result,
            },
            Err(err) => {
                warn!(job_id = %job.id, task = %job.task_key, error = %err, "Task failed");
                HeldOutcome {
                    status: JobStatus::Failed,
                    result: failure_detail(&err, &job.payload),
                    job,
                }
            }
        };
        self.record(held).await.map(Some)
    }

    /// Write a terminal state. Transient failures keep the outcome for the
    /// next cycle.
    async fn record(&self, mut held: HeldOutcome) -> Result<Job, DatabaseError> {
        loop {
            let written = self
                .store
                .update_status(held.job.id, held.status, Some(&held.result))
                .await;

            match written {
                Ok(job) => {
                    match job.status {
                        JobStatus::Done => info!(job_id = %job.id, task = %job.task_key, "Job done"),
                        _ => info!(job_id = %job.id, task = %job.task_key, "Job failed"),
                    }
                    return Ok(job);
                }
                Err(DatabaseError::Serialization(reason)) if held.status == JobStatus::Done => {
                    warn!(job_id = %held.job.id, reason = %reason, "Task result cannot be stored, recording failure");
                    held = held.into_unstorable(reason);
                }
                Err(e) if e.is_transient() => {
                    warn!(job_id = %held.job.id, error = %e, "Could not record job outcome, will retry");
                    *self.held() = Some(held);
                    return Err(e);
                }
                Err(e) => {
                    error!(job_id = %held.job.id, error = %e, "Store rejected job outcome");
                    return Err(e);
                }
            }
        }
    }

    /// Run until the stop signal is raised (or its sender is dropped).
    ///
    /// The signal is checked between jobs and while idle; a job that is
    /// already executing always runs to completion.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Worker loop started");

        loop {
            if *stop.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Job store unavailable, retrying after poll interval");
                }
                Err(e) => {
                    error!(error = %e, "Job store rejected an operation");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if self.has_unrecorded_outcome()
            && let Err(e) = self.run_once().await
        {
            error!(error = %e, "Worker stopped before a job outcome was recorded, job left running");
        }

        info!("Worker loop stopped");
    }
}

/// Result map stored on a failed job.
pub fn failure_detail(err: &TaskError, payload: &Payload) -> Payload {
    let payload_keys: Vec<Value> = payload.keys().map(|k| Value::from(k.as_str())).collect();
    Payload::from([
        ("error".to_string(), Value::from(err.to_string())),
        ("kind".to_string(), Value::from(err.kind())),
        ("task_key".to_string(), Value::from(err.task_key())),
        ("payload_keys".to_string(), Value::Array(payload_keys)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn setup() -> (Arc<dyn JobStore>, JobWorker) {
        let store: Arc<dyn JobStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let worker = JobWorker::new(
            store.clone(),
            Arc::new(TaskRegistry::with_builtins()),
            Duration::from_millis(10),
        );
        (store, worker)
    }

    #[tokio::test]
    async fn run_once_idle() {
        let (_store, worker) = setup().await;
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_once_completes_job() {
        let (store, worker) = setup().await;
        let payload = Payload::from([("x".to_string(), Value::from(1))]);
        let job = store.create("echo", &payload).await.unwrap();

        let finished = worker.run_once().await.unwrap().unwrap();
        assert_eq!(finished.id, job.id);
        assert_eq!(finished.status, JobStatus::Done);
        assert_eq!(finished.result, Some(payload));
    }

    #[tokio::test]
    async fn run_once_records_missing_task() {
        let (store, worker) = setup().await;
        let job = store.create("missing_task", &Payload::new()).await.unwrap();

        worker.run_once().await.unwrap().unwrap();
        let failed = store.get(job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        let result = failed.result.unwrap();
        assert_eq!(result["kind"], Value::from("task_not_found"));
        assert_eq!(result["task_key"], Value::from("missing_task"));
    }

    #[derive(Debug)]
    struct NanTask;

    #[async_trait::async_trait]
    impl crate::tasks::Task for NanTask {
        fn key(&self) -> &str {
            "nan"
        }
        fn description(&self) -> &str {
            "Returns a number JSON cannot hold"
        }
        async fn run(&self, _payload: Payload) -> Result<Payload, crate::tasks::TaskFailure> {
            Ok(Payload::from([("x".to_string(), Value::from(f64::NAN))]))
        }
    }

    #[tokio::test]
    async fn unstorable_result_is_recorded_as_failure() {
        let store: Arc<dyn JobStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let registry = TaskRegistry::new();
        registry.register_sync(Arc::new(NanTask));
        let worker = JobWorker::new(store.clone(), Arc::new(registry), Duration::from_millis(10));
        let job = store.create("nan", &Payload::new()).await.unwrap();

        let recorded = worker.run_once().await.unwrap().unwrap();
        assert_eq!(recorded.id, job.id);
        assert_eq!(recorded.status, JobStatus::Failed);
        assert!(!worker.has_unrecorded_outcome());

        let stored = store.get(job.id).await.unwrap();
        assert_eq!(stored, recorded);
        let detail = stored.result.unwrap();
        assert_eq!(detail["kind"], Value::from("execution_failed"));
        assert!(detail["error"].as_str().unwrap().contains("could not be stored"));
    }

    #[test]
    fn failure_detail_summarises_payload_keys() {
        let err = TaskError::ExecutionFailed {
            key: "divide".into(),
            reason: "division by zero".into(),
            payload_summary: "denominator, numerator".into(),
        };
        let payload = Payload::from([
            ("numerator".to_string(), Value::from(1)),
            ("denominator".to_string(), Value::from(0)),
        ]);
        let detail = failure_detail(&err, &payload);
        assert_eq!(detail["kind"], Value::from("execution_failed"));
        assert_eq!(
            detail["payload_keys"],
            Value::Array(vec![Value::from("denominator"), Value::from("numerator")])
        );
        assert!(
            detail["error"]
                .as_str()
                .unwrap()
                .contains("division by zero")
        );
    }
}
