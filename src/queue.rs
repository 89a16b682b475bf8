//! Queue API used to submit work and observe it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::JobError;
use crate::store::{Job, JobFilter, JobHandle, JobStatus, JobStore};
use crate::tasks::{TaskDescriptor, TaskRegistry};
use crate::value::Payload;
use crate::worker::JobWorker;

/// Front door of the job queue.
///
/// Enqueue never blocks on execution: the job is persisted as `pending` and
/// the worker is nudged. Unknown task keys are accepted here and surface
/// later as a failed job.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    wake: Arc<Notify>,
    recent_limit: usize,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            store,
            registry,
            wake: Arc::new(Notify::new()),
            recent_limit: QueueConfig::default().recent_limit,
        }
    }

    /// Default page size for [`JobQueue::recent_jobs`].
    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// Persist a new pending job and wake the worker.
    pub async fn enqueue(&self, task_key: &str, payload: &Payload) -> Result<JobHandle, JobError> {
        let job = self.store.create(task_key, payload).await?;
        if self.registry.has(task_key).await {
            info!(job_id = %job.id, task = %task_key, "Job enqueued");
        } else {
            warn!(job_id = %job.id, task = %task_key, "Job enqueued for an unregistered task; it will fail");
        }
        self.wake.notify_one();
        Ok(job.handle())
    }

    /// Current state of a job.
    pub async fn get_status(&self, id: Uuid) -> Result<Job, JobError> {
        Ok(self.store.get(id).await?)
    }

    /// Most recent jobs, newest first, optionally restricted to one status.
    pub async fn recent_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>, JobError> {
        let filter = JobFilter {
            status,
            limit: Some(self.recent_limit),
        };
        self.list_jobs(&filter).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        Ok(self.store.list_jobs(filter).await?)
    }

    /// Number of jobs per status.
    pub async fn counts(&self) -> Result<BTreeMap<JobStatus, usize>, JobError> {
        Ok(self.store.count_by_status().await?)
    }

    /// Tasks that can be enqueued. Listing never runs a task.
    pub async fn available_tasks(&self) -> Vec<TaskDescriptor> {
        self.registry.descriptors().await
    }

    /// Build the worker that drains this queue.
    pub fn worker(&self, poll_interval: Duration) -> JobWorker {
        JobWorker::new(self.store.clone(), self.registry.clone(), poll_interval)
            .with_wake(self.wake.clone())
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }
}
