//! `JobStore` trait and the job record it owns.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::value::Payload;

/// Status of a job.
///
/// `pending → running → done | failed`; `done` and `failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed by the worker.
    Pending,
    /// Claimed and executing.
    Running,
    /// Task returned a result.
    Done,
    /// Task could not be resolved or failed.
    Failed,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 4] = [Self::Pending, Self::Running, Self::Done, Self::Failed];

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Done) | (Running, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// A durable record of one requested unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub task_key: String,
    pub payload: Payload,
    pub status: JobStatus,
    /// Set exactly when `status` is terminal.
    pub result: Option<Payload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            status: self.status,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What `enqueue` hands back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub status: JobStatus,
}

/// Listing filter. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Durable job storage. The store is the only owner of job records; callers
/// always get copies.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new pending job and return it.
    async fn create(&self, task_key: &str, payload: &Payload) -> Result<Job, DatabaseError>;

    /// Get a job by ID, failing with `NotFound` if absent.
    async fn get(&self, id: Uuid) -> Result<Job, DatabaseError>;

    /// The oldest pending job (by `created_at`, then id), if any.
    async fn oldest_pending(&self) -> Result<Option<Job>, DatabaseError>;

    /// Atomically select the oldest pending job and move it to `running`.
    async fn claim_next(&self) -> Result<Option<Job>, DatabaseError>;

    /// Move a job to `status`, stamping `updated_at`.
    ///
    /// Fails with `NotFound` for an unknown id and `InvalidTransition` when
    /// the state machine forbids the move. `result` is stored only for
    /// terminal statuses; a terminal status without one stores an empty map.
    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<&Payload>,
    ) -> Result<Job, DatabaseError>;

    /// List jobs, newest first.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError>;

    /// Number of jobs in each status (every status present, possibly zero).
    async fn count_by_status(&self) -> Result<BTreeMap<JobStatus, usize>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Done));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Done));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
        for terminal in [JobStatus::Done, JobStatus::Failed] {
            for target in JobStatus::ALL {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in JobStatus::ALL {
            assert_eq!(status.to_string().parse::<JobStatus>(), Ok(status));
        }
        assert!("queued".parse::<JobStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&JobStatus::Running).unwrap(),
            "\"running\""
        );
    }
}
