//! Error types for the job queue.

use uuid::Uuid;

use crate::store::JobStatus;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
///
/// `Pool` and `Query` mean the store could not be reached; the rest describe
/// a request or a record the store will keep rejecting.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Job {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: JobStatus,
        target: JobStatus,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Whether the same call may succeed once the store is reachable again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Query(_))
    }
}

/// Task resolution and execution errors.
///
/// These never escape the worker loop; they are recorded on the failed job.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Task {key} not found")]
    NotFound { key: String },

    #[error("Task {key} rejected its payload: {reason}")]
    InvalidPayload { key: String, reason: String },

    #[error("Task {key} execution failed: {reason} (payload keys: {payload_summary})")]
    ExecutionFailed {
        key: String,
        reason: String,
        payload_summary: String,
    },

    #[error("Task {key} panicked: {message}")]
    Panicked { key: String, message: String },
}

impl TaskError {
    /// Stable machine-readable kind, stored in the failed job's result.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "task_not_found",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Panicked { .. } => "panicked",
        }
    }

    /// Key of the task the error belongs to.
    pub fn task_key(&self) -> &str {
        match self {
            Self::NotFound { key }
            | Self::InvalidPayload { key, .. }
            | Self::ExecutionFailed { key, .. }
            | Self::Panicked { key, .. } => key,
        }
    }
}

/// Job lookup errors returned to queue callers.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(DatabaseError),
}

impl From<DatabaseError> for JobError {
    fn from(err: DatabaseError) -> Self {
        if let DatabaseError::NotFound { id, .. } = &err
            && let Ok(id) = id.parse::<Uuid>()
        {
            return Self::NotFound { id };
        }
        Self::StoreUnavailable(err)
    }
}
