//! The `Task` trait and payload helpers shared by task implementations.

use async_trait::async_trait;
use serde::Serialize;

use crate::value::{Payload, Value};

/// Error a task reports about its own execution.
///
/// The registry wraps this with the task key and a payload summary before it
/// is recorded on a job.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskFailure {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Failed(String),
}

/// Listing entry for a registered task. Building one never runs the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDescriptor {
    pub key: String,
    pub name: String,
    pub description: String,
}

/// A named, invocable unit of work.
#[async_trait]
pub trait Task: Send + Sync + std::fmt::Debug {
    /// Registry key jobs refer to.
    fn key(&self) -> &str;

    /// Human-readable name; defaults to the key title-cased.
    fn name(&self) -> String {
        display_name(self.key())
    }

    fn description(&self) -> &str;

    /// Execute the task against a payload.
    async fn run(&self, payload: Payload) -> Result<Payload, TaskFailure>;

    fn descriptor(&self) -> TaskDescriptor {
        TaskDescriptor {
            key: self.key().to_string(),
            name: self.name(),
            description: self.description().to_string(),
        }
    }
}

/// Title-case a task key on underscores: `task_report` becomes `Task Report`.
pub fn display_name(key: &str) -> String {
    key.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fetch a required value from a payload.
pub fn require<'a>(payload: &'a Payload, key: &str) -> Result<&'a Value, TaskFailure> {
    payload
        .get(key)
        .ok_or_else(|| TaskFailure::InvalidPayload(format!("missing field '{key}'")))
}

/// Fetch a required numeric field.
pub fn require_f64(payload: &Payload, key: &str) -> Result<f64, TaskFailure> {
    require(payload, key)?
        .as_f64()
        .ok_or_else(|| TaskFailure::InvalidPayload(format!("field '{key}' must be a number")))
}

/// Fetch a required integer field.
pub fn require_i64(payload: &Payload, key: &str) -> Result<i64, TaskFailure> {
    require(payload, key)?
        .as_i64()
        .ok_or_else(|| TaskFailure::InvalidPayload(format!("field '{key}' must be an integer")))
}
