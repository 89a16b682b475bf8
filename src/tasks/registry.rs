//! Task registry mapping task keys to invocable tasks.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::RwLock;

use crate::error::TaskError;
use crate::tasks::task::{Task, TaskDescriptor, TaskFailure};
use crate::value::{Payload, payload_summary};

/// Registry of available tasks, populated at process start.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<dyn Task>>>,
}

impl TaskRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding the built-in tasks.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for task in crate::tasks::builtin::all() {
            registry.register_sync(task);
        }
        registry
    }

    /// Register a task. Returns `false` if the key is already taken.
    pub async fn register(&self, task: Arc<dyn Task>) -> bool {
        let key = task.key().to_string();
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&key) {
            tracing::warn!(task = %key, "Rejected task registration: key already registered");
            return false;
        }
        tasks.insert(key.clone(), task);
        tracing::debug!("Registered task: {}", key);
        true
    }

    /// Register a task (sync version for startup).
    pub fn register_sync(&self, task: Arc<dyn Task>) -> bool {
        let key = task.key().to_string();
        let Ok(mut tasks) = self.tasks.try_write() else {
            tracing::warn!(task = %key, "Registry busy, task not registered");
            return false;
        };
        if tasks.contains_key(&key) {
            tracing::warn!(task = %key, "Rejected task registration: key already registered");
            return false;
        }
        tasks.insert(key.clone(), task);
        tracing::debug!("Registered task: {}", key);
        true
    }

    /// Resolve a task key to its task.
    pub async fn resolve(&self, key: &str) -> Result<Arc<dyn Task>, TaskError> {
        self.tasks
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| TaskError::NotFound {
                key: key.to_string(),
            })
    }

    /// Invoke a resolved task.
    ///
    /// Whatever the task does wrong (including panicking) comes back as a
    /// `TaskError`; nothing propagates past this call.
    pub async fn invoke(&self, task: &Arc<dyn Task>, payload: Payload) -> Result<Payload, TaskError> {
        let key = task.key().to_string();
        let summary = payload_summary(&payload);

        match AssertUnwindSafe(task.run(payload)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(TaskFailure::InvalidPayload(reason))) => {
                Err(TaskError::InvalidPayload { key, reason })
            }
            Ok(Err(TaskFailure::Failed(reason))) => Err(TaskError::ExecutionFailed {
                key,
                reason,
                payload_summary: summary,
            }),
            Err(panic) => Err(TaskError::Panicked {
                key,
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    /// Resolve and invoke a task immediately, outside the job queue.
    pub async fn run_now(&self, key: &str, payload: Payload) -> Result<Payload, TaskError> {
        let task = self.resolve(key).await?;
        self.invoke(&task, payload).await
    }

    /// Check if a task exists.
    pub async fn has(&self, key: &str) -> bool {
        self.tasks.read().await.contains_key(key)
    }

    /// List all task keys, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Descriptors of all registered tasks, sorted by key.
    pub async fn descriptors(&self) -> Vec<TaskDescriptor> {
        let mut descriptors: Vec<TaskDescriptor> = self
            .tasks
            .read()
            .await
            .values()
            .map(|task| task.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.key.cmp(&b.key));
        descriptors
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct MockTask {
        key: String,
    }

    #[async_trait]
    impl Task for MockTask {
        fn key(&self) -> &str {
            &self.key
        }
        fn description(&self) -> &str {
            "A mock task for testing"
        }
        async fn run(&self, payload: Payload) -> Result<Payload, TaskFailure> {
            match payload.get("mode").and_then(Value::as_str) {
                Some("fail") => Err(TaskFailure::Failed("boom".into())),
                Some("reject") => Err(TaskFailure::InvalidPayload("bad shape".into())),
                Some("panic") => panic!("task blew up"),
                _ => Ok(payload),
            }
        }
    }

    fn mock(key: &str) -> Arc<dyn Task> {
        Arc::new(MockTask {
            key: key.to_string(),
        })
    }

    fn mode(m: &str) -> Payload {
        Payload::from([("mode".to_string(), Value::from(m))])
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = TaskRegistry::new();
        assert!(registry.register(mock("test_task")).await);
        assert!(registry.has("test_task").await);
        assert!(!registry.has("nonexistent").await);

        let resolved = registry.resolve("test_task").await.unwrap();
        assert_eq!(resolved.key(), "test_task");
    }

    #[tokio::test]
    async fn test_resolve_missing() {
        let registry = TaskRegistry::new();
        let err = registry.resolve("missing_task").await.unwrap_err();
        assert_eq!(
            err,
            TaskError::NotFound {
                key: "missing_task".into()
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let registry = TaskRegistry::new();
        assert!(registry.register(mock("a")).await);
        assert!(!registry.register(mock("a")).await);
        assert!(!registry.register_sync(mock("a")));
        assert_eq!(registry.list().await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_list_and_descriptors_sorted() {
        let registry = TaskRegistry::new();
        registry.register_sync(mock("zeta_check"));
        registry.register_sync(mock("alpha"));

        assert_eq!(registry.list().await, vec!["alpha", "zeta_check"]);
        let descriptors = registry.descriptors().await;
        assert_eq!(descriptors[0].name, "Alpha");
        assert_eq!(descriptors[1].name, "Zeta Check");
        assert_eq!(descriptors[1].description, "A mock task for testing");
    }

    #[tokio::test]
    async fn test_invoke_converts_failures() {
        let registry = TaskRegistry::new();
        registry.register_sync(mock("m"));
        let task = registry.resolve("m").await.unwrap();

        let ok = registry.invoke(&task, mode("ok")).await.unwrap();
        assert_eq!(ok, mode("ok"));

        let err = registry.invoke(&task, mode("fail")).await.unwrap_err();
        assert_eq!(
            err,
            TaskError::ExecutionFailed {
                key: "m".into(),
                reason: "boom".into(),
                payload_summary: "mode".into(),
            }
        );

        let err = registry.invoke(&task, mode("reject")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_payload");
    }

    #[tokio::test]
    async fn test_invoke_catches_panic() {
        let registry = TaskRegistry::new();
        registry.register_sync(mock("m"));

        let err = registry.run_now("m", mode("panic")).await.unwrap_err();
        assert_eq!(
            err,
            TaskError::Panicked {
                key: "m".into(),
                message: "task blew up".into(),
            }
        );
        // Registry still usable afterwards
        assert!(registry.run_now("m", mode("ok")).await.is_ok());
    }

    #[tokio::test]
    async fn test_with_builtins() {
        let registry = TaskRegistry::with_builtins();
        assert_eq!(registry.list().await, vec!["delay", "divide", "echo"]);
    }
}
