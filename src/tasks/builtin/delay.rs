use std::time::Duration;

use async_trait::async_trait;

use crate::tasks::task::{Task, TaskFailure, require_i64};
use crate::value::{Payload, Value};

/// Upper bound on a single delay.
const MAX_DELAY_MS: i64 = 60_000;

/// Sleeps for `millis` milliseconds, then reports how long it slept.
#[derive(Debug)]
pub struct DelayTask {
    max_millis: i64,
}

impl DelayTask {
    pub fn new() -> Self {
        Self {
            max_millis: MAX_DELAY_MS,
        }
    }
}

impl Default for DelayTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for DelayTask {
    fn key(&self) -> &str {
        "delay"
    }

    fn description(&self) -> &str {
        "Sleep for the requested number of milliseconds"
    }

    async fn run(&self, payload: Payload) -> Result<Payload, TaskFailure> {
        let millis = require_i64(&payload, "millis")?;
        if !(0..=self.max_millis).contains(&millis) {
            return Err(TaskFailure::InvalidPayload(format!(
                "millis must be between 0 and {}",
                self.max_millis
            )));
        }
        tokio::time::sleep(Duration::from_millis(millis as u64)).await;
        Ok(Payload::from([("slept_ms".to_string(), Value::from(millis))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleeps_and_reports() {
        let payload = Payload::from([("millis".to_string(), Value::from(5))]);
        let out = DelayTask::new().run(payload).await.unwrap();
        assert_eq!(out["slept_ms"], Value::Int(5));
    }

    #[tokio::test]
    async fn rejects_out_of_range() {
        let payload = Payload::from([("millis".to_string(), Value::from(-1))]);
        let err = DelayTask::new().run(payload).await.unwrap_err();
        assert!(matches!(err, TaskFailure::InvalidPayload(_)));
    }
}
