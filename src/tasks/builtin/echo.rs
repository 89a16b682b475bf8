use async_trait::async_trait;

use crate::tasks::task::{Task, TaskFailure};
use crate::value::Payload;

/// Returns its payload unchanged.
#[derive(Debug, Default)]
pub struct EchoTask;

#[async_trait]
impl Task for EchoTask {
    fn key(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the payload unchanged"
    }

    async fn run(&self, payload: Payload) -> Result<Payload, TaskFailure> {
        Ok(payload)
    }
}
