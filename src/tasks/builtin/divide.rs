//! Arithmetic task that can fail at runtime.

use async_trait::async_trait;

use crate::tasks::task::{Task, TaskFailure, require_f64};
use crate::value::{Payload, Value};

/// Divides `numerator` by `denominator`, returning `quotient`.
#[derive(Debug, Default)]
pub struct DivideTask;

#[async_trait]
impl Task for DivideTask {
    fn key(&self) -> &str {
        "divide"
    }

    fn description(&self) -> &str {
        "Divide numerator by denominator"
    }

    async fn run(&self, payload: Payload) -> Result<Payload, TaskFailure> {
        let numerator = require_f64(&payload, "numerator")?;
        let denominator = require_f64(&payload, "denominator")?;
        if denominator == 0.0 {
            return Err(TaskFailure::Failed("division by zero".to_string()));
        }
        let quotient = numerator / denominator;
        if !quotient.is_finite() {
            return Err(TaskFailure::Failed("result is not finite".to_string()));
        }
        Ok(Payload::from([("quotient".to_string(), Value::from(quotient))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(n: Value, d: Value) -> Payload {
        Payload::from([
            ("numerator".to_string(), n),
            ("denominator".to_string(), d),
        ])
    }

    #[tokio::test]
    async fn divides() {
        let out = DivideTask
            .run(args(Value::from(7), Value::from(2)))
            .await
            .unwrap();
        assert_eq!(out["quotient"], Value::Float(3.5));
    }

    #[tokio::test]
    async fn zero_denominator_fails() {
        let err = DivideTask
            .run(args(Value::from(1), Value::from(0)))
            .await
            .unwrap_err();
        assert_eq!(err, TaskFailure::Failed("division by zero".into()));
    }

    #[tokio::test]
    async fn overflow_fails() {
        let err = DivideTask
            .run(args(Value::from(1e308), Value::from(1e-10)))
            .await
            .unwrap_err();
        assert_eq!(err, TaskFailure::Failed("result is not finite".into()));
    }

    #[tokio::test]
    async fn wrong_shape_is_rejected() {
        let err = DivideTask
            .run(args(Value::from("one"), Value::from(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskFailure::InvalidPayload(_)));

        let err = DivideTask.run(Payload::new()).await.unwrap_err();
        assert!(matches!(err, TaskFailure::InvalidPayload(_)));
    }
}
