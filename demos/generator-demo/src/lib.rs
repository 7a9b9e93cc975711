//! A stand-in for the real project-generation engine.
//!
//! §1 treats the generator as an external collaborator outside this
//! workspace's scope — a black box returning a result handle or a
//! classifiable error. `DemoGenerator` exists only so `queue-server`'s
//! worker loop has something real to invoke end-to-end in this repo and in
//! its tests; a production deployment swaps it for its own
//! `queue_core::Generator` impl.

use std::time::Duration;

use async_trait::async_trait;
use queue_core::{Generator, GeneratorError};
use serde_json::Value;
use tracing::debug;

/// Simulates generation by sleeping in short increments and returning a
/// fabricated result handle, polling the cooperative cancel signal between
/// increments so a cancelled job doesn't run the full simulated duration.
#[derive(Debug, Clone, Copy)]
pub struct DemoGenerator {
    pub step: Duration,
    pub steps: u32,
}

impl Default for DemoGenerator {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(200),
            steps: 5,
        }
    }
}

impl DemoGenerator {
    pub fn new(step: Duration, steps: u32) -> Self {
        Self { step, steps }
    }
}

#[async_trait]
impl Generator for DemoGenerator {
    async fn generate(
        &self,
        payload: &Value,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<String, GeneratorError> {
        if !payload.is_object() {
            return Err(GeneratorError::non_retryable("payload must be a JSON object"));
        }

        for _ in 0..self.steps {
            if cancelled() {
                return Err(GeneratorError::non_retryable("cancelled"));
            }
            tokio::time::sleep(self.step).await;
        }

        debug!("demo generation complete");
        Ok(format!("demo-result-{}", fastrand::u64(..)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn generates_a_result_handle_for_an_object_payload() {
        let generator = DemoGenerator::new(Duration::from_millis(1), 2);
        let handle = generator
            .generate(&json!({"prompt": "hello"}), &|| false)
            .await
            .unwrap();
        assert!(handle.starts_with("demo-result-"));
    }

    #[tokio::test]
    async fn rejects_non_object_payload_as_non_retryable() {
        let generator = DemoGenerator::new(Duration::from_millis(1), 2);
        let err = generator
            .generate(&json!("not an object"), &|| false)
            .await
            .unwrap_err();
        assert_eq!(err.kind, queue_core::FailureKind::NonRetryable);
    }

    #[tokio::test]
    async fn stops_early_once_cancel_is_observed() {
        let generator = DemoGenerator::new(Duration::from_millis(50), 100);
        let start = tokio::time::Instant::now();
        let err = generator
            .generate(&json!({"prompt": "hello"}), &|| true)
            .await
            .unwrap_err();
        assert_eq!(err.kind, queue_core::FailureKind::NonRetryable);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
