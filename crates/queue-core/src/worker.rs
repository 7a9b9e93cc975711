//! Worker Loop: pulls claimed jobs, invokes the external generator, reports
//! completion or failure, and refreshes its lease while the generator runs.
//!
//! The generator is modeled as an injected async trait rather than a
//! concrete function, mirroring the distilled spec's framing of it as a
//! narrow external contract (§6) — tests substitute a deterministic stub
//! and exercise the loop's timeout/heartbeat/cancel-poll logic without a
//! real project-generation backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::queue_manager::QueueManager;
use crate::store::keys;

/// Whether a generator failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    NonRetryable,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct GeneratorError {
    pub message: String,
    pub kind: FailureKind,
}

impl GeneratorError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Retryable,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::NonRetryable,
        }
    }
}

/// The external project-generation engine. A black box returning a result
/// handle or a classifiable error; must be restartable with the same
/// payload (retries re-invoke with the same input) and honor `cancelled`.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        payload: &serde_json::Value,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<String, GeneratorError>;
}

pub struct WorkerLoop<G: Generator> {
    worker_id: String,
    queue: Arc<QueueManager>,
    generator: Arc<G>,
}

impl<G: Generator + 'static> WorkerLoop<G> {
    pub fn new(worker_id: impl Into<String>, queue: Arc<QueueManager>, generator: Arc<G>) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            generator,
        }
    }

    /// Runs forever: claim, generate, report, backoff-with-jitter when idle.
    pub async fn run(self) {
        loop {
            match self.tick().await {
                Ok(true) => continue,
                Ok(false) => {
                    let base = self.queue.config().worker_poll_interval;
                    let jitter_ms = fastrand::u64(0..=base.as_millis() as u64 / 2);
                    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
                }
                Err(err) => {
                    warn!(worker_id = %self.worker_id, %err, "worker tick failed");
                    tokio::time::sleep(self.queue.config().worker_poll_interval).await;
                }
            }
        }
    }

    /// Claims and processes a single job if one is available. Returns
    /// `true` if a job was processed, `false` if the queue was empty.
    pub async fn tick(&self) -> anyhow::Result<bool> {
        let Some(job) = self.queue.claim_next(&self.worker_id).await? else {
            return Ok(false);
        };

        info!(worker_id = %self.worker_id, job_id = %job.job_id, "processing");

        let store = Arc::clone(self.queue.store());
        let lease_key = keys::lease(job.job_id);
        let worker_id = self.worker_id.clone();
        let job_timeout = self.queue.config().job_timeout;

        // Shared between the heartbeat task (which also polls the cancel
        // flag on every beat) and the callback handed to the generator, so a
        // long-running generator can check it mid-flight without awaiting
        // the store itself.
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let job_hash_key = keys::job(job.job_id);

        let heartbeat = {
            let store = Arc::clone(&store);
            let lease_key = lease_key.clone();
            let worker_id = worker_id.clone();
            let cancel_flag = Arc::clone(&cancel_flag);
            let job_hash_key = job_hash_key.clone();
            tokio::spawn(async move {
                // Refresh at intervals <= TTL/3, per §4.5.
                let interval = job_timeout / 3;
                loop {
                    tokio::time::sleep(interval).await;
                    if store.set(&lease_key, &worker_id, Some(job_timeout)).await.is_err() {
                        break;
                    }
                    if let Ok(hash) = store.hgetall(&job_hash_key).await {
                        if hash.get("cancel_requested").map(|v| v == "true").unwrap_or(false) {
                            cancel_flag.store(true, Ordering::Relaxed);
                        }
                    }
                }
            })
        };

        let cancelled = {
            let cancel_flag = Arc::clone(&cancel_flag);
            move || cancel_flag.load(Ordering::Relaxed)
        };

        // Soft deadline: give up locally before the reaper would otherwise
        // presume this worker dead, per §4.5.
        let soft_deadline = job_timeout.saturating_sub(self.queue.config().reaper_margin);
        let result = match tokio::time::timeout(soft_deadline, self.generator.generate(&job.payload, &cancelled)).await
        {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::retryable(format!(
                "generation exceeded soft deadline of {soft_deadline:?}"
            ))),
        };
        heartbeat.abort();

        // Final check in case cancellation landed after the generator
        // returned but before the heartbeat task's next poll.
        let hash = store.hgetall(&job_hash_key).await?;
        let cancel_requested = cancel_flag.load(Ordering::Relaxed)
            || hash.get("cancel_requested").map(|v| v == "true").unwrap_or(false);

        if cancel_requested {
            self.queue.fail(job.job_id, "cancelled", false).await?;
            info!(worker_id = %self.worker_id, job_id = %job.job_id, "cancel observed, abandoned");
            return Ok(true);
        }

        match result {
            Ok(result_handle) => {
                self.queue.complete(job.job_id, &result_handle).await?;
            }
            Err(err) => {
                let retryable = err.kind == FailureKind::Retryable;
                self.queue.fail(job.job_id, &err.message, retryable).await?;
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use queue_testing::InMemoryStore;
    use serde_json::json;

    use super::*;
    use crate::{AdmissionController, QueueConfig};

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(
            &self,
            _payload: &serde_json::Value,
            _cancelled: &(dyn Fn() -> bool + Send + Sync),
        ) -> Result<String, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("unreachable".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn generation_past_soft_deadline_is_retried() {
        let config = QueueConfig {
            job_timeout: Duration::from_secs(60),
            reaper_margin: Duration::from_secs(50),
            ..Default::default()
        };
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(QueueManager::new(
            store.clone() as Arc<dyn crate::StoreAdapter>,
            config.clone(),
        ));
        let admission =
            AdmissionController::new(store as Arc<dyn crate::StoreAdapter>, config.clone());
        let job = admission
            .admit("user-1", "pro", json!({"prompt": "slow"}))
            .await
            .unwrap();
        queue.submit(&job).await.unwrap();

        let worker = WorkerLoop::new("worker-1", Arc::clone(&queue), Arc::new(SlowGenerator));
        worker.tick().await.unwrap();

        // Soft deadline (10s) fired well before the 1-hour simulated sleep,
        // and the failure was classified retryable, so the job is back in
        // `queued` with its attempt counter bumped rather than stuck
        // `processing` for the full hour.
        let status = queue.get_status(job.job_id).await.unwrap();
        assert_eq!(status.status, "queued");
    }
}
