//! End-to-end scenarios from the spec's testable-properties section,
//! exercised against the in-memory store double.

use std::sync::Arc;
use std::time::Duration;

use queue_testing::InMemoryStore;
use serde_json::json;

use crate::{AdmissionController, QueueConfig, QueueManager, RejectionReason, Tier, TimeoutReaper};

fn manager(config: QueueConfig) -> (QueueManager, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let queue = QueueManager::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);
    (queue, store)
}

async fn submit(
    admission: &AdmissionController,
    queue: &QueueManager,
    user_id: &str,
    tier: &str,
) -> crate::Job {
    let job = admission
        .admit(user_id, tier, json!({"prompt": "build me a thing"}))
        .await
        .expect("admission should succeed");
    queue.submit(&job).await.expect("submit should succeed");
    job
}

#[tokio::test]
async fn priority_preemption_enterprise_before_free() {
    let config = QueueConfig {
        max_concurrent_jobs: 1,
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    let a = submit(&admission, &queue, "user-a", "free").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = submit(&admission, &queue, "user-b", "enterprise").await;

    let first = queue.claim_next("worker-1").await.unwrap().unwrap();
    assert_eq!(first.job_id, b.job_id);

    // make room for the second claim
    queue.complete(first.job_id, "handle").await.unwrap();
    let second = queue.claim_next("worker-1").await.unwrap().unwrap();
    assert_eq!(second.job_id, a.job_id);
}

#[tokio::test]
async fn fifo_within_tier() {
    let config = QueueConfig {
        max_concurrent_jobs: 1,
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    let x = submit(&admission, &queue, "user-x", "pro").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let y = submit(&admission, &queue, "user-y", "pro").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let z = submit(&admission, &queue, "user-z", "pro").await;

    let first = queue.claim_next("w").await.unwrap().unwrap();
    assert_eq!(first.job_id, x.job_id);
    queue.complete(first.job_id, "h").await.unwrap();

    let second = queue.claim_next("w").await.unwrap().unwrap();
    assert_eq!(second.job_id, y.job_id);
    queue.complete(second.job_id, "h").await.unwrap();

    let third = queue.claim_next("w").await.unwrap().unwrap();
    assert_eq!(third.job_id, z.job_id);
}

#[tokio::test]
async fn concurrency_cap_blocks_a_fourth_claim() {
    let config = QueueConfig {
        max_concurrent_jobs: 3,
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    for i in 0..4 {
        submit(&admission, &queue, &format!("user-{i}"), "pro").await;
    }

    assert!(queue.claim_next("w1").await.unwrap().is_some());
    assert!(queue.claim_next("w2").await.unwrap().is_some());
    let third = queue.claim_next("w3").await.unwrap();
    assert!(third.is_some());

    // at capacity now; a fourth claim must return None
    assert!(queue.claim_next("w4").await.unwrap().is_none());

    queue.complete(third.unwrap().job_id, "h").await.unwrap();
    assert!(queue.claim_next("w4").await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_never_exceed_the_global_cap() {
    let config = QueueConfig {
        max_concurrent_jobs: 3,
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config.clone());

    // "pro" has no tier-level `concurrent_cap`, so this exercises only the
    // global cap: one more claimer than there is room for, all racing the
    // same shared store concurrently rather than taking turns.
    let claimant_count = config.max_concurrent_jobs + 1;
    for i in 0..claimant_count {
        submit(&admission, &queue, &format!("user-{i}"), "pro").await;
    }

    let queue = Arc::new(queue);
    let handles: Vec<_> = (0..claimant_count)
        .map(|i| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.claim_next(&format!("worker-{i}")).await.unwrap() })
        })
        .collect();

    let mut claimed = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            claimed += 1;
        }
    }

    assert_eq!(claimed, config.max_concurrent_jobs as usize);
    assert_eq!(store.llen(crate::keys::INFLIGHT).await.unwrap(), config.max_concurrent_jobs);
}

#[tokio::test]
async fn tier_concurrent_cap_blocks_a_second_same_tier_claim() {
    let config = QueueConfig {
        max_concurrent_jobs: 10,
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config.clone());

    let first = submit(&admission, &queue, "user-1", "free").await;
    let second = submit(&admission, &queue, "user-2", "free").await;

    let claimed = queue.claim_next("w1").await.unwrap();
    assert_eq!(claimed.unwrap().job_id, first.job_id);

    // free's own `concurrent_cap` is 1; the global cap (10) has plenty of
    // room left, but the second free-tier job must still wait its turn.
    assert!(queue.claim_next("w2").await.unwrap().is_none());

    let pending = store.zrange(crate::keys::PENDING, 0, -1).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].member, second.job_id.to_string());
}

#[tokio::test]
async fn timeout_recovery_requeues_with_incremented_attempt() {
    let config = QueueConfig {
        max_concurrent_jobs: 3,
        job_timeout: Duration::from_millis(1),
        max_attempts: 3,
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config.clone());

    let job = submit(&admission, &queue, "user-j", "pro").await;
    let claimed = queue.claim_next("worker-dead").await.unwrap().unwrap();
    assert_eq!(claimed.job_id, job.job_id);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let reaper = TimeoutReaper::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);
    let reaped = reaper.sweep().await.unwrap();
    assert_eq!(reaped, 1);

    let status = queue.get_status(job.job_id).await.unwrap();
    assert_eq!(status.status, "queued");

    let reclaimed = queue.claim_next("worker-fresh").await.unwrap().unwrap();
    assert_eq!(reclaimed.job_id, job.job_id);
    assert_eq!(reclaimed.attempt, 2);
}

#[tokio::test]
async fn reaper_sweep_is_idempotent() {
    let config = QueueConfig {
        job_timeout: Duration::from_millis(1),
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config.clone());

    let job = submit(&admission, &queue, "user-k", "pro").await;
    queue.claim_next("worker-dead").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reaper = TimeoutReaper::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);
    let first_sweep = reaper.sweep().await.unwrap();
    let second_sweep = reaper.sweep().await.unwrap();
    assert_eq!(first_sweep, 1);
    assert_eq!(second_sweep, 0);

    let status = queue.get_status(job.job_id).await.unwrap();
    assert_eq!(status.status, "queued");
}

#[tokio::test]
async fn cancel_in_queue_removes_from_pending() {
    let config = QueueConfig::default();
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    let job = submit(&admission, &queue, "user-k", "indie").await;
    let pending_before = store.zcard(crate::keys::PENDING).await.unwrap();
    queue.cancel(job.job_id).await.unwrap();
    let pending_after = store.zcard(crate::keys::PENDING).await.unwrap();
    assert_eq!(pending_after, pending_before - 1);

    let status = queue.get_status(job.job_id).await.unwrap();
    assert_eq!(status.status, "cancelled");
}

#[tokio::test]
async fn free_tier_quota_rejects_second_submission_same_month() {
    let config = QueueConfig::default();
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    submit(&admission, &queue, "user-free", "free").await;
    let second = admission
        .admit("user-free", "free", json!({"prompt": "again"}))
        .await;
    assert_eq!(second.unwrap_err(), RejectionReason::QuotaExceeded);
}

#[tokio::test]
async fn queue_full_rejects_at_cap() {
    let config = QueueConfig {
        max_queue_size: 2,
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    submit(&admission, &queue, "user-1", "pro").await;
    submit(&admission, &queue, "user-2", "pro").await;
    let third = admission.admit("user-3", "pro", json!({"a": 1})).await;
    assert_eq!(third.unwrap_err(), RejectionReason::QueueFull);
}

#[tokio::test]
async fn complete_is_idempotent() {
    let config = QueueConfig::default();
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    let job = submit(&admission, &queue, "user-1", "pro").await;
    queue.claim_next("w").await.unwrap();
    queue.complete(job.job_id, "handle-1").await.unwrap();
    // second call must be a no-op success, not an error, and must not
    // overwrite the first result handle.
    queue.complete(job.job_id, "handle-2").await.unwrap();

    let status = queue.get_status(job.job_id).await.unwrap();
    assert_eq!(status.result_handle.as_deref(), Some("handle-1"));
}

#[tokio::test]
async fn fail_exhausts_attempts_then_marks_failed() {
    let config = QueueConfig {
        max_attempts: 2,
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    let job = submit(&admission, &queue, "user-1", "pro").await;

    queue.claim_next("w").await.unwrap();
    queue.fail(job.job_id, "boom", true).await.unwrap();
    let status = queue.get_status(job.job_id).await.unwrap();
    assert_eq!(status.status, "queued");

    queue.claim_next("w").await.unwrap();
    queue.fail(job.job_id, "boom again", true).await.unwrap();
    let status = queue.get_status(job.job_id).await.unwrap();
    assert_eq!(status.status, "failed");
    assert_eq!(status.error.as_deref(), Some("boom again"));
}

#[tokio::test]
async fn invalid_tier_is_rejected() {
    let config = QueueConfig::default();
    let (_queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    let result = admission.admit("user-1", "hobbyist", json!({"a": 1})).await;
    assert_eq!(result.unwrap_err(), RejectionReason::InvalidTier);
}

#[tokio::test]
async fn cancel_of_completed_job_is_illegal_transition() {
    let config = QueueConfig::default();
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    let job = submit(&admission, &queue, "user-1", "pro").await;
    queue.claim_next("w").await.unwrap();
    queue.complete(job.job_id, "h").await.unwrap();

    let result = queue.cancel(job.job_id).await;
    assert!(matches!(result, Err(crate::QueueError::IllegalTransition(_))));
}

#[tokio::test]
async fn completed_job_record_expires_after_retention_window() {
    let config = QueueConfig {
        retention: Duration::from_millis(1),
        ..Default::default()
    };
    let (queue, store) = manager(config.clone());
    let admission = AdmissionController::new(store.clone() as Arc<dyn crate::StoreAdapter>, config);

    let job = submit(&admission, &queue, "user-1", "pro").await;
    queue.claim_next("w").await.unwrap();
    queue.complete(job.job_id, "handle").await.unwrap();

    // immediately after completion the record still answers
    assert_eq!(queue.get_status(job.job_id).await.unwrap().status, "completed");

    tokio::time::sleep(Duration::from_millis(5)).await;
    store.expire_all_due().await;

    let result = queue.get_status(job.job_id).await;
    assert!(matches!(result, Err(crate::QueueError::JobNotFound(_))));
}

#[tokio::test]
async fn store_unavailable_categorizes_as_unavailable_not_internal() {
    use crate::error::{Categorizable, ErrorCategory};
    use crate::store::StoreUnavailable;

    let underlying = anyhow::anyhow!("connection pool exhausted");
    let err = crate::QueueError::Store(anyhow::Error::new(StoreUnavailable(underlying)));
    assert_eq!(err.category(), ErrorCategory::Unavailable);

    let internal = crate::QueueError::Store(anyhow::anyhow!("malformed record"));
    assert_eq!(internal.category(), ErrorCategory::Internal);
}

#[test]
fn priority_score_orders_tiers_strictly() {
    use chrono::Utc;
    let now = Utc::now();
    let enterprise = Tier::Enterprise.priority();
    let free = Tier::Free.priority();
    assert!(crate::priority_score(enterprise, now) < crate::priority_score(free, now));
}
