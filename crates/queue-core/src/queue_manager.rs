//! Queue Manager: owns every state transition and the invariants in §3 of
//! the data model. Submit, claim, complete, fail, and cancel are composed
//! from the Store Adapter's atomic primitives in orderings chosen so a
//! crash mid-transition always leaves a recoverable state.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::job::{priority_score, Job, JobStatus, Tier};
use crate::stats::{JobStatusView, StatsEstimator};
use crate::store::{keys, StoreAdapter};

/// Bound on how many times `claim_next` retries after losing a race on the
/// current head of `pending`. Pending can only shrink during the retry
/// window (a concurrent claim or cancel), so a handful of retries always
/// converges; this is a backstop against a pathological interleaving, not a
/// tuning knob.
const CLAIM_RETRY_LIMIT: usize = 16;

/// Reserves one of `config.max_concurrent_jobs` numbered slots for `job_id`
/// via `set_if_absent` — the same compare-and-set primitive the per-job
/// lease uses. The acquisition itself is the mutual-exclusion point: unlike
/// a `llen`-then-write check, two concurrent callers racing for the last
/// slot cannot both observe room, because only one of their `set_if_absent`
/// calls on any given slot key can succeed. Shared by `QueueManager` and
/// `TimeoutReaper`, which both need to release a slot a job vacates.
pub(crate) async fn acquire_global_slot(
    store: &dyn StoreAdapter,
    config: &QueueConfig,
    job_id: &str,
) -> anyhow::Result<bool> {
    for n in 0..config.max_concurrent_jobs {
        if store
            .set_if_absent(&keys::concurrency_slot(n), job_id, config.job_timeout)
            .await?
        {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) async fn release_global_slot(
    store: &dyn StoreAdapter,
    config: &QueueConfig,
    job_id: &str,
) -> anyhow::Result<()> {
    for n in 0..config.max_concurrent_jobs {
        if store.delete_if_value(&keys::concurrency_slot(n), job_id).await? {
            return Ok(());
        }
    }
    Ok(())
}

/// Same mechanism as `acquire_global_slot`, scoped to `tier`'s own
/// `concurrent_cap`. A tier with no cap (`None`) always succeeds without
/// touching the store.
pub(crate) async fn acquire_tier_slot(
    store: &dyn StoreAdapter,
    config: &QueueConfig,
    tier: Tier,
    job_id: &str,
) -> anyhow::Result<bool> {
    let Some(cap) = tier.limits().concurrent_cap else {
        return Ok(true);
    };
    for n in 0..cap {
        if store
            .set_if_absent(&keys::tier_concurrency_slot(tier, n), job_id, config.job_timeout)
            .await?
        {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) async fn release_tier_slot(
    store: &dyn StoreAdapter,
    config: &QueueConfig,
    tier: Tier,
    job_id: &str,
) -> anyhow::Result<()> {
    let Some(cap) = tier.limits().concurrent_cap else {
        return Ok(());
    };
    for n in 0..cap {
        if store.delete_if_value(&keys::tier_concurrency_slot(tier, n), job_id).await? {
            return Ok(());
        }
    }
    Ok(())
}

pub struct QueueManager {
    store: Arc<dyn StoreAdapter>,
    config: QueueConfig,
}

impl QueueManager {
    pub fn new(store: Arc<dyn StoreAdapter>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn StoreAdapter> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Writes the job hash, increments the monthly counter, then `zadd`s
    /// into pending — in that order. The `zadd` is the commit point: a
    /// crash before it leaves an invisible "ghost" hash with no index entry,
    /// reaped by a housekeeping pass once it is older than an hour (not
    /// implemented here — out of the core's per-request path, see
    /// `reap_ghost_hashes`).
    pub async fn submit(&self, job: &Job) -> Result<()> {
        let hash_key = keys::job(job.job_id);
        self.store
            .hset(&hash_key, &job.to_hash_fields())
            .await
            .map_err(QueueError::Store)?;

        if let Some(_limit) = job.tier.monthly_limit() {
            let counter_key =
                keys::monthly_counter(&job.user_id, job.created_at.year(), job.created_at.month());
            self.store
                .incr(&counter_key, Some(self.config.monthly_counter_ttl))
                .await
                .map_err(QueueError::Store)?;
        }

        self.store
            .zadd(keys::PENDING, job.priority_score(), &job.job_id.to_string())
            .await
            .map_err(QueueError::Store)?;

        info!(job_id = %job.job_id, user_id = %job.user_id, tier = job.tier.as_str(), "submitted");
        Ok(())
    }

    /// Takes the lowest-scored pending member and moves it to in-flight,
    /// creating a TTL-bounded lease. Refuses when the in-flight list is at
    /// capacity, or when the candidate's own tier is at its
    /// `concurrent_cap` (§6). Returns `Ok(None)` when pending is empty.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        // Non-authoritative short-circuit: skip the pop/slot dance when the
        // in-flight list is obviously full. The real guard is the slot
        // acquisition below, re-checked against every popped candidate
        // rather than once up front.
        let inflight_len = self
            .store
            .llen(keys::INFLIGHT)
            .await
            .map_err(QueueError::Store)?;
        if inflight_len >= self.config.max_concurrent_jobs {
            return Ok(None);
        }

        for _ in 0..CLAIM_RETRY_LIMIT {
            let head = self
                .store
                .zrange(keys::PENDING, 0, 0)
                .await
                .map_err(QueueError::Store)?;
            let Some(candidate) = head.into_iter().next() else {
                return Ok(None);
            };

            // `zrem`'s own atomicity is the mutual-exclusion point: only one
            // concurrent caller's zrem on this member can report success.
            let removed = self
                .store
                .zrem(keys::PENDING, &candidate.member)
                .await
                .map_err(QueueError::Store)?;
            if !removed {
                // Lost the race (another worker or a cancel got there first);
                // the new head is whatever is left, retry.
                continue;
            }

            let job_id = Uuid::parse_str(&candidate.member).map_err(|e| QueueError::Store(e.into()))?;
            let hash_key = keys::job(job_id);
            let fields = self.store.hgetall(&hash_key).await.map_err(QueueError::Store)?;
            let mut job = Job::from_hash_fields(&fields).map_err(QueueError::Store)?;

            // Reserve a global slot and, if this tier caps its own
            // concurrency, a tier slot too. Either reservation failing means
            // we popped a candidate we can't claim right now: give it back
            // to pending at its original score rather than dropping it, and
            // report no work claimable this tick.
            if !acquire_global_slot(&*self.store, &self.config, &candidate.member)
                .await
                .map_err(QueueError::Store)?
            {
                self.store
                    .zadd(keys::PENDING, job.priority_score(), &candidate.member)
                    .await
                    .map_err(QueueError::Store)?;
                return Ok(None);
            }
            if !acquire_tier_slot(&*self.store, &self.config, job.tier, &candidate.member)
                .await
                .map_err(QueueError::Store)?
            {
                release_global_slot(&*self.store, &self.config, &candidate.member)
                    .await
                    .map_err(QueueError::Store)?;
                self.store
                    .zadd(keys::PENDING, job.priority_score(), &candidate.member)
                    .await
                    .map_err(QueueError::Store)?;
                return Ok(None);
            }

            let now = Utc::now();
            job.status = JobStatus::Processing;
            job.started_at = Some(now);
            job.worker_id = Some(worker_id.to_string());

            self.store
                .hset(
                    &hash_key,
                    &[
                        ("status", job.status.as_str().to_string()),
                        ("started_at", now.to_rfc3339()),
                        ("worker_id", worker_id.to_string()),
                    ],
                )
                .await
                .map_err(QueueError::Store)?;
            self.store
                .lpush(keys::INFLIGHT, &candidate.member)
                .await
                .map_err(QueueError::Store)?;
            self.store
                .set_if_absent(&keys::lease(job_id), worker_id, self.config.job_timeout)
                .await
                .map_err(QueueError::Store)?;

            info!(job_id = %job_id, worker_id, "claimed");
            return Ok(Some(job));
        }

        warn!("claim_next exhausted retry budget without claiming a job");
        Ok(None)
    }

    /// Idempotent: a second call on an already-completed job is a no-op
    /// success, matching `fail`'s idempotence under the same rule.
    pub async fn complete(&self, job_id: Uuid, result_handle: &str) -> Result<()> {
        let hash_key = keys::job(job_id);
        let fields = self.store.hgetall(&hash_key).await.map_err(QueueError::Store)?;
        if fields.is_empty() {
            return Err(QueueError::JobNotFound(job_id));
        }
        let job = Job::from_hash_fields(&fields).map_err(QueueError::Store)?;
        if job.status != JobStatus::Processing {
            // Already terminal (our own retry, or a racing reaper/worker
            // already finished it) — no-op success.
            return Ok(());
        }

        let now = Utc::now();
        self.store
            .lrem(keys::INFLIGHT, 0, &job_id.to_string())
            .await
            .map_err(QueueError::Store)?;
        self.store
            .delete(&keys::lease(job_id))
            .await
            .map_err(QueueError::Store)?;
        release_global_slot(&*self.store, &self.config, &job_id.to_string())
            .await
            .map_err(QueueError::Store)?;
        release_tier_slot(&*self.store, &self.config, job.tier, &job_id.to_string())
            .await
            .map_err(QueueError::Store)?;
        self.store
            .hset(
                &hash_key,
                &[
                    ("status", JobStatus::Completed.as_str().to_string()),
                    ("completed_at", now.to_rfc3339()),
                    ("result_handle", result_handle.to_string()),
                ],
            )
            .await
            .map_err(QueueError::Store)?;
        // Bound how long a terminal record answers status queries (§3
        // "retained ... for a configurable retention window").
        self.store
            .expire(&hash_key, self.config.retention)
            .await
            .map_err(QueueError::Store)?;
        self.store
            .lpush(keys::COMPLETED_RING, &job_id.to_string())
            .await
            .map_err(QueueError::Store)?;
        self.store
            .ltrim(keys::COMPLETED_RING, self.config.completed_ring_cap)
            .await
            .map_err(QueueError::Store)?;

        StatsEstimator::record_completion(&*self.store, &self.config, now, job.started_at)
            .await
            .map_err(QueueError::Store)?;

        info!(job_id = %job_id, "completed");
        Ok(())
    }

    /// If `retryable` and under `MAX_ATTEMPTS`, requeues with the original
    /// priority and `created_at` so it keeps its place relative to peers
    /// submitted at the same instant. Otherwise marks `failed`. Idempotent
    /// the same way `complete` is.
    pub async fn fail(&self, job_id: Uuid, error: &str, retryable: bool) -> Result<()> {
        let hash_key = keys::job(job_id);
        let fields = self.store.hgetall(&hash_key).await.map_err(QueueError::Store)?;
        if fields.is_empty() {
            return Err(QueueError::JobNotFound(job_id));
        }
        let job = Job::from_hash_fields(&fields).map_err(QueueError::Store)?;
        if job.status != JobStatus::Processing {
            return Ok(());
        }

        self.store
            .lrem(keys::INFLIGHT, 0, &job_id.to_string())
            .await
            .map_err(QueueError::Store)?;
        self.store
            .delete(&keys::lease(job_id))
            .await
            .map_err(QueueError::Store)?;
        release_global_slot(&*self.store, &self.config, &job_id.to_string())
            .await
            .map_err(QueueError::Store)?;
        release_tier_slot(&*self.store, &self.config, job.tier, &job_id.to_string())
            .await
            .map_err(QueueError::Store)?;

        if retryable && job.attempt < self.config.max_attempts {
            let next_attempt = job.attempt + 1;
            self.store
                .hset(
                    &hash_key,
                    &[
                        ("status", JobStatus::Queued.as_str().to_string()),
                        ("attempt", next_attempt.to_string()),
                    ],
                )
                .await
                .map_err(QueueError::Store)?;
            self.store
                .hdel(&hash_key, &["started_at", "worker_id"])
                .await
                .map_err(QueueError::Store)?;
            self.store
                .zadd(
                    keys::PENDING,
                    priority_score(job.priority, job.created_at),
                    &job_id.to_string(),
                )
                .await
                .map_err(QueueError::Store)?;
            warn!(job_id = %job_id, attempt = next_attempt, %error, "retrying after failure");
        } else {
            let now = Utc::now();
            self.store
                .hset(
                    &hash_key,
                    &[
                        ("status", JobStatus::Failed.as_str().to_string()),
                        ("completed_at", now.to_rfc3339()),
                        ("error_message", error.to_string()),
                    ],
                )
                .await
                .map_err(QueueError::Store)?;
            self.store
                .expire(&hash_key, self.config.retention)
                .await
                .map_err(QueueError::Store)?;
            self.store
                .lpush(keys::FAILED_RING, &job_id.to_string())
                .await
                .map_err(QueueError::Store)?;
            self.store
                .ltrim(keys::FAILED_RING, self.config.failed_ring_cap)
                .await
                .map_err(QueueError::Store)?;
            StatsEstimator::record_failure(&*self.store, now)
                .await
                .map_err(QueueError::Store)?;
            warn!(job_id = %job_id, %error, "failed permanently");
        }
        Ok(())
    }

    /// Permitted when `status` is `queued` or `processing`. Cancelling an
    /// already-terminal job is rejected as `ILLEGAL_TRANSITION`: unlike
    /// `complete`/`fail`, which absorb benign races between a worker and the
    /// reaper, a client-issued cancel on a finished job is a caller mistake
    /// worth surfacing rather than swallowing.
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        let hash_key = keys::job(job_id);
        let fields = self.store.hgetall(&hash_key).await.map_err(QueueError::Store)?;
        if fields.is_empty() {
            return Err(QueueError::JobNotFound(job_id));
        }
        let job = Job::from_hash_fields(&fields).map_err(QueueError::Store)?;

        match job.status {
            JobStatus::Queued => {
                let removed = self
                    .store
                    .zrem(keys::PENDING, &job_id.to_string())
                    .await
                    .map_err(QueueError::Store)?;
                if !removed {
                    // Lost the race to claim_next; the job is no longer
                    // queued by the time we looked. Fall through and report
                    // illegal transition on the now-stale view.
                    return Err(QueueError::IllegalTransition(
                        "job left the pending queue during cancel".into(),
                    ));
                }
                self.store
                    .hset(
                        &hash_key,
                        &[
                            ("status", JobStatus::Cancelled.as_str().to_string()),
                            ("completed_at", Utc::now().to_rfc3339()),
                        ],
                    )
                    .await
                    .map_err(QueueError::Store)?;
                self.store
                    .expire(&hash_key, self.config.retention)
                    .await
                    .map_err(QueueError::Store)?;
            }
            JobStatus::Processing => {
                self.store
                    .hset(&hash_key, &[("cancel_requested", "true".to_string())])
                    .await
                    .map_err(QueueError::Store)?;
                self.store
                    .delete(&keys::lease(job_id))
                    .await
                    .map_err(QueueError::Store)?;
            }
            _ => {
                return Err(QueueError::IllegalTransition(format!(
                    "cannot cancel job in status {}",
                    job.status.as_str()
                )))
            }
        }

        info!(job_id = %job_id, "cancel requested");
        Ok(())
    }

    /// Pure read. Computes `queue_position`/`estimated_start` only when
    /// `queued`, per §6's status-shape-varies-by-status contract.
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView> {
        let hash_key = keys::job(job_id);
        let fields = self.store.hgetall(&hash_key).await.map_err(QueueError::Store)?;
        if fields.is_empty() {
            return Err(QueueError::JobNotFound(job_id));
        }
        let job = Job::from_hash_fields(&fields).map_err(QueueError::Store)?;

        let estimator = StatsEstimator::new(Arc::clone(&self.store), self.config.clone());
        estimator.status_view(&job).await.map_err(QueueError::Store)
    }
}
