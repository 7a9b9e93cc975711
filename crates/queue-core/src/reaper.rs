//! Timeout Reaper: a long-lived background task that sweeps the in-flight
//! list for entries whose lease has expired and returns them to pending or
//! marks them failed, per the retry policy in `QueueConfig`.
//!
//! Constructed with the same `StoreAdapter`/`QueueConfig` value types the
//! Queue Manager uses — never a global — so a single sweep can be driven
//! manually in a test against the in-memory adapter instead of waiting on a
//! real interval timer.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::job::{priority_score, Job, JobStatus};
use crate::queue_manager::{release_global_slot, release_tier_slot};
use crate::store::{keys, StoreAdapter};

pub struct TimeoutReaper {
    store: Arc<dyn StoreAdapter>,
    config: QueueConfig,
}

impl TimeoutReaper {
    pub fn new(store: Arc<dyn StoreAdapter>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    /// Runs forever on `config.reaper_interval`, logging and swallowing
    /// individual sweep errors so one bad tick never kills the task.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.reaper_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep().await {
                warn!(%err, "reaper sweep failed");
            }
        }
    }

    /// One sweep. Idempotent and safe to run concurrently with workers: it
    /// uses `delete_if_value` on the lease and a compare-read on the hash so
    /// a reaper that loses a race to a just-completed job never clobbers it.
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let inflight = self.store.lrange(keys::INFLIGHT, 0, -1).await?;
        let mut reaped = 0;

        for member in inflight {
            let Ok(job_id) = Uuid::parse_str(&member) else {
                continue;
            };
            let lease_key = keys::lease(job_id);
            if self.store.get(&lease_key).await?.is_some() {
                continue; // lease still live, worker presumed healthy
            }

            self.reap_one(job_id, &member).await?;
            reaped += 1;
        }

        Ok(reaped)
    }

    async fn reap_one(&self, job_id: Uuid, member: &str) -> anyhow::Result<()> {
        let hash_key = keys::job(job_id);
        let fields = self.store.hgetall(&hash_key).await?;
        if fields.is_empty() {
            // Ghost in-flight entry with no backing hash; just drop it. Its
            // tier is unknowable, so only the global slot can be released
            // here — any tier slot it held self-expires on the same TTL as
            // the lease it lost.
            self.store.lrem(keys::INFLIGHT, 0, member).await?;
            release_global_slot(&*self.store, &self.config, member).await?;
            return Ok(());
        }
        let job = Job::from_hash_fields(&fields)?;

        if job.status.is_terminal() {
            // Already completed/failed/cancelled by a racing worker — which
            // already released both slots on its own transition — the
            // in-flight entry is merely stale, drop it without touching the
            // hash. The releases below are idempotent no-ops in that case.
            self.store.lrem(keys::INFLIGHT, 0, member).await?;
            release_global_slot(&*self.store, &self.config, member).await?;
            release_tier_slot(&*self.store, &self.config, job.tier, member).await?;
            return Ok(());
        }

        self.store.lrem(keys::INFLIGHT, 0, member).await?;
        release_global_slot(&*self.store, &self.config, member).await?;
        release_tier_slot(&*self.store, &self.config, job.tier, member).await?;

        let next_attempt = job.attempt + 1;
        if next_attempt <= self.config.max_attempts {
            self.store
                .hset(
                    &hash_key,
                    &[
                        ("status", JobStatus::Queued.as_str().to_string()),
                        ("attempt", next_attempt.to_string()),
                    ],
                )
                .await?;
            self.store.hdel(&hash_key, &["started_at", "worker_id"]).await?;
            self.store
                .zadd(
                    keys::PENDING,
                    priority_score(job.priority, job.created_at),
                    member,
                )
                .await?;
            info!(job_id = %job_id, attempt = next_attempt, "reaped: lease expired, returned to pending");
        } else {
            let now = chrono::Utc::now();
            self.store
                .hset(
                    &hash_key,
                    &[
                        ("status", JobStatus::Failed.as_str().to_string()),
                        ("completed_at", now.to_rfc3339()),
                        ("error_message", "timed out".to_string()),
                    ],
                )
                .await?;
            self.store.expire(&hash_key, self.config.retention).await?;
            self.store.lpush(keys::FAILED_RING, member).await?;
            self.store
                .ltrim(keys::FAILED_RING, self.config.failed_ring_cap)
                .await?;
            crate::stats::StatsEstimator::record_failure(&*self.store, now).await?;
            warn!(job_id = %job_id, "reaped: lease expired, attempts exhausted, marked failed");
        }

        // Compare-and-delete on the worker_id we read, not an unconditional
        // delete: if a lease reappeared between our presence check and now
        // (e.g. a worker's refresh landed late, or another sweep already
        // reaped and a fresh claim re-leased it) this leaves the new lease
        // alone instead of clobbering it.
        if let Some(ref worker_id) = job.worker_id {
            let _ = self.store.delete_if_value(&keys::lease(job_id), worker_id).await;
        }

        Ok(())
    }
}

