//! Stats/Estimator: derives queue depth, average processing time, position,
//! and ETA. Reads without mutating, except for the rolling average update
//! folded into `complete` (and the daily counters touched by `complete`/
//! `fail`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::job::{Job, JobStatus};
use crate::store::{keys, StoreAdapter};

/// Exponential-weighting factor for the rolling average job duration.
const EWMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed_today: u64,
    pub failed_today: u64,
    pub avg_processing_time_minutes: f64,
    pub estimated_wait_minutes: f64,
}

/// Shape varies by status per §6: always `{job_id, status, created_at}`,
/// plus status-specific fields. Modeled as one struct with `Option`s (all
/// `None` fields are omitted on serialization) rather than an enum so the
/// HTTP layer can serialize it directly without a second translation.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_minutes: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct StatsEstimator {
    store: Arc<dyn StoreAdapter>,
    config: QueueConfig,
}

impl StatsEstimator {
    pub fn new(store: Arc<dyn StoreAdapter>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    async fn avg_job_seconds(store: &dyn StoreAdapter, seed: f64) -> anyhow::Result<f64> {
        Ok(store
            .get(keys::AVG_JOB_SECONDS)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(seed))
    }

    /// Read-modify-write of the rolling mean. Best-effort: the value is an
    /// estimate, not correctness-bearing, so no extra atomicity is needed
    /// beyond "eventually reflects recent completions".
    pub async fn record_completion(
        store: &dyn StoreAdapter,
        config: &QueueConfig,
        completed_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        if let Some(started) = started_at {
            let duration = (completed_at - started).num_milliseconds() as f64 / 1000.0;
            let previous = Self::avg_job_seconds(store, config.avg_job_seconds_seed).await?;
            let updated = EWMA_ALPHA * duration + (1.0 - EWMA_ALPHA) * previous;
            store.set(keys::AVG_JOB_SECONDS, &updated.to_string(), None).await?;
        }
        let date = completed_at.date_naive();
        store
            .incr(&keys::daily_completed(date), Some(config.daily_stats_ttl))
            .await?;
        Ok(())
    }

    pub async fn record_failure(store: &dyn StoreAdapter, failed_at: DateTime<Utc>) -> anyhow::Result<()> {
        let date = failed_at.date_naive();
        // TTL is set on first increment of the day; subsequent incr calls on
        // an already-TTL'd key leave the existing expiry alone, which is
        // fine — the 48h window always starts from the day's first event.
        store
            .incr(&keys::daily_failed(date), Some(std::time::Duration::from_secs(48 * 3600)))
            .await?;
        Ok(())
    }

    pub async fn queue_stats(&self) -> anyhow::Result<QueueStats> {
        let pending = self.store.zcard(keys::PENDING).await?;
        let processing = self.store.llen(keys::INFLIGHT).await?;
        let today = Utc::now().date_naive();
        let completed_today = self.daily_count(keys::daily_completed(today)).await?;
        let failed_today = self.daily_count(keys::daily_failed(today)).await?;
        let avg_job_seconds = Self::avg_job_seconds(&*self.store, self.config.avg_job_seconds_seed).await?;

        let estimated_wait_minutes = (pending as f64 / self.config.max_concurrent_jobs as f64)
            * avg_job_seconds
            / 60.0;

        Ok(QueueStats {
            pending,
            processing,
            completed_today,
            failed_today,
            avg_processing_time_minutes: avg_job_seconds / 60.0,
            estimated_wait_minutes,
        })
    }

    async fn daily_count(&self, key: String) -> anyhow::Result<u64> {
        Ok(self
            .store
            .get(&key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// 1-indexed `zrank + 1`.
    pub async fn position(&self, job_id: Uuid) -> anyhow::Result<Option<u64>> {
        Ok(self
            .store
            .zrank(keys::PENDING, &job_id.to_string())
            .await?
            .map(|r| r + 1))
    }

    pub async fn estimated_start(&self, position: u64) -> anyhow::Result<DateTime<Utc>> {
        let avg_job_seconds = Self::avg_job_seconds(&*self.store, self.config.avg_job_seconds_seed).await?;
        let seconds_ahead = position as f64 * avg_job_seconds / self.config.max_concurrent_jobs as f64;
        Ok(Utc::now() + chrono::Duration::milliseconds((seconds_ahead * 1000.0) as i64))
    }

    pub async fn status_view(&self, job: &Job) -> anyhow::Result<JobStatusView> {
        let mut view = JobStatusView {
            job_id: job.job_id,
            status: job.status.as_str(),
            created_at: job.created_at,
            queue_position: None,
            estimated_start: None,
            estimated_wait_minutes: None,
            started_at: None,
            elapsed_seconds: None,
            worker_id: None,
            completed_at: None,
            result_handle: None,
            duration_seconds: None,
            error: None,
        };

        match job.status {
            JobStatus::Queued => {
                if let Some(position) = self.position(job.job_id).await? {
                    let stats = self.queue_stats().await?;
                    view.queue_position = Some(position);
                    view.estimated_start = Some(self.estimated_start(position).await?);
                    view.estimated_wait_minutes = Some(stats.estimated_wait_minutes);
                }
            }
            JobStatus::Processing => {
                view.started_at = job.started_at;
                view.worker_id = job.worker_id.clone();
                if let Some(started) = job.started_at {
                    view.elapsed_seconds = Some((Utc::now() - started).num_seconds());
                }
            }
            JobStatus::Completed => {
                view.completed_at = job.completed_at;
                view.result_handle = job.result_handle.clone();
                if let (Some(started), Some(completed)) = (job.started_at, job.completed_at) {
                    view.duration_seconds = Some((completed - started).num_seconds());
                }
            }
            JobStatus::Failed => {
                view.completed_at = job.completed_at;
                view.error = job.error_message.clone();
            }
            JobStatus::Cancelled => {
                view.completed_at = job.completed_at;
            }
        }

        Ok(view)
    }
}
