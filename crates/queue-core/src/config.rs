//! Queue configuration as a plain value type.
//!
//! The store adapter and this config are passed explicitly into the Queue
//! Manager, Reaper, and Worker Loop at construction time rather than read
//! from globals or module-level constants, so tests can swap either one out
//! and multiple queues can run isolated in the same process.

use std::time::Duration;

use crate::job::Tier;

/// Per-tier limits. A pure lookup table; runtime mutation is not supported.
#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub priority: u8,
    pub monthly_limit: Option<u64>,
    pub concurrent_cap: Option<u64>,
}

impl Tier {
    pub fn limits(self) -> TierLimits {
        TierLimits {
            priority: self.priority(),
            monthly_limit: self.monthly_limit(),
            concurrent_cap: self.concurrent_cap(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent_jobs: u64,
    pub max_queue_size: u64,
    pub job_timeout: Duration,
    /// Margin subtracted from `job_timeout` to get the worker's soft
    /// generation deadline, so a worker gives up on a job and reports
    /// failure locally before the reaper would otherwise presume it dead.
    pub reaper_margin: Duration,
    pub max_attempts: u32,
    pub reaper_interval: Duration,
    pub avg_job_seconds_seed: f64,
    pub worker_poll_interval: Duration,
    pub worker_count: usize,
    pub completed_ring_cap: u64,
    pub failed_ring_cap: u64,
    pub retention: Duration,
    pub monthly_counter_ttl: Duration,
    pub daily_stats_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_queue_size: 1_000,
            job_timeout: Duration::from_secs(3_600),
            reaper_margin: Duration::from_secs(60),
            max_attempts: 3,
            reaper_interval: Duration::from_secs(30),
            avg_job_seconds_seed: 600.0,
            worker_poll_interval: Duration::from_secs(5),
            worker_count: 3,
            completed_ring_cap: 10_000,
            failed_ring_cap: 10_000,
            retention: Duration::from_secs(7 * 24 * 3_600),
            monthly_counter_ttl: Duration::from_secs(31 * 24 * 3_600),
            daily_stats_ttl: Duration::from_secs(48 * 3_600),
        }
    }
}
