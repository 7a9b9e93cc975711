//! Layered configuration: defaults → optional TOML file → environment
//! variables, environment taking precedence. Read once at process start
//! into a plain value struct and passed by value/`Arc` into every
//! component from then on — the core never re-reads it at call time.

use std::time::Duration;

use queue_core::QueueConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub http_bind_addr: String,
    pub redis_url: String,

    pub max_concurrent_jobs: u64,
    pub max_queue_size: u64,
    pub job_timeout_seconds: u64,
    pub reaper_margin_seconds: u64,
    pub max_attempts: u32,
    pub reaper_interval_seconds: u64,
    pub avg_job_seconds_seed: f64,
    pub worker_poll_seconds: u64,
    pub worker_count: usize,
    pub completed_ring_cap: u64,
    pub failed_ring_cap: u64,
    pub retention_days: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let defaults = QueueConfig::default();
        Self {
            http_bind_addr: "0.0.0.0:8080".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_concurrent_jobs: defaults.max_concurrent_jobs,
            max_queue_size: defaults.max_queue_size,
            job_timeout_seconds: defaults.job_timeout.as_secs(),
            reaper_margin_seconds: defaults.reaper_margin.as_secs(),
            max_attempts: defaults.max_attempts,
            reaper_interval_seconds: defaults.reaper_interval.as_secs(),
            avg_job_seconds_seed: defaults.avg_job_seconds_seed,
            worker_poll_seconds: defaults.worker_poll_interval.as_secs(),
            worker_count: defaults.worker_count,
            completed_ring_cap: defaults.completed_ring_cap,
            failed_ring_cap: defaults.failed_ring_cap,
            retention_days: defaults.retention.as_secs() / (24 * 3600),
        }
    }
}

impl Settings {
    /// Loads defaults, then `queue.toml` if present, then `QUEUE__*`
    /// environment variables (double underscore separates nesting, per the
    /// `config` crate's convention).
    pub fn load() -> anyhow::Result<Self> {
        let defaults = Settings::default();
        let builder = config::Config::builder()
            .set_default("http_bind_addr", defaults.http_bind_addr.clone())?
            .set_default("redis_url", defaults.redis_url.clone())?
            .set_default("max_concurrent_jobs", defaults.max_concurrent_jobs)?
            .set_default("max_queue_size", defaults.max_queue_size)?
            .set_default("job_timeout_seconds", defaults.job_timeout_seconds)?
            .set_default("reaper_margin_seconds", defaults.reaper_margin_seconds)?
            .set_default("max_attempts", defaults.max_attempts)?
            .set_default("reaper_interval_seconds", defaults.reaper_interval_seconds)?
            .set_default("avg_job_seconds_seed", defaults.avg_job_seconds_seed)?
            .set_default("worker_poll_seconds", defaults.worker_poll_seconds)?
            .set_default("worker_count", defaults.worker_count as u64)?
            .set_default("completed_ring_cap", defaults.completed_ring_cap)?
            .set_default("failed_ring_cap", defaults.failed_ring_cap)?
            .set_default("retention_days", defaults.retention_days)?
            .add_source(config::File::with_name("queue").required(false))
            .add_source(config::Environment::with_prefix("QUEUE").separator("__"));

        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            max_queue_size: self.max_queue_size,
            job_timeout: Duration::from_secs(self.job_timeout_seconds),
            reaper_margin: Duration::from_secs(self.reaper_margin_seconds),
            max_attempts: self.max_attempts,
            reaper_interval: Duration::from_secs(self.reaper_interval_seconds),
            avg_job_seconds_seed: self.avg_job_seconds_seed,
            worker_poll_interval: Duration::from_secs(self.worker_poll_seconds),
            worker_count: self.worker_count,
            completed_ring_cap: self.completed_ring_cap,
            failed_ring_cap: self.failed_ring_cap,
            retention: Duration::from_secs(self.retention_days * 24 * 3600),
            ..QueueConfig::default()
        }
    }
}
