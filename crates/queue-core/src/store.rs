//! The Store Adapter façade: a minimal set of atomic primitives the rest of
//! the core depends on, hiding whichever key-value store backs it in
//! production (Redis) or in tests (an in-memory double).
//!
//! Every primitive must be individually atomic. The core composes multi-key
//! transitions from these primitives in a specific order so that a crash
//! mid-transition always leaves the system in a recoverable state; see
//! `QueueManager` for the orderings.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

/// A member/score pair as returned by a sorted-set range read.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    // Sorted-set ops (pending queue, scored by priority/submission time).
    async fn zadd(&self, key: &str, score: f64, member: &str) -> anyhow::Result<()>;
    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> anyhow::Result<Vec<ScoredMember>>;
    /// Returns `true` if the member was present and removed.
    async fn zrem(&self, key: &str, member: &str) -> anyhow::Result<bool>;
    async fn zrank(&self, key: &str, member: &str) -> anyhow::Result<Option<u64>>;
    async fn zcard(&self, key: &str) -> anyhow::Result<u64>;

    // List ops (in-flight, completed ring, failed ring).
    async fn lpush(&self, key: &str, value: &str) -> anyhow::Result<()>;
    /// `count = 0` removes all occurrences of `value`. Returns the number removed.
    async fn lrem(&self, key: &str, count: i64, value: &str) -> anyhow::Result<u64>;
    async fn llen(&self, key: &str) -> anyhow::Result<u64>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>>;
    /// Trims the list to at most `cap` elements, dropping from the tail.
    /// Used to bound the completed/failed rings (§6 "capped length").
    async fn ltrim(&self, key: &str, cap: u64) -> anyhow::Result<()>;

    // Hash ops (the job record itself).
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> anyhow::Result<()>;
    async fn hgetall(&self, key: &str) -> anyhow::Result<HashMap<String, String>>;
    /// Removes individual fields, used when a requeue clears `started_at`/
    /// `worker_id` rather than leaving stale values behind.
    async fn hdel(&self, key: &str, fields: &[&str]) -> anyhow::Result<()>;

    // Counter with TTL (monthly quota, daily stats buckets).
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> anyhow::Result<i64>;
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Generic string read. Doubles as the presence probe for lease keys: a
    /// lease and a counter are both just a string key/value pair at the
    /// storage layer, so the core never special-cases the representation.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()>;

    // Lease primitive.
    /// Sets `key = value` only if absent, with the given TTL. Returns `true`
    /// if the set happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;
    /// Deletes `key` only if its current value equals `value`. Must be
    /// atomic server-side (e.g. a Lua script) so a reaper and a completing
    /// worker never race each other into deleting the wrong lease.
    async fn delete_if_value(&self, key: &str, value: &str) -> anyhow::Result<bool>;
    /// Unconditional delete, for the uncontested cleanup path.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Wraps a store-adapter error that survived its backend's retry budget.
/// `QueueError::category` downcasts for this marker to tell a transient
/// backend outage (503) apart from a malformed record or other internal
/// bug (500); adapters that don't retry never need to produce one.
#[derive(Debug, thiserror::Error)]
#[error("store unavailable after retries: {0}")]
pub struct StoreUnavailable(#[source] pub anyhow::Error);

/// Key-naming scheme shared by every `StoreAdapter` implementation, kept in
/// one place so a renamed index shows up as a single-file diff.
pub mod keys {
    use uuid::Uuid;

    pub const PENDING: &str = "queue:pending";
    pub const INFLIGHT: &str = "queue:inflight";
    pub const COMPLETED_RING: &str = "queue:completed";
    pub const FAILED_RING: &str = "queue:failed";
    pub const AVG_JOB_SECONDS: &str = "stats:avg_job_seconds";

    pub fn job(job_id: Uuid) -> String {
        format!("job:{job_id}")
    }

    pub fn lease(job_id: Uuid) -> String {
        format!("job:{job_id}:lease")
    }

    /// One of `max_concurrent_jobs` numbered reservation keys. Whichever job
    /// holds a `set_if_absent` on this key occupies that concurrency slot;
    /// see `queue_manager::acquire_global_slot`.
    pub fn concurrency_slot(n: u64) -> String {
        format!("queue:slot:{n}")
    }

    /// Same idea as `concurrency_slot`, scoped to a single tier's own
    /// `concurrent_cap`.
    pub fn tier_concurrency_slot(tier: crate::job::Tier, n: u64) -> String {
        format!("queue:slot:{}:{n}", tier.as_str())
    }

    pub fn monthly_counter(user_id: &str, year: i32, month: u32) -> String {
        format!("user:{user_id}:jobs:{year:04}-{month:02}")
    }

    pub fn daily_completed(date: chrono::NaiveDate) -> String {
        format!("stats:completed:{date}")
    }

    pub fn daily_failed(date: chrono::NaiveDate) -> String {
        format!("stats:failed:{date}")
    }
}
