//! Redis implementation of the queue core's `StoreAdapter`.
//!
//! This crate provides a production `StoreAdapter` backed by Redis, using a
//! pooled connection and a Lua script for the one primitive that needs a
//! server-side compare-and-delete (`delete_if_value`) to stay atomic. Every
//! primitive retries transient connection/I/O failures with bounded
//! exponential backoff (§7): a connection blip is retried locally and never
//! surfaced to a caller; only a retry budget exhausted against a genuinely
//! unavailable backend produces an error, tagged so the HTTP layer maps it
//! to 503 instead of a generic 500.
//!
//! # Key layout
//!
//! ```text
//! queue:pending                      sorted set, member = job_id, score = priority*SHIFT + created_at
//! queue:inflight                     list, member = job_id
//! queue:completed / queue:failed     capped ring lists
//! job:{job_id}                       hash of job fields
//! job:{job_id}:lease                 string, value = worker_id, TTL-bounded
//! user:{user_id}:jobs:{YYYY-MM}      integer counter, TTL 31 days
//! stats:completed:{date} / failed    daily counters, TTL 48h
//! stats:avg_job_seconds              scalar rolling mean
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use queue_store_redis::RedisStoreAdapter;
//!
//! let store = RedisStoreAdapter::connect("redis://localhost:6379").await?;
//! let queue = queue_core::QueueManager::new(std::sync::Arc::new(store), config);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use deadpool_redis::{Config, Pool, Runtime};
use queue_core::{ScoredMember, StoreAdapter, StoreUnavailable};
use redis::{AsyncCommands, Script};
use tracing::{debug, warn};

/// Atomically deletes `KEYS[1]` only if its current value equals `ARGV[1]`.
/// Used by `delete_if_value` so a reaper racing a completing worker never
/// deletes a lease some other caller already re-acquired.
const DELETE_IF_VALUE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisStoreAdapter {
    pool: Pool,
}

impl RedisStoreAdapter {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let config = Config::from_url(redis_url);
        let pool = config.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Five seconds of jittered exponential backoff, starting at 50ms. A
    /// command against a healthy Redis completes in microseconds, so this
    /// budget only ever gets exercised by a connection that is actually
    /// struggling — a real outage exhausts it and surfaces as 503 rather
    /// than hanging the caller indefinitely.
    fn backoff_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(Duration::from_secs(5)),
            ..ExponentialBackoff::default()
        }
    }

    /// Runs `f` under the backoff policy above. `f` is re-invoked from
    /// scratch on every retry (it must re-acquire its own pooled
    /// connection), so a dropped connection doesn't get handed back to a
    /// retry attempt that would just fail again immediately.
    async fn retry<T, F, Fut>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, backoff::Error<anyhow::Error>>>,
    {
        backoff::future::retry(Self::backoff_policy(), f)
            .await
            .map_err(|err| {
                warn!(%err, "store retry budget exhausted");
                anyhow::Error::new(StoreUnavailable(err))
            })
    }
}

/// Wraps a transient store error for the backoff policy, logging at debug
/// per attempt as §7 requires.
fn transient(op: &'static str, err: impl Into<anyhow::Error>) -> backoff::Error<anyhow::Error> {
    let err = err.into();
    debug!(op, %err, "transient store error, retrying");
    backoff::Error::transient(err)
}

fn ttl_ms(ttl: Duration) -> i64 {
    ttl.as_millis() as i64
}

#[async_trait]
impl StoreAdapter for RedisStoreAdapter {
    async fn zadd(&self, key: &str, score: f64, member: &str) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let member = member.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let member = member.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("zadd", e))?;
                conn.zadd::<_, _, _, ()>(&key, &member, score)
                    .await
                    .map_err(|e| transient("zadd", e))?;
                Ok(())
            }
        })
        .await
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> anyhow::Result<Vec<ScoredMember>> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("zrange", e))?;
                let raw: Vec<(String, f64)> = conn
                    .zrange_withscores(&key, start, stop)
                    .await
                    .map_err(|e| transient("zrange", e))?;
                Ok(raw
                    .into_iter()
                    .map(|(member, score)| ScoredMember { member, score })
                    .collect())
            }
        })
        .await
    }

    async fn zrem(&self, key: &str, member: &str) -> anyhow::Result<bool> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let member = member.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let member = member.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("zrem", e))?;
                let removed: i64 = conn
                    .zrem(&key, &member)
                    .await
                    .map_err(|e| transient("zrem", e))?;
                Ok(removed > 0)
            }
        })
        .await
    }

    async fn zrank(&self, key: &str, member: &str) -> anyhow::Result<Option<u64>> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let member = member.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let member = member.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("zrank", e))?;
                let rank: Option<u64> = conn
                    .zrank(&key, &member)
                    .await
                    .map_err(|e| transient("zrank", e))?;
                Ok(rank)
            }
        })
        .await
    }

    async fn zcard(&self, key: &str) -> anyhow::Result<u64> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("zcard", e))?;
                conn.zcard(&key).await.map_err(|e| transient("zcard", e))
            }
        })
        .await
    }

    async fn lpush(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("lpush", e))?;
                conn.lpush::<_, _, ()>(&key, &value)
                    .await
                    .map_err(|e| transient("lpush", e))?;
                Ok(())
            }
        })
        .await
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> anyhow::Result<u64> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("lrem", e))?;
                let removed: i64 = conn
                    .lrem(&key, count as isize, &value)
                    .await
                    .map_err(|e| transient("lrem", e))?;
                Ok(removed as u64)
            }
        })
        .await
    }

    async fn llen(&self, key: &str) -> anyhow::Result<u64> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("llen", e))?;
                conn.llen(&key).await.map_err(|e| transient("llen", e))
            }
        })
        .await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("lrange", e))?;
                conn.lrange(&key, start, stop)
                    .await
                    .map_err(|e| transient("lrange", e))
            }
        })
        .await
    }

    async fn ltrim(&self, key: &str, cap: u64) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("ltrim", e))?;
                conn.ltrim::<_, ()>(&key, 0, cap as isize - 1)
                    .await
                    .map_err(|e| transient("ltrim", e))?;
                Ok(())
            }
        })
        .await
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let fields: Vec<(String, String)> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let fields = fields.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("hset", e))?;
                let pairs: Vec<(&str, &str)> =
                    fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                conn.hset_multiple::<_, _, _, ()>(&key, &pairs)
                    .await
                    .map_err(|e| transient("hset", e))?;
                Ok(())
            }
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> anyhow::Result<HashMap<String, String>> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("hgetall", e))?;
                conn.hgetall(&key).await.map_err(|e| transient("hgetall", e))
            }
        })
        .await
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let fields = fields.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("hdel", e))?;
                let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
                conn.hdel::<_, _, ()>(&key, &refs)
                    .await
                    .map_err(|e| transient("hdel", e))?;
                Ok(())
            }
        })
        .await
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> anyhow::Result<i64> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("incr", e))?;
                let next: i64 = conn.incr(&key, 1).await.map_err(|e| transient("incr", e))?;
                if let Some(ttl) = ttl {
                    conn.pexpire::<_, ()>(&key, ttl_ms(ttl))
                        .await
                        .map_err(|e| transient("incr", e))?;
                }
                Ok(next)
            }
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("expire", e))?;
                conn.pexpire::<_, ()>(&key, ttl_ms(ttl))
                    .await
                    .map_err(|e| transient("expire", e))?;
                Ok(())
            }
        })
        .await
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("get", e))?;
                conn.get(&key).await.map_err(|e| transient("get", e))
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("set", e))?;
                match ttl {
                    Some(ttl) => conn
                        .set_ex::<_, _, ()>(&key, &value, ttl.as_secs().max(1))
                        .await
                        .map_err(|e| transient("set", e))?,
                    None => conn
                        .set::<_, _, ()>(&key, &value)
                        .await
                        .map_err(|e| transient("set", e))?,
                }
                Ok(())
            }
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("set_if_absent", e))?;
                let reply: Option<String> = redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms(ttl))
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| transient("set_if_absent", e))?;
                Ok(reply.is_some())
            }
        })
        .await
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> anyhow::Result<bool> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("delete_if_value", e))?;
                let script = Script::new(DELETE_IF_VALUE_SCRIPT);
                let deleted: i64 = script
                    .key(&key)
                    .arg(&value)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| transient("delete_if_value", e))?;
                Ok(deleted > 0)
            }
        })
        .await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        self.retry(move || {
            let pool = pool.clone();
            let key = key.clone();
            async move {
                let mut conn = pool.get().await.map_err(|e| transient("delete", e))?;
                conn.del::<_, ()>(&key)
                    .await
                    .map_err(|e| transient("delete", e))?;
                Ok(())
            }
        })
        .await
    }
}
