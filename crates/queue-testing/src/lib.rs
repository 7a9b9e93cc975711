//! In-memory `StoreAdapter` test double.
//!
//! Gives the queue core's tests identical primitive semantics to the Redis
//! adapter without a network dependency, so `QueueManager`, `TimeoutReaper`,
//! and `WorkerLoop` can all be exercised deterministically. Every method
//! locks the whole state for its duration, which trivially satisfies
//! "individually atomic" for a test double (a production adapter needs
//! per-key atomicity; a test double just needs correctness).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use queue_core::{ScoredMember, StoreAdapter};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    sorted_sets: HashMap<String, HashMap<String, f64>>,
    lists: HashMap<String, Vec<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, String>,
    /// TTL deadlines, tracked independently of which of the four maps above
    /// a key lives in — Redis's `EXPIRE` applies uniformly to any key type,
    /// so the job hash `expire()` calls in `QueueManager` (retention window)
    /// need to work exactly like the lease/counter `expire()` calls do.
    expirations: HashMap<String, Instant>,
}

impl State {
    /// Lazily drops a key from whichever map holds it once its deadline has
    /// passed. Called at the top of every primitive that reads or writes a
    /// key, mirroring Redis's "expired keys are gone on next access".
    fn expire_if_due(&mut self, key: &str) {
        if let Some(deadline) = self.expirations.get(key) {
            if Instant::now() >= *deadline {
                self.sorted_sets.remove(key);
                self.lists.remove(key);
                self.hashes.remove(key);
                self.strings.remove(key);
                self.expirations.remove(key);
            }
        }
    }

    fn set_ttl(&mut self, key: &str, ttl: Option<Duration>) {
        match ttl {
            Some(ttl) => {
                self.expirations.insert(key.to_string(), Instant::now() + ttl);
            }
            None => {
                self.expirations.remove(key);
            }
        }
    }

    fn key_exists(&self, key: &str) -> bool {
        self.sorted_sets.contains_key(key)
            || self.lists.contains_key(key)
            || self.hashes.contains_key(key)
            || self.strings.contains_key(key)
    }

    fn remove_key(&mut self, key: &str) {
        self.sorted_sets.remove(key);
        self.lists.remove(key);
        self.hashes.remove(key);
        self.strings.remove(key);
        self.expirations.remove(key);
    }
}

/// An in-memory `StoreAdapter`. Not for production use — no persistence, no
/// cross-process sharing, and TTLs are enforced lazily on read rather than
/// by a background sweep.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStore {
    async fn zadd(&self, key: &str, score: f64, member: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        state
            .sorted_sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> anyhow::Result<Vec<ScoredMember>> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        let Some(set) = state.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<ScoredMember> = set
            .iter()
            .map(|(member, score)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect();
        members.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap().then_with(|| a.member.cmp(&b.member)));
        Ok(slice_range(&members, start, stop).to_vec())
    }

    async fn zrem(&self, key: &str, member: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        Ok(state
            .sorted_sets
            .get_mut(key)
            .map(|set| set.remove(member).is_some())
            .unwrap_or(false))
    }

    async fn zrank(&self, key: &str, member: &str) -> anyhow::Result<Option<u64>> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        let Some(set) = state.sorted_sets.get(key) else {
            return Ok(None);
        };
        let Some(&target_score) = set.get(member) else {
            return Ok(None);
        };
        let mut sorted: Vec<(&String, &f64)> = set.iter().collect();
        sorted.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap().then_with(|| a.0.cmp(b.0)));
        Ok(sorted
            .iter()
            .position(|(m, s)| m.as_str() == member && **s == target_score)
            .map(|p| p as u64))
    }

    async fn zcard(&self, key: &str) -> anyhow::Result<u64> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        Ok(state.sorted_sets.get(key).map(|s| s.len()).unwrap_or(0) as u64)
    }

    async fn lpush(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        state.lists.entry(key.to_string()).or_default().insert(0, value.to_string());
        Ok(())
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> anyhow::Result<u64> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        if count == 0 {
            list.retain(|v| v != value);
        } else {
            let mut remaining = count.unsigned_abs() as usize;
            list.retain(|v| {
                if v == value && remaining > 0 {
                    remaining -= 1;
                    false
                } else {
                    true
                }
            });
        }
        Ok((before - list.len()) as u64)
    }

    async fn llen(&self, key: &str) -> anyhow::Result<u64> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        Ok(state.lists.get(key).map(|l| l.len()).unwrap_or(0) as u64)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(slice_range(list, start, stop).to_vec())
    }

    async fn ltrim(&self, key: &str, cap: u64) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        if let Some(list) = state.lists.get_mut(key) {
            list.truncate(cap as usize);
        }
        Ok(())
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> anyhow::Result<HashMap<String, String>> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        if let Some(hash) = state.hashes.get_mut(key) {
            for field in fields {
                hash.remove(*field);
            }
        }
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> anyhow::Result<i64> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        let current: i64 = state.strings.get(key).and_then(|v| v.parse().ok()).unwrap_or(0);
        let next = current + 1;
        state.strings.insert(key.to_string(), next.to_string());
        if ttl.is_some() {
            state.set_ttl(key, ttl);
        }
        Ok(next)
    }

    /// Matches Redis's `EXPIRE`: applies uniformly to whichever key type is
    /// present (string, hash, list, or sorted set), and is a no-op if the
    /// key doesn't exist.
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        if state.key_exists(key) {
            state.set_ttl(key, Some(ttl));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        Ok(state.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        state.strings.insert(key.to_string(), value.to_string());
        state.set_ttl(key, ttl);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        if state.strings.contains_key(key) {
            return Ok(false);
        }
        state.strings.insert(key.to_string(), value.to_string());
        state.set_ttl(key, Some(ttl));
        Ok(true)
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        state.expire_if_due(key);
        if state.strings.get(key).map(String::as_str) == Some(value) {
            state.remove_key(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.remove_key(key);
        Ok(())
    }
}

impl InMemoryStore {
    /// Forces any key with a TTL earlier than now to be treated as expired
    /// on the next access. Tests call this after manipulating a fake clock
    /// instead of sleeping in real time (e.g. to fast-forward past a 1
    /// second lease TTL without literally sleeping for an hour).
    pub async fn expire_all_due(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let due: Vec<String> = state
            .expirations
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(k, _)| k.clone())
            .collect();
        for key in due {
            state.remove_key(&key);
        }
    }
}

fn slice_range<T: Clone>(items: &[T], start: isize, stop: isize) -> Vec<T> {
    let len = items.len() as isize;
    if len == 0 {
        return Vec::new();
    }
    let norm = |i: isize| -> isize {
        if i < 0 {
            (len + i).max(0)
        } else {
            i.min(len - 1).max(0)
        }
    };
    let start = norm(start);
    let stop = if stop < 0 { (len + stop).max(-1) } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return Vec::new();
    }
    items[start as usize..=(stop as usize).min(items.len() - 1)].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zrange_orders_by_score_then_member() {
        let store = InMemoryStore::new();
        store.zadd("z", 3.0, "c").await.unwrap();
        store.zadd("z", 1.0, "a").await.unwrap();
        store.zadd("z", 2.0, "b").await.unwrap();
        let head = store.zrange("z", 0, 0).await.unwrap();
        assert_eq!(head[0].member, "a");
    }

    #[tokio::test]
    async fn set_if_absent_then_delete_if_value_roundtrip() {
        let store = InMemoryStore::new();
        assert!(store.set_if_absent("lease:1", "worker-a", Duration::from_secs(60)).await.unwrap());
        assert!(!store.set_if_absent("lease:1", "worker-b", Duration::from_secs(60)).await.unwrap());
        assert!(!store.delete_if_value("lease:1", "worker-b").await.unwrap());
        assert!(store.delete_if_value("lease:1", "worker-a").await.unwrap());
        assert_eq!(store.get("lease:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lrem_count_zero_removes_all_occurrences() {
        let store = InMemoryStore::new();
        store.lpush("l", "x").await.unwrap();
        store.lpush("l", "y").await.unwrap();
        store.lpush("l", "x").await.unwrap();
        let removed = store.lrem("l", 0, "x").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.llen("l").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expire_applies_to_hash_keys_not_just_strings() {
        let store = InMemoryStore::new();
        store.hset("job:1", &[("status", "completed".to_string())]).await.unwrap();
        store.expire("job:1", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fields = store.hgetall("job:1").await.unwrap();
        assert!(fields.is_empty());
    }
}
