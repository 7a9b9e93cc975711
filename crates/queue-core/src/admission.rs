//! Admission Controller: rejects on global queue saturation and per-user
//! monthly quota, or allocates a fully-populated `Job` in `queued` state.
//!
//! The controller only *decides*; it does not write anything to the store.
//! `QueueManager::submit` performs the writes once admission succeeds, so a
//! rejected admission never touches the monthly counter (§9's resolved open
//! question: no quota inflation on a failed submit).

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde_json::Value;

use crate::config::QueueConfig;
use crate::error::RejectionReason;
use crate::job::{Job, Tier};
use crate::store::{keys, StoreAdapter};

pub struct AdmissionController {
    store: Arc<dyn StoreAdapter>,
    config: QueueConfig,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn StoreAdapter>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    /// Validates the request and allocates a `Job`. Does not enqueue it —
    /// the caller (`QueueManager::submit`) owns the write ordering.
    pub async fn admit(
        &self,
        user_id: &str,
        tier_str: &str,
        payload: Value,
    ) -> Result<Job, RejectionReason> {
        let tier = Tier::parse(tier_str).ok_or(RejectionReason::InvalidTier)?;

        if !payload.is_object() || payload.as_object().is_some_and(|m| m.is_empty()) {
            return Err(RejectionReason::InvalidPayload);
        }

        let pending_size = self
            .store
            .zcard(keys::PENDING)
            .await
            .unwrap_or(u64::MAX);
        if pending_size >= self.config.max_queue_size {
            return Err(RejectionReason::QueueFull);
        }

        if let Some(limit) = tier.monthly_limit() {
            let now = Utc::now();
            let counter_key = keys::monthly_counter(user_id, now.year(), now.month());
            let current: u64 = self
                .store
                .get(&counter_key)
                .await
                .ok()
                .flatten()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if current >= limit {
                return Err(RejectionReason::QuotaExceeded);
            }
        }

        Ok(Job::new(user_id.to_string(), tier, payload, Utc::now()))
    }
}
