//! Serializes a `Job` to/from the flat string-keyed hash representation the
//! Store Adapter's `hset`/`hgetall` primitives traffic in, normalizing
//! timestamps to RFC 3339 and the payload to a JSON-encoded blob.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::job::{Job, JobStatus, Tier};

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_time(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

impl Job {
    /// Flattens this job into the field list `hset` expects.
    pub fn to_hash_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("job_id", self.job_id.to_string()),
            ("user_id", self.user_id.clone()),
            ("tier", self.tier.as_str().to_string()),
            ("priority", self.priority.to_string()),
            ("payload", self.payload.to_string()),
            ("status", self.status.as_str().to_string()),
            ("created_at", fmt_time(self.created_at)),
            ("attempt", self.attempt.to_string()),
            ("cancel_requested", self.cancel_requested.to_string()),
        ];
        if let Some(t) = self.started_at {
            fields.push(("started_at", fmt_time(t)));
        }
        if let Some(t) = self.completed_at {
            fields.push(("completed_at", fmt_time(t)));
        }
        if let Some(ref w) = self.worker_id {
            fields.push(("worker_id", w.clone()));
        }
        if let Some(ref e) = self.error_message {
            fields.push(("error_message", e.clone()));
        }
        if let Some(ref r) = self.result_handle {
            fields.push(("result_handle", r.clone()));
        }
        fields
    }

    /// Reconstructs a `Job` from a hash read back via `hgetall`.
    pub fn from_hash_fields(fields: &HashMap<String, String>) -> anyhow::Result<Job> {
        let get = |k: &str| {
            fields
                .get(k)
                .ok_or_else(|| anyhow::anyhow!("missing field `{k}` in job hash"))
        };

        let job_id = Uuid::parse_str(get("job_id")?)?;
        let user_id = get("user_id")?.clone();
        let tier = Tier::parse(get("tier")?).ok_or_else(|| anyhow::anyhow!("invalid tier"))?;
        let priority: u8 = get("priority")?.parse()?;
        let payload = serde_json::from_str(get("payload")?)?;
        let status =
            JobStatus::parse(get("status")?).ok_or_else(|| anyhow::anyhow!("invalid status"))?;
        let created_at = parse_time(get("created_at")?)?;
        let attempt: u32 = get("attempt")?.parse()?;
        let cancel_requested: bool = fields
            .get("cancel_requested")
            .map(|v| v == "true")
            .unwrap_or(false);

        let started_at = fields.get("started_at").map(|s| parse_time(s)).transpose()?;
        let completed_at = fields
            .get("completed_at")
            .map(|s| parse_time(s))
            .transpose()?;
        let worker_id = fields.get("worker_id").cloned();
        let error_message = fields.get("error_message").cloned();
        let result_handle = fields.get("result_handle").cloned();

        Ok(Job {
            job_id,
            user_id,
            tier,
            priority,
            payload,
            status,
            created_at,
            started_at,
            completed_at,
            worker_id,
            error_message,
            result_handle,
            attempt,
            cancel_requested,
        })
    }
}
