//! The central job entity and the small pure functions that derive its
//! priority from tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A tenant class. Determines dispatch priority and monthly submission quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Indie,
    Pro,
    Enterprise,
}

impl Tier {
    /// Lower is higher priority. This is a pure function of tier and never
    /// changes after a job is submitted (invariant 4).
    pub fn priority(self) -> u8 {
        match self {
            Tier::Enterprise => 0,
            Tier::Pro => 1,
            Tier::Indie => 2,
            Tier::Free => 3,
        }
    }

    /// `None` means unlimited submissions per calendar month.
    pub fn monthly_limit(self) -> Option<u64> {
        match self {
            Tier::Free => Some(1),
            Tier::Indie => Some(10),
            Tier::Pro => None,
            Tier::Enterprise => None,
        }
    }

    /// `None` means this tier is bound only by the global
    /// `max_concurrent_jobs` cap. Free and indie each get a small slice of
    /// the worker pool reserved against the other so a burst of low-tier
    /// submissions can't occupy every concurrent slot; pro and enterprise
    /// are uncapped beyond the global limit.
    pub fn concurrent_cap(self) -> Option<u64> {
        match self {
            Tier::Free => Some(1),
            Tier::Indie => Some(2),
            Tier::Pro => None,
            Tier::Enterprise => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Indie => "indie",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Tier> {
        match s {
            "free" => Some(Tier::Free),
            "indie" => Some(Tier::Indie),
            "pro" => Some(Tier::Pro),
            "enterprise" => Some(Tier::Enterprise),
            _ => None,
        }
    }
}

/// Coarse lifecycle state. Transitions form the DAG described in the queue
/// manager: `queued -> processing -> {completed|failed|cancelled}`,
/// `queued -> cancelled`, `processing -> queued` (timeout retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// A single project-generation request and its lifecycle state.
///
/// `priority` is derived once at submit time from `tier` and never
/// recomputed; the two fields are kept on the struct together (rather than
/// computing priority on every read) so a `Job` read back from the store
/// always reflects what it was scored with at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub user_id: String,
    pub tier: Tier,
    pub priority: u8,
    pub payload: Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub result_handle: Option<String>,
    pub attempt: u32,
    pub cancel_requested: bool,
}

impl Job {
    pub fn new(user_id: String, tier: Tier, payload: Value, now: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            user_id,
            tier,
            priority: tier.priority(),
            payload,
            status: JobStatus::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
            worker_id: None,
            error_message: None,
            result_handle: None,
            attempt: 1,
            cancel_requested: false,
        }
    }

    /// `score = priority * SHIFT + created_at_epoch_seconds`.
    ///
    /// `SHIFT` must exceed any realistic epoch-seconds spread within a
    /// priority band so that sort order never crosses bands; 10^10 clears
    /// decades of epoch seconds with room to spare.
    pub fn priority_score(&self) -> f64 {
        priority_score(self.priority, self.created_at)
    }
}

pub const PRIORITY_SCORE_SHIFT: f64 = 1e10;

pub fn priority_score(priority: u8, created_at: DateTime<Utc>) -> f64 {
    priority as f64 * PRIORITY_SCORE_SHIFT + created_at.timestamp() as f64
}
