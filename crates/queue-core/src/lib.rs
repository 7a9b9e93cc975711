//! # Queue Core
//!
//! The queue manager and worker dispatch core for a multi-tenant
//! project-generation service: admission control, priority/fairness
//! ordering, atomic state transitions over a shared key-value store,
//! timeout-based worker recovery, and status/estimate reporting.
//!
//! ## Architecture
//!
//! ```text
//! client
//!   │  admit()
//!   ▼
//! AdmissionController ──reject──► RejectionReason
//!   │ Job { queued }
//!   ▼
//! QueueManager.submit() ──► hash, counter, zadd(pending)
//!   │
//!   ▼
//! WorkerLoop.tick() ──► QueueManager.claim_next() ──► zrem(pending), lpush(inflight), lease
//!   │
//!   ▼
//! Generator.generate(payload)
//!   │
//!   ├─success─► QueueManager.complete()
//!   └─failure─► QueueManager.fail(retryable)
//!
//! TimeoutReaper.sweep() ──► scans inflight, lease absent ──► requeue or fail
//!
//! StatsEstimator ──► reads pending/inflight/daily counters, never mutates
//! ```
//!
//! ## Key Invariants
//!
//! 1. A job is in exactly one of {pending, in-flight} while non-terminal,
//!    and at most one terminal ring after.
//! 2. Status transitions form a DAG: `queued -> processing ->
//!    {completed|failed|cancelled}`; `queued -> cancelled`; `processing ->
//!    queued` (timeout retry only).
//! 3. Priority is a pure function of tier, fixed at submit time.
//! 4. Every in-flight entry has a coupled TTL lease; presence of one implies
//!    presence of the other.
//! 5. The monthly per-user counter is monotonic non-decreasing.
//!
//! ## What This Is Not
//!
//! This crate is **not**:
//! - A generic task-scheduling framework
//! - A durability layer (durability is whatever the `StoreAdapter`'s backing
//!   store provides — see `queue-store-redis`)
//! - A distributed consensus system
//!
//! This crate **is**:
//! > The ordering, admission, and recovery discipline that sits between
//! > "a user asked for a project" and "a worker is generating it."
//!
//! ## Values over globals
//!
//! The store adapter and `QueueConfig` are plain value types passed
//! explicitly into every component at construction. Nothing here reads a
//! process-level singleton or a module-level constant, so test doubles and
//! multiple isolated queues in one process are both free.

mod admission;
mod codec;
mod config;
mod error;
mod job;
mod queue_manager;
mod reaper;
mod stats;
mod store;
mod worker;

#[cfg(test)]
mod tests;

pub use admission::AdmissionController;
pub use config::{QueueConfig, TierLimits};
pub use error::{Categorizable, ErrorCategory, QueueError, RejectionReason, Result};
pub use job::{priority_score, Job, JobStatus, Tier, PRIORITY_SCORE_SHIFT};
pub use queue_manager::QueueManager;
pub use reaper::TimeoutReaper;
pub use stats::{JobStatusView, QueueStats, StatsEstimator};
pub use store::{keys, ScoredMember, StoreAdapter, StoreUnavailable};
pub use worker::{FailureKind, Generator, GeneratorError, WorkerLoop};

pub use async_trait::async_trait;
