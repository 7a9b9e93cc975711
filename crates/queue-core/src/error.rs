//! Error taxonomy for the queue core.
//!
//! `QueueError` distinguishes client errors the HTTP layer maps to a
//! specific status code from an opaque `Store` variant wrapping transient
//! backing-store failures. Core methods always return `Result<T, QueueError>`
//! so callers never have to string-match an error to decide how to react.

use thiserror::Error;

/// Why an admission was refused. A subset of `QueueError` surfaced directly
/// by the Admission Controller before a `Job` is ever allocated.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    #[error("queue is full")]
    QueueFull,
    #[error("monthly quota exceeded")]
    QuotaExceeded,
    #[error("unknown tier")]
    InvalidTier,
    #[error("invalid payload")]
    InvalidPayload,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("admission rejected: {0}")]
    Rejected(#[from] RejectionReason),

    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Lets callers (notably the HTTP layer) categorize an error without
/// downcasting or string-matching, mirroring the teacher's
/// `Categorizable`/`SafeErrorCategory` split between error payload and the
/// class of response it deserves.
pub trait Categorizable {
    fn category(&self) -> ErrorCategory;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    BadRequest,
    NotFound,
    Conflict,
    RateLimited,
    /// A store adapter exhausted its retry budget against a transient
    /// backend outage — distinct from `Internal`, which covers bugs and
    /// malformed records the HTTP layer can't ask the caller to retry past.
    Unavailable,
    Internal,
}

impl Categorizable for QueueError {
    fn category(&self) -> ErrorCategory {
        match self {
            QueueError::Rejected(RejectionReason::InvalidTier) => ErrorCategory::BadRequest,
            QueueError::Rejected(RejectionReason::InvalidPayload) => ErrorCategory::BadRequest,
            QueueError::Rejected(RejectionReason::QueueFull) => ErrorCategory::RateLimited,
            QueueError::Rejected(RejectionReason::QuotaExceeded) => ErrorCategory::RateLimited,
            QueueError::JobNotFound(_) => ErrorCategory::NotFound,
            QueueError::IllegalTransition(_) => ErrorCategory::Conflict,
            QueueError::Store(err) => {
                if err.downcast_ref::<crate::store::StoreUnavailable>().is_some() {
                    ErrorCategory::Unavailable
                } else {
                    ErrorCategory::Internal
                }
            }
            QueueError::Codec(_) => ErrorCategory::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
